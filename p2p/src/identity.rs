//! Stable node identity, per spec §4.7: "Stable node identity loaded from
//! or created in the data directory (Ed25519 key -> libp2p peer ID)."
//! Grounded on the teacher's `identity::Keypair` usage in the old
//! `src/network.rs`, updated to the libp2p 0.53 `Keypair` API.

use libp2p::identity::Keypair;
use std::fs;
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Loads the Ed25519 node identity from `<data_dir>/node.key`, generating
/// and persisting a new one if absent. The file is written with `0600`
/// permissions on unix (owner read/write only).
///
/// # Errors
///
/// Returns an error if the key file exists but cannot be read/parsed, or
/// if a newly generated key cannot be persisted.
pub fn load_or_create(data_dir: impl AsRef<Path>) -> io::Result<Keypair> {
    let path = data_dir.as_ref().join("node.key");
    if path.exists() {
        let bytes = fs::read(&path)?;
        return Keypair::from_protobuf_encoding(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
    }

    let keypair = Keypair::generate_ed25519();
    let encoded = keypair
        .to_protobuf_encoding()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &encoded)?;

    #[cfg(unix)]
    {
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&path, perms)?;
    }

    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_then_reloads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        let second = load_or_create(dir.path()).unwrap();
        assert_eq!(first.public().to_peer_id(), second.public().to_peer_id());
    }

    #[cfg(unix)]
    #[test]
    fn persisted_key_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        load_or_create(dir.path()).unwrap();
        let meta = fs::metadata(dir.path().join("node.key")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
