//! Prefixable ordered key-value store with atomic batches.
//!
//! Backed by `sled`. Every consumer (UTXO set, block store, peer store, ban
//! store, sub-chain namespaces) shares one `Database` and partitions it with
//! a byte-string key prefix, per the design note in spec §9 ("peer store /
//! ban store as prefix namespaces... preserves atomic commits").

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] sled::Error),
    #[error("storage transaction error: {0}")]
    Transaction(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A batch of writes applied atomically via [`Database::commit`].
#[derive(Debug, Default, Clone)]
pub struct Batch {
    inner: sled::Batch,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.inner.insert(key.as_ref(), value.as_ref());
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.inner.remove(key.as_ref());
    }
}

/// An ordered, prefixable key-value store.
#[derive(Debug, Clone)]
pub struct Database {
    tree: sled::Db,
}

impl Database {
    /// Opens (creating if absent) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let tree = sled::open(path)?;
        Ok(Self { tree })
    }

    /// Opens a purely in-memory database, used in tests and ephemeral
    /// sub-chain genesis synthesis.
    ///
    /// # Errors
    ///
    /// Returns an error if sled fails to initialize a temporary backend.
    pub fn open_temporary() -> Result<Self> {
        let tree = sled::Config::new().temporary(true).open()?;
        Ok(Self { tree })
    }

    /// Returns the raw value stored at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_ref())?.map(|v| v.to_vec()))
    }

    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.tree.contains_key(key.as_ref())?)
    }

    /// Iterates all key/value pairs whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure encountered while iterating.
    pub fn scan_prefix(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_ref()) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Deletes every key under `prefix`. Used by sub-chain deregistration to
    /// drop an entire `sc/<id>/` namespace in one call.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn remove_prefix(&self, prefix: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for item in self.tree.scan_prefix(prefix.as_ref()) {
            let (k, _) = item?;
            batch.remove(k);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    /// Atomically commits a [`Batch`] of writes. Either all keys update or
    /// none do.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store rejects the batch.
    pub fn commit(&self, batch: Batch) -> Result<()> {
        self.tree.apply_batch(batch.inner)?;
        Ok(())
    }

    /// Flushes pending writes to disk; called on graceful shutdown and
    /// periodic peer/ban persistence.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Builds a namespaced key: `prefix/rest`.
#[must_use]
pub fn namespaced_key(prefix: &str, rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1 + rest.len());
    key.extend_from_slice(prefix.as_bytes());
    key.push(b'/');
    key.extend_from_slice(rest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip() {
        let db = Database::open_temporary().unwrap();
        let mut batch = Batch::new();
        batch.put(b"blocks/abc", b"block-bytes");
        db.commit(batch).unwrap();
        assert_eq!(db.get(b"blocks/abc").unwrap().unwrap(), b"block-bytes");
    }

    #[test]
    fn missing_key_is_none() {
        let db = Database::open_temporary().unwrap();
        assert!(db.get(b"nope").unwrap().is_none());
    }

    #[test]
    fn scan_prefix_is_ordered_and_isolated() {
        let db = Database::open_temporary().unwrap();
        let mut batch = Batch::new();
        batch.put(b"utxo/1", b"a");
        batch.put(b"utxo/2", b"b");
        batch.put(b"peerstore/1", b"c");
        db.commit(batch).unwrap();

        let results = db.scan_prefix(b"utxo/").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, b"utxo/1");
        assert_eq!(results[1].0, b"utxo/2");
    }

    #[test]
    fn remove_prefix_deletes_only_matching_keys() {
        let db = Database::open_temporary().unwrap();
        let mut batch = Batch::new();
        batch.put(b"sc/child1/utxo/1", b"a");
        batch.put(b"sc/child1/utxo/2", b"b");
        batch.put(b"sc/child2/utxo/1", b"c");
        db.commit(batch).unwrap();

        db.remove_prefix(b"sc/child1/").unwrap();

        assert!(db.scan_prefix(b"sc/child1/").unwrap().is_empty());
        assert_eq!(db.scan_prefix(b"sc/child2/").unwrap().len(), 1);
    }

    #[test]
    fn namespaced_key_joins_with_slash() {
        let key = namespaced_key("banstore/ban", b"peer-123");
        assert_eq!(key, b"banstore/ban/peer-123");
    }
}
