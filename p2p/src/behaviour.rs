//! Combined `NetworkBehaviour`, per spec §4.7: transport-level concerns
//! (gossip, discovery, identify/ping keepalive, handshake, sync/height
//! request-response, ban enforcement) wired into one swarm behaviour via
//! libp2p 0.53's `#[derive(NetworkBehaviour)]`, the same composition
//! pattern the teacher used for its (now superseded) `BlockchainBehaviour`
//! in the old `src/network.rs`.

use crate::{gossip, handshake, sync};
use libp2p::allow_block_list::{self, BlockedPeers};
use libp2p::identity::Keypair;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, kad, mdns, ping, PeerId, StreamProtocol};

#[derive(NetworkBehaviour)]
pub struct KlingnetBehaviour {
    pub gossipsub: libp2p::gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub handshake: handshake::Behaviour,
    pub sync: sync::SyncBehaviour,
    pub height: sync::HeightBehaviour,
    pub block_list: allow_block_list::Behaviour<BlockedPeers>,
}

pub struct BehaviourConfig {
    pub network_id: String,
    pub max_block_signing_bytes: u64,
    pub enable_mdns: bool,
    pub enable_kad_dht: bool,
    pub identify_protocol_version: String,
}

/// # Errors
///
/// Returns an error if the gossipsub or mDNS behaviours fail to construct.
pub fn new(keypair: &Keypair, local_peer_id: PeerId, config: &BehaviourConfig) -> Result<KlingnetBehaviour, String> {
    let gossipsub = gossip::new_behaviour(keypair, config.max_block_signing_bytes)?;
    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id).map_err(|e| e.to_string())?;

    // Rendezvous namespace `klingnet/<network_id>` (spec §4.7) isolates
    // discovery per chain by giving each network its own Kademlia
    // protocol name rather than sharing one DHT across unrelated chains.
    let protocol_name = format!("/klingnet/{}/kad/1.0.0", config.network_id);
    let store = kad::store::MemoryStore::new(local_peer_id);
    let kad_config = kad::Config::default().set_protocol_names(vec![StreamProtocol::try_from_owned(protocol_name).map_err(|e| e.to_string())?]);
    let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
    if config.enable_kad_dht {
        kademlia.set_mode(Some(kad::Mode::Server));
    } else {
        kademlia.set_mode(Some(kad::Mode::Client));
    }

    let identify = identify::Behaviour::new(identify::Config::new(
        config.identify_protocol_version.clone(),
        keypair.public(),
    ));
    let ping = ping::Behaviour::default();

    Ok(KlingnetBehaviour {
        gossipsub,
        mdns,
        kademlia,
        identify,
        ping,
        handshake: handshake::new_behaviour(),
        sync: sync::new_sync_behaviour(),
        height: sync::new_height_behaviour(),
        block_list: allow_block_list::Behaviour::default(),
    })
}
