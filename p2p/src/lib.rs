//! libp2p host for the klingnet node, per spec §4.7/§4.8: transport,
//! identity, connection gating, handshake, gossip topics, request/
//! response sync streams, ban store, and peer store.

pub mod ban;
pub mod behaviour;
pub mod gate;
pub mod gossip;
pub mod handlers;
pub mod handshake;
pub mod identity;
pub mod node;
pub mod peerstore;
pub mod sync;

pub use ban::BanStore;
pub use behaviour::{BehaviourConfig, KlingnetBehaviour, KlingnetBehaviourEvent};
pub use gate::ConnectionGate;
pub use handlers::{GossipOutcome, NodeHandlers};
pub use node::{NodeCommand, NodeConfig, NodeHandle, P2pNode};
pub use peerstore::{PeerSource, PeerStore};
