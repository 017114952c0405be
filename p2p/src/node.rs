//! The P2P host itself: swarm construction, transport, and the event loop
//! that ties gossip/sync/handshake/ban together, per spec §4.7/§4.8.
//! Grounded on the teacher's `P2PConfig`/`SwarmBuilder` wiring in the old
//! `src/network.rs`, rebuilt against the libp2p 0.53 builder API and the
//! klingnet protocol set.

use crate::ban::{self, BanStore};
use crate::behaviour::{self, BehaviourConfig, KlingnetBehaviour, KlingnetBehaviourEvent};
use crate::gate::ConnectionGate;
use crate::gossip;
use crate::handlers::{GossipOutcome, NodeHandlers};
use crate::handshake::{self, HandshakeMessage};
use crate::identity;
use crate::peerstore::{PeerSource, PeerStore};
use crate::sync::{self, HeightRequest, HeightResponse, SyncRequest, SyncResponse};
use bond_core::transaction::Transaction;
use consensus::Heartbeat;
use futures::StreamExt;
use libp2p::core::Multiaddr;
use libp2p::gossipsub::IdentTopic;
use libp2p::request_response::{self, OutboundRequestId, ResponseChannel};
use libp2p::swarm::SwarmEvent;
use libp2p::{noise, tcp, yamux, PeerId, Swarm};
use shared::{Hash256, ProtocolParams};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::Database;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Outbound gossip request queued from outside the swarm event loop (the
/// mining and heartbeat loops run as separate tasks and don't own the
/// swarm directly).
pub enum NodeCommand {
    Transaction(Transaction),
    Block(Box<bond_core::block::Block>),
    Heartbeat(Heartbeat),
    /// Subscribes to a newly spawned sub-chain's `tx`/`block`/`heartbeat`
    /// topics, per spec §4.6's "per-chain P2P topics" spawn semantics.
    SubscribeSubChain(Hash256),
    /// Leaves a deregistered sub-chain's topics, per spec §4.6's
    /// deregistration teardown.
    UnsubscribeSubChain(Hash256),
}

/// Cheap, cloneable handle the rest of the runtime holds to ask the node
/// to publish something, without needing `&mut P2pNode` itself (which
/// `run()` consumes by value).
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<NodeCommand>,
}

impl NodeHandle {
    pub fn publish_transaction(&self, tx: Transaction) {
        let _ = self.commands.send(NodeCommand::Transaction(tx));
    }

    pub fn publish_block(&self, block: bond_core::block::Block) {
        let _ = self.commands.send(NodeCommand::Block(Box::new(block)));
    }

    pub fn publish_heartbeat(&self, heartbeat: Heartbeat) {
        let _ = self.commands.send(NodeCommand::Heartbeat(heartbeat));
    }

    pub fn subscribe_sub_chain(&self, id: Hash256) {
        let _ = self.commands.send(NodeCommand::SubscribeSubChain(id));
    }

    pub fn unsubscribe_sub_chain(&self, id: Hash256) {
        let _ = self.commands.send(NodeCommand::UnsubscribeSubChain(id));
    }
}

pub struct NodeConfig {
    pub listen_addrs: Vec<Multiaddr>,
    pub bootstrap_peers: Vec<Multiaddr>,
    pub enable_mdns: bool,
    pub enable_kad_dht: bool,
    pub network_id: String,
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["/ip4/0.0.0.0/tcp/0".parse().expect("valid multiaddr literal")],
            bootstrap_peers: Vec::new(),
            enable_mdns: true,
            enable_kad_dht: true,
            network_id: "devnet".to_string(),
            data_dir: PathBuf::from("."),
        }
    }
}

/// The running libp2p host. Owns the swarm, the persisted peer/ban
/// stores, and the pending-handshake bookkeeping; delegates every
/// consensus-relevant decision to an injected [`NodeHandlers`].
pub struct P2pNode {
    swarm: Swarm<KlingnetBehaviour>,
    peers: Arc<PeerStore>,
    bans: Arc<BanStore>,
    gate: ConnectionGate,
    genesis_hash: Hash256,
    params: ProtocolParams,
    local_peer_id: PeerId,
    pending_handshakes: HashMap<PeerId, ()>,
    pending_sync: HashMap<OutboundRequestId, PeerId>,
    pending_height: HashMap<OutboundRequestId, PeerId>,
    /// In-flight backward-walk probes (spec §4.8 fork resolution): a
    /// single-block request at `height` sent to `peer`, awaiting a hash
    /// comparison against the local block at the same height.
    pending_fork_probe: HashMap<OutboundRequestId, (PeerId, u64)>,
    commands: mpsc::UnboundedReceiver<NodeCommand>,
}

impl P2pNode {
    /// # Errors
    ///
    /// Returns an error if the node identity cannot be loaded/created, or
    /// if swarm construction fails.
    pub fn new(config: NodeConfig, storage: Database, genesis_hash: Hash256, params: ProtocolParams) -> Result<(Self, NodeHandle), String> {
        let keypair = identity::load_or_create(&config.data_dir).map_err(|e| e.to_string())?;
        let local_peer_id = keypair.public().to_peer_id();

        let bans = Arc::new(BanStore::new(storage.clone(), params.ban_threshold));
        let peers = Arc::new(PeerStore::new(storage));
        let gate = ConnectionGate::new(bans.clone());

        let behaviour_config = BehaviourConfig {
            network_id: config.network_id.clone(),
            max_block_signing_bytes: params.max_block_signing_bytes,
            enable_mdns: config.enable_mdns,
            enable_kad_dht: config.enable_kad_dht,
            identify_protocol_version: format!("klingnet/{}", config.network_id),
        };

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)
            .map_err(|e| e.to_string())?
            .with_dns()
            .map_err(|e| e.to_string())?
            .with_behaviour(|kp| behaviour::new(kp, local_peer_id, &behaviour_config))
            .map_err(|e| e.to_string())?
            .build();

        for addr in &config.listen_addrs {
            swarm.listen_on(addr.clone()).map_err(|e| e.to_string())?;
        }
        for addr in &config.bootstrap_peers {
            let _ = swarm.dial(addr.clone());
        }
        for topic in gossip::root_topics() {
            swarm.behaviour_mut().gossipsub.subscribe(&topic).map_err(|e| e.to_string())?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                swarm,
                peers,
                bans,
                gate,
                genesis_hash,
                params,
                local_peer_id,
                pending_handshakes: HashMap::new(),
                pending_sync: HashMap::new(),
                pending_height: HashMap::new(),
                pending_fork_probe: HashMap::new(),
                commands: rx,
            },
            NodeHandle { commands: tx },
        ))
    }

    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// A clone of the shared peer store handle, so callers can query known
    /// peers (e.g. for an RPC surface) without holding `&P2pNode` once
    /// [`Self::run`] has taken ownership of it.
    #[must_use]
    pub fn peer_store(&self) -> Arc<PeerStore> {
        self.peers.clone()
    }

    fn local_handshake(&self, handlers: &dyn NodeHandlers) -> HandshakeMessage {
        HandshakeMessage {
            protocol_version: self.params.min_protocol_version,
            genesis_hash: *self.genesis_hash.as_bytes(),
            network_id: self.local_peer_id.to_string(),
            best_height: handlers.local_height(),
        }
    }

    pub fn publish_transaction(&mut self, tx: &Transaction) {
        let bytes = serde_json::to_vec(tx).expect("transaction serializes");
        if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(IdentTopic::new(gossip::TX_TOPIC), bytes) {
            debug!(error = %e, "failed to publish transaction");
        }
    }

    pub fn publish_block(&mut self, block: &bond_core::block::Block) {
        let bytes = serde_json::to_vec(block).expect("block serializes");
        if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(IdentTopic::new(gossip::BLOCK_TOPIC), bytes) {
            debug!(error = %e, "failed to publish block");
        }
    }

    pub fn publish_heartbeat(&mut self, heartbeat: &Heartbeat) {
        let bytes = serde_json::to_vec(heartbeat).expect("heartbeat serializes");
        if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(IdentTopic::new(gossip::HEARTBEAT_TOPIC), bytes) {
            debug!(error = %e, "failed to publish heartbeat");
        }
    }

    /// Drives the swarm event loop plus the periodic sync/persist/prune
    /// timers, per spec §4.8/§5, until `shutdown` is signalled.
    pub async fn run(mut self, handlers: Arc<dyn NodeHandlers>, mut shutdown: watch::Receiver<bool>) {
        let mut sync_tick = interval(Duration::from_secs(sync::POLL_INTERVAL_SECONDS));
        let mut persist_tick = interval(Duration::from_secs(5 * 60));
        let mut prune_tick = interval(Duration::from_secs(10 * 60));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("p2p node shutting down, persisting peers one final time");
                        let _ = self.peers.persist(ban::now_unix());
                        break;
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_event(event, handlers.as_ref());
                }
                _ = sync_tick.tick() => {
                    self.poll_for_sync(handlers.as_ref());
                }
                _ = persist_tick.tick() => {
                    let _ = self.peers.persist(ban::now_unix());
                }
                _ = prune_tick.tick() => {
                    let _ = self.bans.prune_expired(ban::now_unix());
                }
                command = self.commands.recv() => {
                    match command {
                        Some(NodeCommand::Transaction(tx)) => self.publish_transaction(&tx),
                        Some(NodeCommand::Block(block)) => self.publish_block(&block),
                        Some(NodeCommand::Heartbeat(heartbeat)) => self.publish_heartbeat(&heartbeat),
                        Some(NodeCommand::SubscribeSubChain(id)) => self.subscribe_sub_chain_topics(id),
                        Some(NodeCommand::UnsubscribeSubChain(id)) => self.unsubscribe_sub_chain_topics(id),
                        None => {}
                    }
                }
            }
        }
    }

    fn subscribe_sub_chain_topics(&mut self, id: Hash256) {
        for topic in gossip::sub_chain_topics(id) {
            if let Err(e) = self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                warn!(%id, error = %e, "failed to subscribe to sub-chain topic");
            }
        }
    }

    fn unsubscribe_sub_chain_topics(&mut self, id: Hash256) {
        for topic in gossip::sub_chain_topics(id) {
            let _ = self.swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
        }
    }

    fn poll_for_sync(&mut self, handlers: &dyn NodeHandlers) {
        let peers: Vec<PeerId> = self.swarm.connected_peers().copied().collect();
        let sample: Vec<PeerId> = peers.into_iter().take(sync::POLL_PEER_COUNT).collect();
        for peer in sample {
            let id = self.swarm.behaviour_mut().height.send_request(&peer, HeightRequest);
            self.pending_height.insert(id, peer);
        }
        let _ = handlers.local_height();
    }

    fn request_sync_from(&mut self, peer: PeerId, from_height: u64, max_blocks: u64) {
        let request = SyncRequest {
            from_height,
            max_blocks: sync::clamp_batch(max_blocks),
        };
        let id = self.swarm.behaviour_mut().sync.send_request(&peer, request);
        self.pending_sync.insert(id, peer);
    }

    /// Starts (or continues) the fork-resolution backward walk from spec
    /// §4.8: request a single block from `peer` at `height` so its hash can
    /// be compared against the local block at the same height.
    fn probe_fork_ancestor(&mut self, peer: PeerId, height: u64) {
        let request = SyncRequest { from_height: height, max_blocks: 1 };
        let id = self.swarm.behaviour_mut().sync.send_request(&peer, request);
        self.pending_fork_probe.insert(id, (peer, height));
    }

    fn handle_event(&mut self, event: SwarmEvent<KlingnetBehaviourEvent>, handlers: &dyn NodeHandlers) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => info!(%address, "listening"),
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                if !self.gate.should_allow(&peer_id) {
                    let _ = self.swarm.disconnect_peer_id(peer_id);
                    return;
                }
                self.peers.record_seen(peer_id, None, PeerSource::Gossip, ban::now_unix());
                let handshake = self.local_handshake(handlers);
                let id = self.swarm.behaviour_mut().handshake.send_request(&peer_id, handshake);
                self.pending_handshakes.insert(peer_id, ());
                let _ = id;
            }
            SwarmEvent::Behaviour(KlingnetBehaviourEvent::Mdns(event)) => self.handle_mdns(event),
            SwarmEvent::Behaviour(KlingnetBehaviourEvent::Gossipsub(event)) => self.handle_gossip(event, handlers),
            SwarmEvent::Behaviour(KlingnetBehaviourEvent::Handshake(event)) => self.handle_handshake(event, handlers),
            SwarmEvent::Behaviour(KlingnetBehaviourEvent::Sync(event)) => self.handle_sync(event, handlers),
            SwarmEvent::Behaviour(KlingnetBehaviourEvent::Height(event)) => self.handle_height(event, handlers),
            _ => {}
        }
    }

    fn handle_mdns(&mut self, event: libp2p::mdns::Event) {
        match event {
            libp2p::mdns::Event::Discovered(peers) => {
                for (peer_id, addr) in peers {
                    if self.gate.should_allow(&peer_id) {
                        self.peers.record_seen(peer_id, Some(addr.clone()), PeerSource::Mdns, ban::now_unix());
                        let _ = self.swarm.dial(addr);
                    }
                }
            }
            libp2p::mdns::Event::Expired(_) => {}
        }
    }

    fn handle_gossip(&mut self, event: libp2p::gossipsub::Event, handlers: &dyn NodeHandlers) {
        let libp2p::gossipsub::Event::Message { message, .. } = event else {
            return;
        };
        if gossip::is_self_authored(&message, &self.local_peer_id) {
            return;
        }
        let topic = message.topic.to_string();
        let outcome = if topic == gossip::TX_TOPIC {
            serde_json::from_slice::<Transaction>(&message.data)
                .map(|tx| handlers.on_gossip_transaction(tx))
                .unwrap_or(GossipOutcome::Invalid)
        } else if topic == gossip::BLOCK_TOPIC {
            let outcome = serde_json::from_slice::<bond_core::block::Block>(&message.data)
                .map(|block| handlers.on_gossip_block(block))
                .unwrap_or(GossipOutcome::Invalid);
            if outcome == GossipOutcome::OrphanParent {
                // Spec §4.8: an orphan-parent block triggers sync
                // immediately rather than waiting for the next poll tick.
                self.poll_for_sync(handlers);
            }
            outcome
        } else if topic == gossip::HEARTBEAT_TOPIC {
            serde_json::from_slice::<Heartbeat>(&message.data)
                .map(|hb| handlers.on_gossip_heartbeat(hb))
                .unwrap_or(GossipOutcome::Invalid)
        } else if let Some((chain_id, kind)) = gossip::parse_sub_chain_topic(&topic) {
            // Only the block variant carries consensus-relevant state to
            // route through the sub-chain manager; tx/heartbeat variants
            // for sub-chains are handled identically to the root chain's
            // but scoped to that chain's own mempool/tracker, which the
            // runtime wires up per sub-chain rather than through this
            // single dispatch point.
            if kind == "block" {
                serde_json::from_slice::<bond_core::block::Block>(&message.data)
                    .map(|block| handlers.on_sub_chain_gossip_block(chain_id, block))
                    .unwrap_or(GossipOutcome::Invalid)
            } else {
                return;
            }
        } else {
            return;
        };

        if let Some(source) = message.source {
            match outcome {
                GossipOutcome::Invalid if topic == gossip::BLOCK_TOPIC => {
                    self.penalize(source, self.params.penalty_invalid_block, "invalid gossiped block");
                }
                GossipOutcome::Invalid if topic == gossip::TX_TOPIC => {
                    self.penalize(source, self.params.penalty_invalid_tx, "invalid gossiped transaction");
                }
                GossipOutcome::Invalid => {
                    self.penalize(source, self.params.penalty_invalid_block, "invalid sub-chain gossip");
                }
                _ => {}
            }
        }
    }

    fn handle_handshake(&mut self, event: request_response::Event<HandshakeMessage, HandshakeMessage>, handlers: &dyn NodeHandlers) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request { request, channel, .. } => {
                    let local = self.local_handshake(handlers);
                    let ok = handshake::validate(&local, &request, self.params.min_protocol_version).is_ok();
                    if ok {
                        let _ = self.swarm.behaviour_mut().handshake.send_response(channel, local);
                    } else {
                        self.penalize(peer, self.params.penalty_handshake_fail, "inbound handshake mismatch");
                    }
                }
                request_response::Message::Response { response, .. } => {
                    let local = self.local_handshake(handlers);
                    if handshake::validate(&local, &response, self.params.min_protocol_version).is_err() {
                        self.penalize(peer, self.params.penalty_handshake_fail, "outbound handshake mismatch");
                    } else {
                        self.pending_handshakes.remove(&peer);
                    }
                }
            },
            request_response::Event::OutboundFailure { peer, .. } => {
                warn!(%peer, "handshake outbound failure");
            }
            _ => {}
        }
    }

    fn handle_sync(&mut self, event: request_response::Event<SyncRequest, SyncResponse>, handlers: &dyn NodeHandlers) {
        if let request_response::Event::Message { peer, message, .. } = event {
            match message {
                request_response::Message::Request { request, channel, .. } => {
                    let blocks = handlers.get_block_range(request.from_height, sync::clamp_batch(request.max_blocks));
                    let _ = self.swarm.behaviour_mut().sync.send_response(channel, SyncResponse { blocks });
                }
                request_response::Message::Response { request_id, response, .. } => {
                    if let Some((probe_peer, probe_height)) = self.pending_fork_probe.remove(&request_id) {
                        self.handle_fork_probe_response(probe_peer, probe_height, response.blocks.into_iter().next(), handlers);
                        return;
                    }
                    self.pending_sync.remove(&request_id);
                    for block in response.blocks {
                        let height = block.header.height;
                        match handlers.on_gossip_block(block) {
                            GossipOutcome::Invalid => {
                                self.penalize(peer, self.params.penalty_invalid_block, "invalid synced block");
                                break;
                            }
                            GossipOutcome::OrphanParent => {
                                // Same-height-different-tip or a deeper
                                // fork: start walking backward from just
                                // before this block to find the common
                                // ancestor, per spec §4.8.
                                if let Some(probe_height) = sync::next_fork_probe_height(height) {
                                    self.probe_fork_ancestor(peer, probe_height);
                                }
                                break;
                            }
                            GossipOutcome::Accepted | GossipOutcome::Known => {}
                        }
                    }
                }
            }
        }
    }

    /// Continues or concludes the fork-resolution backward walk: on a hash
    /// match the common ancestor is found and forward sync resumes from
    /// just past it; on a mismatch the walk steps one block further back;
    /// running out of history (height 0 with no match) abandons the walk,
    /// per spec §4.8.
    fn handle_fork_probe_response(
        &mut self,
        peer: PeerId,
        height: u64,
        peer_block: Option<bond_core::block::Block>,
        handlers: &dyn NodeHandlers,
    ) {
        let Some(peer_block) = peer_block else {
            warn!(%peer, height, "fork probe got an empty response, abandoning");
            return;
        };
        let local_hash = handlers.get_block(height).map(|b| b.hash());
        if local_hash == Some(peer_block.hash()) {
            info!(%peer, ancestor_height = height, "fork resolution found common ancestor");
            self.request_sync_from(peer, height + 1, sync::MAX_BLOCKS_PER_BATCH);
        } else if let Some(next_height) = sync::next_fork_probe_height(height) {
            self.probe_fork_ancestor(peer, next_height);
        } else {
            warn!(%peer, "fork resolution reached genesis without finding a common ancestor, abandoning");
        }
    }

    fn handle_height(&mut self, event: request_response::Event<HeightRequest, HeightResponse>, handlers: &dyn NodeHandlers) {
        if let request_response::Event::Message { peer, message, .. } = event {
            match message {
                request_response::Message::Request { channel, .. } => {
                    let response = HeightResponse {
                        height: handlers.local_height(),
                        tip_hash: handlers.local_tip(),
                    };
                    let _ = self.swarm.behaviour_mut().height.send_response(channel, response);
                }
                request_response::Message::Response { request_id, response, .. } => {
                    self.pending_height.remove(&request_id);
                    let local_height = handlers.local_height();
                    let local_tip = handlers.local_tip();
                    if let Some(chosen) = sync::select_sync_peer(local_height, local_tip, &[(peer, response)]) {
                        self.request_sync_from(chosen, local_height + 1, sync::MAX_BLOCKS_PER_BATCH);
                    }
                }
            }
        }
    }

    fn penalize(&mut self, peer: PeerId, penalty: u32, reason: &str) {
        match self.bans.penalize(peer, penalty, reason, ban::now_unix()) {
            Ok(true) => {
                self.gate.enforce(&mut self.swarm.behaviour_mut().block_list, peer);
                let _ = self.swarm.disconnect_peer_id(peer);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to persist ban"),
        }
    }
}

#[must_use]
pub fn rendezvous_namespace(network_id: &str) -> String {
    format!("klingnet/{network_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendezvous_namespace_is_prefixed() {
        assert_eq!(rendezvous_namespace("testnet"), "klingnet/testnet");
    }
}
