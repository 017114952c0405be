//! Klingnet node binary: wires storage, the root chain, the sub-chain
//! manager, the PoA validator set and the P2P swarm into a single running
//! process, per spec §2/§5's component graph and shutdown ordering.

mod config;
mod rpc;
mod runtime;

use std::sync::{Arc, Mutex};

use bond_core::chain::{Chain, ChainHandlers};
use bond_core::mempool::Mempool;
use bond_core::script::Script;
use bond_core::transaction::{Transaction, TxOutput};
use bond_core::ConsensusEngine;
use clap::Parser;
use config::{Cli, Command, RunArgs};
use consensus::{PoaEngine, StakeBridge, ValidatorSet, ValidatorTracker};
use libp2p::Multiaddr;
use runtime::{
    heartbeat_loop, mining_loop, now_unix, NodeRuntime, RevertedTxBuffer, SharedPoaEngine,
    StakeHandlerRef, SubChainDeregistrationHandler, SubChainRegistrationHandler, UnstakeHandlerRef,
};
use shared::{Address, Hash256, KeyPair, ProtocolParams};
use storage::Database;
use subchain::manager::SubChainManager;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pubkey of an unspendable burn address, used as the genesis coinbase
/// payee when no `--genesis-reward-address` is given. Mirrors the constant
/// the sub-chain manager uses for the same purpose.
const BURN_PUBKEY: [u8; 33] = [2u8; 33];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Identity(args) => run_identity(args),
        Command::Run(args) => run_node(args).await,
    }
}

fn run_identity(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = args.network_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let keypair = p2p::identity::load_or_create(&data_dir)?;
    println!("{}", keypair.public().to_peer_id());
    Ok(())
}

async fn run_node(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data_dir = args.network_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let storage = Database::open(&data_dir)?;
    let params = args.protocol_params();
    let bech32_hrp = args.bech32_hrp();

    let genesis_validators = parse_pubkeys(&args.genesis_validators)?;
    if genesis_validators.is_empty() {
        return Err("at least one --genesis-validator is required to start a chain".into());
    }

    let reward_address = match &args.genesis_reward_address {
        Some(text) => Address::parse(text, bech32_hrp)?,
        None => Address::from_pubkey_bytes(&BURN_PUBKEY)?,
    };
    let genesis = build_genesis(&reward_address, &params);
    let genesis_hash = genesis.hash();

    let poa_engine = Arc::new(Mutex::new(PoaEngine::new(genesis_validators.clone(), params.block_time_seconds)));
    let sub_chains = Arc::new(Mutex::new(SubChainManager::new(storage.clone(), params.clone())));
    let mempool = Arc::new(Mutex::new(Mempool::new(params.mempool_capacity, params.min_fee_rate)));
    let reverted_tx_buffer = Arc::new(Mutex::new(Vec::new()));

    let stake_bridge = Arc::new(StakeBridge::new(genesis_validators.clone(), {
        let poa_engine = poa_engine.clone();
        move |is_stake, pubkey| {
            let mut engine = poa_engine.lock().expect("poa engine lock poisoned");
            if is_stake {
                engine.add_validator(pubkey.to_vec());
            } else {
                engine.remove_validator(&pubkey);
            }
        }
    }));

    // The P2P node (and the `NodeHandle` used to publish/subscribe from
    // outside the swarm event loop) is constructed before `Chain`, since
    // the sub-chain registration/deregistration handlers need a handle to
    // subscribe/unsubscribe a spawned sub-chain's gossip topics.
    let network_type: shared::types::NetworkType = args.network.into();
    let bootstrap_peers: Vec<Multiaddr> = args
        .bootstrap_peers
        .iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?;
    let p2p_config = p2p::NodeConfig {
        listen_addrs: vec![format!("/ip4/0.0.0.0/tcp/{}", args.p2p_port).parse()?],
        bootstrap_peers,
        enable_mdns: args.mdns,
        enable_kad_dht: args.kad_dht,
        network_id: network_type.network_id().to_string(),
        data_dir: data_dir.clone(),
    };

    let (p2p_node, node_handle) = p2p::P2pNode::new(p2p_config, storage.clone(), genesis_hash, params.clone())
        .map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    let local_peer_id = p2p_node.local_peer_id();
    let peers = p2p_node.peer_store();

    let handlers = ChainHandlers {
        registration: Some(Box::new(SubChainRegistrationHandler {
            sub_chains: sub_chains.clone(),
            node_handle: node_handle.clone(),
        })),
        deregistration: Some(Box::new(SubChainDeregistrationHandler {
            sub_chains: sub_chains.clone(),
            node_handle: node_handle.clone(),
        })),
        stake: Some(Box::new(StakeHandlerRef(stake_bridge.clone()))),
        unstake: Some(Box::new(UnstakeHandlerRef(stake_bridge.clone()))),
        reverted_tx: Some(Box::new(RevertedTxBuffer(reverted_tx_buffer.clone()))),
        registration_admission: Some(Box::new({
            let sub_chains = sub_chains.clone();
            move |data: &[u8]| {
                sub_chains
                    .lock()
                    .expect("sub-chain manager lock poisoned")
                    .check_admission(Hash256::zero(), data)
            }
        })),
    };

    let engine: Box<dyn ConsensusEngine> = Box::new(SharedPoaEngine(poa_engine.clone()));
    let chain = Chain::new(genesis, params.clone(), engine, handlers)?;

    let validator_key = match &args.validator_key {
        Some(hex_key) => Some(KeyPair::from_private_key(&hex::decode(hex_key)?)?),
        None => None,
    };

    let validator_set = ValidatorSet::new(genesis_validators.clone(), params.validator_stake);
    let validator_tracker = Mutex::new(ValidatorTracker::new(params.heartbeat_freshness_seconds));

    let runtime = Arc::new(NodeRuntime {
        chain: Mutex::new(chain),
        mempool,
        bech32_hrp,
        params: params.clone(),
        local_peer_id,
        genesis_hash,
        peers,
        validator_set,
        validator_tracker,
        sub_chains,
        poa_engine,
        reverted_tx_buffer,
    });

    // The method dispatch table is ready for an embedding RPC/wallet
    // transport to drive; this binary itself only runs the P2P/mining
    // loops below.
    let _dispatcher = rpc::Dispatcher::new(runtime.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    {
        let handlers: Arc<dyn p2p::NodeHandlers> = runtime.clone();
        tasks.push(tokio::spawn(p2p_node.run(handlers, shutdown_rx.clone())));
    }

    if let Some(keypair) = validator_key {
        tasks.push(tokio::spawn(mining_loop(
            runtime.clone(),
            keypair.clone(),
            node_handle.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(heartbeat_loop(
            runtime.clone(),
            keypair,
            node_handle.clone(),
            shutdown_rx.clone(),
        )));
    }

    info!(
        peer_id = %local_peer_id,
        height = runtime.chain.lock().expect("chain lock poisoned").height(),
        network = network_type.network_id(),
        "klingnet node running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining tasks");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    storage.flush()?;
    Ok(())
}

fn build_genesis(reward_address: &Address, params: &ProtocolParams) -> bond_core::block::Block {
    let coinbase = Transaction::coinbase(
        0,
        vec![TxOutput::new(params.base_block_reward, Script::p2pkh(reward_address))],
    );
    bond_core::block::Block::new(Hash256::zero(), now_unix(), 0, vec![coinbase])
}

fn parse_pubkeys(values: &[String]) -> Result<Vec<[u8; 32]>, Box<dyn std::error::Error>> {
    values
        .iter()
        .map(|v| {
            let bytes = hex::decode(v)?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| "genesis validator pubkey must be 32 bytes".into())
        })
        .collect()
}
