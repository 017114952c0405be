//! CLI flags and node configuration assembly, per spec §6/§9's ambient
//! config layer. Follows the teacher's `shared::types::NodeConfig`
//! default-struct-plus-overrides shape; there is no config-file parser
//! (out of scope per spec §1), only `clap` flags layered onto defaults.

use clap::{Parser, Subcommand};
use shared::types::NetworkType;
use shared::ProtocolParams;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "klingnet-node", version, about = "Klingnet UTXO blockchain node")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the node: loads or creates identity/genesis, joins the P2P
    /// overlay, and (if a validator key is configured) produces blocks.
    Run(RunArgs),
    /// Prints the node's Ed25519 P2P identity, creating one if absent.
    Identity(RunArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Directory holding `<network>/{blocks,utxo,peerstore,banstore,node.key}`.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, value_enum, default_value = "devnet")]
    pub network: NetworkArg,

    /// TCP port the P2P swarm listens on; 0 picks an ephemeral port.
    #[arg(long, default_value_t = 0)]
    pub p2p_port: u16,

    /// Multiaddrs of peers to dial at startup, in addition to mDNS/DHT discovery.
    #[arg(long = "bootstrap-peer")]
    pub bootstrap_peers: Vec<String>,

    #[arg(long, default_value_t = true)]
    pub mdns: bool,

    #[arg(long, default_value_t = true)]
    pub kad_dht: bool,

    /// Hex-encoded secp256k1 private key (32 bytes) this node signs blocks
    /// and heartbeats with. Absent means the node runs as a follower: it
    /// validates and relays but never produces.
    #[arg(long)]
    pub validator_key: Option<String>,

    /// Hex-encoded x-only pubkeys (32 bytes each) making up the genesis
    /// PoA validator set. Required to produce the chain's genesis block
    /// when no existing chain is found.
    #[arg(long = "genesis-validator")]
    pub genesis_validators: Vec<String>,

    /// Address (hex or bech32) the genesis coinbase reward pays to.
    #[arg(long)]
    pub genesis_reward_address: Option<String>,

    #[arg(long, default_value_t = ProtocolParams::default().validator_stake)]
    pub validator_stake: u64,

    #[arg(long, default_value_t = ProtocolParams::default().sub_chain_max_depth)]
    pub sub_chain_max_depth: u32,

    #[arg(long, default_value_t = ProtocolParams::default().sub_chain_max_per_parent)]
    pub sub_chain_max_per_parent: usize,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkArg {
    Mainnet,
    Testnet,
    Devnet,
    Regtest,
}

impl From<NetworkArg> for NetworkType {
    fn from(value: NetworkArg) -> Self {
        match value {
            NetworkArg::Mainnet => Self::Mainnet,
            NetworkArg::Testnet => Self::Testnet,
            NetworkArg::Devnet => Self::Devnet,
            NetworkArg::Regtest => Self::Regtest,
        }
    }
}

impl RunArgs {
    #[must_use]
    pub fn protocol_params(&self) -> ProtocolParams {
        ProtocolParams {
            validator_stake: self.validator_stake,
            sub_chain_max_depth: self.sub_chain_max_depth,
            sub_chain_max_per_parent: self.sub_chain_max_per_parent,
            ..ProtocolParams::default()
        }
    }

    #[must_use]
    pub fn network_data_dir(&self) -> PathBuf {
        let network: NetworkType = self.network.into();
        self.data_dir.join(network.network_id())
    }

    #[must_use]
    pub fn bech32_hrp(&self) -> &'static str {
        shared::address::hrp_for_network(self.network.into())
    }
}
