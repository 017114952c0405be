//! Request handler table the node exposes to wallet/RPC/CLI collaborators,
//! per spec §6/§9: `Dispatcher` maps a method name and JSON params to a
//! JSON result with no network listener attached — the transport is an
//! explicitly out-of-scope façade, mirrored here the way the teacher's
//! `BlockchainNode` exposes plain library methods for an external binary
//! to wire up.

use crate::runtime::NodeRuntime;
use serde_json::{json, Value};
use std::sync::Arc;

/// JSON-RPC 2.0-shaped error, per spec §6/§7.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const DOMAIN_ERROR: i64 = -32000;

    fn not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
        }
    }

    fn domain(message: impl Into<String>) -> Self {
        Self {
            code: Self::DOMAIN_ERROR,
            message: message.into(),
        }
    }
}

pub type RpcResult = Result<Value, RpcError>;

/// Stateless dispatch table over a [`NodeRuntime`]; every method is a pure
/// read except `mining_submitBlock`, which feeds a block through the same
/// acceptance path gossip uses.
pub struct Dispatcher {
    runtime: Arc<NodeRuntime>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(runtime: Arc<NodeRuntime>) -> Self {
        Self { runtime }
    }

    /// # Errors
    ///
    /// Returns [`RpcError::METHOD_NOT_FOUND`] for an unrecognized method, or
    /// [`RpcError::DOMAIN_ERROR`] if the params are malformed or the
    /// requested entity does not exist.
    pub fn dispatch(&self, method: &str, params: &Value) -> RpcResult {
        match method {
            "chain_getInfo" => self.chain_get_info(),
            "chain_getBlockByHeight" => self.chain_get_block_by_height(params),
            "chain_getBlockByHash" => self.chain_get_block_by_hash(params),
            "chain_getTransaction" => self.chain_get_transaction(params),
            "utxo_getBalance" => self.utxo_get_balance(params),
            "utxo_getByAddress" => self.utxo_get_by_address(params),
            "mempool_getInfo" => self.mempool_get_info(),
            "mempool_getContent" => self.mempool_get_content(),
            "net_getNodeInfo" => self.net_get_node_info(),
            "net_getPeerInfo" => self.net_get_peer_info(),
            "stake_getValidators" => self.stake_get_validators(),
            "stake_getInfo" => self.stake_get_info(params),
            "token_list" => self.token_list(),
            "token_getInfo" => self.token_get_info(params),
            "token_getBalance" => self.token_get_balance(params),
            "subchain_list" => self.subchain_list(),
            "subchain_getInfo" => self.subchain_get_info(params),
            "subchain_getBalance" => self.subchain_get_balance(params),
            "mining_getBlockTemplate" => self.mining_get_block_template(),
            "mining_submitBlock" => self.mining_submit_block(params),
            other if other.starts_with("wallet_") => Err(RpcError::domain(format!(
                "{other} is proxied to an external keystore collaborator, not implemented by the core"
            ))),
            other => Err(RpcError::not_found(other)),
        }
    }

    fn chain_get_info(&self) -> RpcResult {
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        Ok(json!({
            "height": chain.height(),
            "tipHash": chain.tip_hash().to_string(),
            "totalSupply": chain.total_supply(),
        }))
    }

    fn chain_get_block_by_height(&self, params: &Value) -> RpcResult {
        let height = require_u64(params, "height")?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let block = chain
            .block_at_height(height)
            .ok_or_else(|| RpcError::domain(format!("no block at height {height}")))?;
        Ok(serde_json::to_value(block).expect("block serializes"))
    }

    fn chain_get_block_by_hash(&self, params: &Value) -> RpcResult {
        let hash = require_hash(params, "hash")?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let block = chain
            .get_block(&hash)
            .ok_or_else(|| RpcError::domain(format!("unknown block {hash}")))?;
        Ok(serde_json::to_value(block).expect("block serializes"))
    }

    fn chain_get_transaction(&self, params: &Value) -> RpcResult {
        let txid = require_hash(params, "txid")?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        for hash in chain.main_chain_hashes() {
            if let Some(block) = chain.get_block(&hash) {
                if let Some(tx) = block.transactions.iter().find(|tx| tx.hash() == txid) {
                    return Ok(serde_json::to_value(tx).expect("transaction serializes"));
                }
            }
        }
        Err(RpcError::domain(format!("unknown transaction {txid}")))
    }

    fn utxo_get_balance(&self, params: &Value) -> RpcResult {
        let address = require_address(params, self.runtime.bech32_hrp)?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let balance = chain
            .utxo_set()
            .balance(address.as_bytes(), chain.height(), self.runtime.params.coinbase_maturity);
        Ok(serde_json::to_value(balance).expect("balance serializes"))
    }

    fn utxo_get_by_address(&self, params: &Value) -> RpcResult {
        let address = require_address(params, self.runtime.bech32_hrp)?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let utxos: Vec<_> = chain.utxo_set().by_address(address.as_bytes()).cloned().collect();
        Ok(serde_json::to_value(utxos).expect("utxos serialize"))
    }

    fn mempool_get_info(&self) -> RpcResult {
        let mempool = self.runtime.mempool.lock().expect("mempool lock poisoned");
        let stats = mempool.stats();
        Ok(json!({"count": stats.count, "totalFees": stats.total_fees}))
    }

    fn mempool_get_content(&self) -> RpcResult {
        let mempool = self.runtime.mempool.lock().expect("mempool lock poisoned");
        let txs = mempool.select(self.runtime.params.max_block_signing_bytes);
        Ok(serde_json::to_value(txs).expect("transactions serialize"))
    }

    fn net_get_node_info(&self) -> RpcResult {
        Ok(json!({
            "peerId": self.runtime.local_peer_id.to_string(),
            "genesisHash": self.runtime.genesis_hash.to_string(),
            "protocolVersion": self.runtime.params.min_protocol_version,
        }))
    }

    fn net_get_peer_info(&self) -> RpcResult {
        let peers = self.runtime.peers.known_peers();
        Ok(Value::Array(
            peers
                .into_iter()
                .map(|p| json!({"peerId": p.id, "addrs": p.addrs, "lastSeen": p.last_seen, "source": p.source}))
                .collect(),
        ))
    }

    fn stake_get_validators(&self) -> RpcResult {
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let validators = self.runtime.validator_set.current_validators(chain.utxo_set());
        Ok(json!(validators.iter().map(hex::encode).collect::<Vec<_>>()))
    }

    fn stake_get_info(&self, params: &Value) -> RpcResult {
        let pubkey = require_pubkey32(params, "pubkey")?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let tracker = self.runtime.validator_tracker.lock().expect("tracker lock poisoned");
        Ok(json!({
            "isValidator": self.runtime.validator_set.is_eligible(&pubkey, chain.utxo_set()),
            "isGenesisValidator": self.runtime.validator_set.is_genesis(&pubkey),
            "lastSeen": tracker.last_seen(&pubkey),
        }))
    }

    fn token_list(&self) -> RpcResult {
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let mut token_ids = std::collections::BTreeSet::new();
        for hash in chain.main_chain_hashes() {
            if let Some(block) = chain.get_block(&hash) {
                for tx in &block.transactions {
                    for output in &tx.outputs {
                        if let Some(token) = output.token {
                            token_ids.insert(token.token_id);
                        }
                    }
                }
            }
        }
        Ok(json!(token_ids.into_iter().collect::<Vec<_>>()))
    }

    fn token_get_info(&self, params: &Value) -> RpcResult {
        let token_id = require_u64(params, "tokenId")?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let mut total_supply = 0u64;
        for hash in chain.main_chain_hashes() {
            if let Some(block) = chain.get_block(&hash) {
                for tx in &block.transactions {
                    for output in &tx.outputs {
                        if let Some(token) = output.token {
                            if token.token_id == token_id {
                                total_supply += token.amount;
                            }
                        }
                    }
                }
            }
        }
        Ok(json!({"tokenId": token_id, "totalMinted": total_supply}))
    }

    fn token_get_balance(&self, params: &Value) -> RpcResult {
        let address = require_address(params, self.runtime.bech32_hrp)?;
        let token_id = require_u64(params, "tokenId")?;
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let balance: u64 = chain
            .utxo_set()
            .by_address(address.as_bytes())
            .filter_map(|u| u.token)
            .filter(|t| t.token_id == token_id)
            .map(|t| t.amount)
            .sum();
        Ok(json!({"tokenId": token_id, "balance": balance}))
    }

    fn subchain_list(&self) -> RpcResult {
        let manager = self.runtime.sub_chains.lock().expect("sub-chain manager lock poisoned");
        let ids: Vec<String> = manager.list().iter().map(std::string::ToString::to_string).collect();
        Ok(json!(ids))
    }

    fn subchain_get_info(&self, params: &Value) -> RpcResult {
        let id = require_hash(params, "chainId")?;
        let manager = self.runtime.sub_chains.lock().expect("sub-chain manager lock poisoned");
        let handle = manager.get(&id).ok_or_else(|| RpcError::domain(format!("unknown sub-chain {id}")))?;
        let chain = handle.chain.lock().expect("sub-chain chain lock poisoned");
        Ok(json!({
            "id": handle.record.id.to_string(),
            "parentId": handle.record.parent_id.to_string(),
            "name": handle.record.name,
            "symbol": handle.record.symbol,
            "height": chain.height(),
            "tipHash": chain.tip_hash().to_string(),
        }))
    }

    fn subchain_get_balance(&self, params: &Value) -> RpcResult {
        let id = require_hash(params, "chainId")?;
        let address = require_address(params, self.runtime.bech32_hrp)?;
        let manager = self.runtime.sub_chains.lock().expect("sub-chain manager lock poisoned");
        let handle = manager.get(&id).ok_or_else(|| RpcError::domain(format!("unknown sub-chain {id}")))?;
        let chain = handle.chain.lock().expect("sub-chain chain lock poisoned");
        let balance = chain
            .utxo_set()
            .balance(address.as_bytes(), chain.height(), self.runtime.params.coinbase_maturity);
        Ok(serde_json::to_value(balance).expect("balance serializes"))
    }

    fn mining_get_block_template(&self) -> RpcResult {
        let chain = self.runtime.chain.lock().expect("chain lock poisoned");
        let mempool = self.runtime.mempool.lock().expect("mempool lock poisoned");
        let txs = mempool.select(self.runtime.params.max_block_signing_bytes);
        Ok(json!({
            "height": chain.height() + 1,
            "previousHash": chain.tip_hash().to_string(),
            "reward": chain.block_reward(chain.height() + 1),
            "transactions": txs,
        }))
    }

    fn mining_submit_block(&self, params: &Value) -> RpcResult {
        let block_value = params
            .get("block")
            .ok_or_else(|| RpcError::domain("missing `block` param"))?;
        let block: bond_core::block::Block =
            serde_json::from_value(block_value.clone()).map_err(|e| RpcError::domain(e.to_string()))?;
        let outcome = self.runtime.submit_block(block).map_err(|e| RpcError::domain(e.to_string()))?;
        Ok(json!({"outcome": format!("{outcome:?}")}))
    }
}

fn require_u64(params: &Value, field: &str) -> Result<u64, RpcError> {
    params
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::domain(format!("missing or invalid `{field}`")))
}

fn require_hash(params: &Value, field: &str) -> Result<shared::Hash256, RpcError> {
    let text = params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::domain(format!("missing `{field}`")))?;
    shared::Hash256::try_from(text).map_err(|e| RpcError::domain(e.to_string()))
}

fn require_address(params: &Value, hrp: &'static str) -> Result<shared::Address, RpcError> {
    let text = params
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::domain("missing `address`"))?;
    shared::Address::parse(text, hrp).map_err(|e| RpcError::domain(e.to_string()))
}

fn require_pubkey32(params: &Value, field: &str) -> Result<[u8; 32], RpcError> {
    let text = params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::domain(format!("missing `{field}`")))?;
    let bytes = hex::decode(text).map_err(|e| RpcError::domain(e.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| RpcError::domain(format!("`{field}` must be 32 bytes")))
}
