//! Transactions and blocks
//!
//! A transaction is immutable once created; its identifier is derived from
//! its own content. A block is mutable only while the proof-of-work search
//! runs; once appended to the chain any later mutation shows up as a
//! validation failure.

use crate::cost::CostFn;
use crate::types::Difficulty;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Sender sentinel marking a system-originated (coinbase) credit
pub const SYSTEM_SENDER: &str = "0";

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// A value transfer awaiting or holding a place in a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Content-derived identifier
    pub hash: String,
}

impl Transaction {
    /// Create a transaction stamped with the current time
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: f64,
        data: Option<Value>,
    ) -> Self {
        let sender = sender.into();
        let recipient = recipient.into();
        let timestamp_ms = Utc::now().timestamp_millis();
        let hash = Self::content_hash(&sender, &recipient, amount, timestamp_ms);
        Self {
            sender,
            recipient,
            amount,
            timestamp_ms,
            data,
            hash,
        }
    }

    /// Create the mining-reward transaction credited to `miner`
    pub fn reward(miner: &str, amount: f64) -> Self {
        Self::new(
            SYSTEM_SENDER,
            miner,
            amount,
            Some(json!({ "type": "mining_reward" })),
        )
    }

    /// Whether this is a system-originated reward credit
    pub fn is_reward(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    fn content_hash(sender: &str, recipient: &str, amount: f64, timestamp_ms: i64) -> String {
        let digest = Sha256::digest(format!("{sender}{recipient}{amount}{timestamp_ms}"));
        hex::encode(digest)
    }
}

/// One sealed (or being-sealed) unit of the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp_ms: i64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub nonce: u64,
    pub difficulty: Difficulty,
    pub hash: String,
    /// Work-cost accounted to sealing this block
    pub cost: f64,
}

impl Block {
    /// Create a block over `transactions` with the nonce at zero
    pub fn new(
        index: u64,
        timestamp_ms: i64,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
        difficulty: Difficulty,
        cost_fn: &CostFn,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp_ms,
            transactions,
            previous_hash: previous_hash.into(),
            nonce: 0,
            difficulty,
            hash: String::new(),
            cost: 0.0,
        };
        block.hash = block.compute_hash(cost_fn);
        block
    }

    /// Recompute this block's digest from its current field values.
    ///
    /// The header serialization uses sorted object keys, so the digest is a
    /// deterministic function of the fields alone.
    pub fn compute_hash(&self, cost_fn: &CostFn) -> String {
        let header = json!({
            "index": self.index,
            "timestamp_ms": self.timestamp_ms,
            "transactions": self.transactions,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
            "difficulty": self.difficulty,
        });
        cost_fn.hash(header.to_string().as_bytes())
    }
}
