//! Mining job generation and share digests

use crate::cost::CostFn;
use crate::types::Difficulty;
use chrono::Utc;
use serde_json::Value;

// Placeholder coinbase halves and version; there is no transaction
// serialization at the job layer, the chain head alone defines the work.
const COINBASE1: &str =
    "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff";
const COINBASE2: &str = "ffffffff01";
const VERSION: &str = "00000002";

/// Work handed to subscribed miners
#[derive(Debug, Clone)]
pub struct MiningJob {
    /// Job ID, hex of a server-local counter
    pub id: String,
    /// Chain head hash the job extends
    pub previous_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branch: Vec<String>,
    pub version: String,
    /// Encoded chain difficulty
    pub nbits: String,
    /// Encoded creation time, unix seconds
    pub ntime: String,
}

impl MiningJob {
    /// Create a job extending `head_hash` at the given chain difficulty
    pub fn new(counter: u64, head_hash: &str, difficulty: Difficulty) -> Self {
        Self {
            id: format!("{counter:x}"),
            previous_hash: head_hash.to_string(),
            coinbase1: COINBASE1.to_string(),
            coinbase2: COINBASE2.to_string(),
            merkle_branch: Vec::new(),
            version: VERSION.to_string(),
            nbits: difficulty.to_nbits(),
            ntime: format!("{:08x}", Utc::now().timestamp()),
        }
    }

    /// Parameters for a `mining.notify` push
    pub fn to_notify_params(&self, clean_jobs: bool) -> Vec<Value> {
        vec![
            Value::String(self.id.clone()),
            Value::String(self.previous_hash.clone()),
            Value::String(self.coinbase1.clone()),
            Value::String(self.coinbase2.clone()),
            Value::Array(
                self.merkle_branch
                    .iter()
                    .map(|s| Value::String(s.clone()))
                    .collect(),
            ),
            Value::String(self.version.clone()),
            Value::String(self.nbits.clone()),
            Value::String(self.ntime.clone()),
            Value::Bool(clean_jobs),
        ]
    }

    /// Digest a submitted share candidate.
    ///
    /// Hashes the job identity together with the session's extranonce pair
    /// and the submitted time/nonce through the same cost function the
    /// ledger seals blocks with, so session-target and chain-target checks
    /// agree.
    pub fn share_digest(
        &self,
        cost: &CostFn,
        extranonce1: &str,
        extranonce2: &str,
        ntime: &str,
        nonce: &str,
    ) -> String {
        let preimage = format!(
            "{}{}{}{}{}{}",
            self.id, self.previous_hash, extranonce1, extranonce2, ntime, nonce
        );
        cost.hash(preimage.as_bytes())
    }
}
