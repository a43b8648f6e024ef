//! The hash-linked transaction ledger
//!
//! Owns the chain, the pending-transaction pool, and the economic state.
//! All mutation goes through `&mut self`; callers that share a ledger across
//! tasks wrap it in a mutex so mining and transaction submission never
//! interleave.

pub mod block;

pub use block::{Block, Transaction, GENESIS_PREVIOUS_HASH, SYSTEM_SENDER};

use crate::cost::CostFn;
use crate::error::{Error, Result};
use crate::types::Difficulty;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const COIN_NAME: &str = "Joulecoin";
pub const COIN_SYMBOL: &str = "JLC";

/// Target seconds between blocks the retargeting aims for
const TARGET_BLOCK_TIME_SECS: f64 = 60.0;
/// Blocks per difficulty retarget
const RETARGET_WINDOW: usize = 10;
/// Blocks the efficiency factor averages over
const EFFICIENCY_WINDOW: usize = 5;
/// Reference work-cost per transaction the efficiency factor compares against
const BASELINE_COST_PER_TX: f64 = 100.0;
/// Bounds on the efficiency factor
const EFFICIENCY_FLOOR: f64 = 0.5;
const EFFICIENCY_CEIL: f64 = 2.0;

/// Construction parameters for a ledger
#[derive(Debug, Clone)]
pub struct LedgerParams {
    pub initial_difficulty: Difficulty,
    pub block_reward: f64,
    pub max_supply: f64,
    pub halving_interval: u64,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            initial_difficulty: Difficulty::new(4),
            block_reward: 10.0,
            max_supply: 30_000_000.0,
            halving_interval: 210_000,
        }
    }
}

/// Emission-schedule state
#[derive(Debug, Clone, Serialize)]
pub struct EconomicState {
    pub current_supply: f64,
    pub max_supply: f64,
    pub halving_interval: u64,
    /// Derived smoothing factor; recomputed after each seal, never set directly
    pub efficiency_factor: f64,
}

/// Where a transaction was found by [`Ledger::get_transaction_by_hash`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxLookup {
    /// Still in the pending pool
    Pending { transaction: Transaction },
    /// Sealed into a block
    Mined {
        transaction: Transaction,
        block_index: u64,
        block_hash: String,
    },
}

/// Aggregate chain statistics for reporting
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub blocks: u64,
    pub transactions: u64,
    pub difficulty: Difficulty,
    pub avg_block_time_secs: f64,
    pub cost_per_transaction: f64,
    pub efficiency_factor: f64,
    pub coin_name: &'static str,
    pub coin_symbol: &'static str,
    pub current_supply: f64,
    pub max_supply: f64,
    pub supply_percentage: f64,
    pub next_reward: f64,
}

/// The chain, its pending pool, and the emission schedule
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    difficulty: Difficulty,
    block_reward: f64,
    economy: EconomicState,
    cost: Arc<CostFn>,
}

impl Ledger {
    /// Create a ledger with the default economics and a fresh genesis block
    pub fn new(cost: Arc<CostFn>) -> Self {
        Self::with_params(cost, LedgerParams::default())
    }

    /// Create a ledger with explicit economics
    pub fn with_params(cost: Arc<CostFn>, params: LedgerParams) -> Self {
        let genesis = Block::new(
            0,
            Utc::now().timestamp_millis(),
            Vec::new(),
            GENESIS_PREVIOUS_HASH,
            params.initial_difficulty,
            &cost,
        );
        Self {
            chain: vec![genesis],
            pending: Vec::new(),
            difficulty: params.initial_difficulty,
            block_reward: params.block_reward,
            economy: EconomicState {
                current_supply: 0.0,
                max_supply: params.max_supply,
                halving_interval: params.halving_interval,
                efficiency_factor: 1.0,
            },
            cost,
        }
    }

    /// The most recent block
    pub fn head(&self) -> &Block {
        self.chain.last().expect("chain is never empty")
    }

    /// Number of blocks including genesis
    pub fn chain_length(&self) -> u64 {
        self.chain.len() as u64
    }

    /// Current proof-of-work target
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    /// Current emission-schedule state
    pub fn economy(&self) -> &EconomicState {
        &self.economy
    }

    /// The cost function blocks are hashed with
    pub fn cost_fn(&self) -> &Arc<CostFn> {
        &self.cost
    }

    /// Unconfirmed transactions awaiting inclusion
    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending
    }

    /// Append a transaction to the pending pool and return the index of the
    /// block it is expected to land in.
    pub fn add_transaction(
        &mut self,
        sender: &str,
        recipient: &str,
        amount: f64,
        data: Option<Value>,
    ) -> Result<u64> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::ledger(format!(
                "Transaction amount must be a non-negative number, got {amount}"
            )));
        }
        let tx = Transaction::new(sender, recipient, amount, data);
        debug!(hash = %tx.hash, "queued transaction {} -> {}", tx.sender, tx.recipient);
        self.pending.push(tx);
        Ok(self.chain_length())
    }

    /// Seal the pending pool plus a reward transaction into a new block.
    ///
    /// Runs the proof-of-work search until the block digest carries
    /// `difficulty` leading zero hex characters, checking `cancel` once per
    /// nonce iteration. Unbounded in duration. On success the reward is
    /// committed, the pool cleared, and retargeting applied; on cancellation
    /// no state is mutated.
    pub fn mine_pending_transactions(
        &mut self,
        miner_address: &str,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        let reward = self.preview_reward();
        let mut transactions = self.pending.clone();
        transactions.push(Transaction::reward(miner_address, reward));

        let cost_before = self.cost.total_cost();
        let mut block = Block::new(
            self.chain.len() as u64,
            Utc::now().timestamp_millis(),
            transactions,
            self.head().hash.clone(),
            self.difficulty,
            &self.cost,
        );
        self.proof_of_work(&mut block, cancel)?;
        block.cost = self.cost.total_cost() - cost_before;

        info!(
            index = block.index,
            nonce = block.nonce,
            difficulty = %block.difficulty,
            "sealed block {}",
            block.hash
        );

        self.commit_reward(reward);
        self.chain.push(block.clone());
        self.pending.clear();

        if self.sealed_blocks() % RETARGET_WINDOW as u64 == 0 {
            self.adjust_difficulty();
        }
        self.update_energy_efficiency();

        Ok(block)
    }

    /// What the next reward transaction would be worth. Pure: never credits
    /// supply, so reporting paths can call it freely.
    pub fn preview_reward(&self) -> f64 {
        let remaining = self.economy.max_supply - self.economy.current_supply;
        if remaining <= 0.0 {
            return 0.0;
        }
        let halvings = (self.chain_length() / self.economy.halving_interval) as i32;
        let base = self.block_reward / 2f64.powi(halvings);
        (base * self.economy.efficiency_factor).min(remaining)
    }

    /// Credit a sealed block's reward to the circulating supply. Only the
    /// sealing path calls this.
    fn commit_reward(&mut self, amount: f64) {
        self.economy.current_supply =
            (self.economy.current_supply + amount).min(self.economy.max_supply);
    }

    /// Recompute every block's digest and linkage; false on any mismatch
    pub fn is_chain_valid(&self) -> bool {
        for pair in self.chain.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if current.hash != current.compute_hash(&self.cost) {
                return false;
            }
            if current.previous_hash != previous.hash {
                return false;
            }
        }
        true
    }

    /// Block at `index`, if sealed
    pub fn get_block_by_index(&self, index: u64) -> Option<&Block> {
        self.chain.get(index as usize)
    }

    /// Block with the given digest, if sealed
    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.chain.iter().find(|b| b.hash == hash)
    }

    /// Locate a transaction in the chain or the pending pool
    pub fn get_transaction_by_hash(&self, hash: &str) -> Option<TxLookup> {
        for block in &self.chain {
            if let Some(tx) = block.transactions.iter().find(|t| t.hash == hash) {
                return Some(TxLookup::Mined {
                    transaction: tx.clone(),
                    block_index: block.index,
                    block_hash: block.hash.clone(),
                });
            }
        }
        self.pending
            .iter()
            .find(|t| t.hash == hash)
            .map(|tx| TxLookup::Pending {
                transaction: tx.clone(),
            })
    }

    /// The full chain, oldest first
    pub fn get_chain_data(&self) -> &[Block] {
        &self.chain
    }

    /// Aggregate statistics; the next-reward figure uses the pure preview
    pub fn get_chain_stats(&self) -> ChainStats {
        let total_transactions: u64 = self.chain.iter().map(|b| b.transactions.len() as u64).sum();
        let total_cost: f64 = self.chain.iter().map(|b| b.cost).sum();

        let gaps = (self.chain.len() - 1).min(RETARGET_WINDOW);
        let avg_block_time_secs = if gaps > 0 {
            let recent = &self.chain[self.chain.len() - (gaps + 1)..];
            let span_ms = recent[gaps].timestamp_ms - recent[0].timestamp_ms;
            span_ms as f64 / 1000.0 / gaps as f64
        } else {
            0.0
        };

        let cost_per_transaction = if total_transactions > 0 {
            total_cost / total_transactions as f64
        } else {
            0.0
        };

        let supply_percentage = if self.economy.max_supply > 0.0 {
            self.economy.current_supply / self.economy.max_supply * 100.0
        } else {
            0.0
        };

        ChainStats {
            blocks: self.chain_length(),
            transactions: total_transactions,
            difficulty: self.difficulty,
            avg_block_time_secs,
            cost_per_transaction,
            efficiency_factor: self.economy.efficiency_factor,
            coin_name: COIN_NAME,
            coin_symbol: COIN_SYMBOL,
            current_supply: self.economy.current_supply,
            max_supply: self.economy.max_supply,
            supply_percentage,
            next_reward: self.preview_reward(),
        }
    }

    fn sealed_blocks(&self) -> u64 {
        self.chain_length() - 1
    }

    /// Brute-force nonce search until the digest satisfies the block's target
    fn proof_of_work(&self, block: &mut Block, cancel: &CancellationToken) -> Result<()> {
        while !block.difficulty.is_met_by(&block.hash) {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("proof-of-work search"));
            }
            block.nonce += 1;
            block.hash = block.compute_hash(&self.cost);
        }
        Ok(())
    }

    /// Retarget against the average inter-block time of the last window
    fn adjust_difficulty(&mut self) {
        if self.chain.len() < RETARGET_WINDOW + 1 {
            return;
        }
        let window = &self.chain[self.chain.len() - RETARGET_WINDOW..];
        let span_ms = window[RETARGET_WINDOW - 1].timestamp_ms - window[0].timestamp_ms;
        let avg_secs = span_ms as f64 / 1000.0 / RETARGET_WINDOW as f64;

        if avg_secs < TARGET_BLOCK_TIME_SECS * 0.8 {
            self.difficulty = self.difficulty.raise();
            info!(avg_secs, "difficulty raised to {}", self.difficulty);
        } else if avg_secs > TARGET_BLOCK_TIME_SECS * 1.2 {
            self.difficulty = self.difficulty.lower();
            info!(avg_secs, "difficulty lowered to {}", self.difficulty);
        }
    }

    /// Refresh the efficiency factor from recent per-transaction work cost
    fn update_energy_efficiency(&mut self) {
        if self.chain.len() < EFFICIENCY_WINDOW {
            return;
        }
        let window = &self.chain[self.chain.len() - EFFICIENCY_WINDOW..];
        let total_cost: f64 = window.iter().map(|b| b.cost).sum();
        let total_txs: usize = window.iter().map(|b| b.transactions.len()).sum();
        if total_txs == 0 {
            return;
        }
        let avg_cost_per_tx = total_cost / total_txs as f64;
        if avg_cost_per_tx > 0.0 {
            self.economy.efficiency_factor =
                (BASELINE_COST_PER_TX / avg_cost_per_tx).clamp(EFFICIENCY_FLOOR, EFFICIENCY_CEIL);
        }
    }
}
