//! Joulecoin
//!
//! A proof-of-work transaction ledger paired with a Stratum-style mining job
//! server:
//! - Hash-linked chain with difficulty retargeting and a halving reward
//!   schedule modulated by an energy-efficiency factor
//! - Memory-hard (scrypt) block hashing with a pluggable simulated cost meter
//! - Concurrent newline-delimited JSON-RPC server pushing jobs and difficulty
//!   updates to subscribed miners

pub mod config;
pub mod cost;
pub mod error;
pub mod ledger;
pub mod stratum;
pub mod types;

pub use config::Config;
pub use cost::{CostFn, CostParams};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use types::Difficulty;

/// Application information
pub const APP_NAME: &str = "joulecoin";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
