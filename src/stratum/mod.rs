//! Stratum-style mining job coordination
//!
//! Protocol messages, per-connection sessions, job generation, and the
//! concurrent server tying them to the ledger.

pub mod job;
pub mod protocol;
pub mod server;
pub mod session;

pub use job::MiningJob;
pub use protocol::{
    StratumErrorCode, StratumMessage, StratumMethod, StratumNotification, StratumRequest,
    StratumResponse,
};
pub use server::{StratumConfig, StratumServer};
pub use session::{Session, SessionId, EXTRANONCE2_SIZE};
