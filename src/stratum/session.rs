//! Per-connection mining session state

use crate::types::Difficulty;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Number of bytes of extranonce the client contributes
pub const EXTRANONCE2_SIZE: usize = 4;

/// Session ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the pool-assigned extranonce1 prefix from a session id
pub fn derive_extranonce1(id: &SessionId) -> String {
    let digest = Sha256::digest(id.to_string());
    hex::encode(digest)[..8].to_string()
}

/// State of one connected mining client
pub struct Session {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub subscribed: bool,
    pub authorized: bool,
    pub worker_name: Option<String>,
    /// Per-session share target
    pub difficulty: Difficulty,
    pub shares_submitted: u64,
    pub shares_valid: u64,
    pub last_activity: Instant,
    /// Pool-assigned extranonce prefix, fixed for the session's lifetime
    pub extranonce1: String,
    /// Cancelled by the liveness sweep to force a disconnect
    pub disconnect: CancellationToken,
}

impl Session {
    /// Create a new session for a freshly accepted connection
    pub fn new(peer: SocketAddr, difficulty: Difficulty) -> Self {
        let id = SessionId::new();
        let extranonce1 = derive_extranonce1(&id);
        Self {
            id,
            peer,
            subscribed: false,
            authorized: false,
            worker_name: None,
            difficulty,
            shares_submitted: 0,
            shares_valid: 0,
            last_activity: Instant::now(),
            extranonce1,
            disconnect: CancellationToken::new(),
        }
    }

    /// Record activity on the connection
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// How long the session has been idle
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
