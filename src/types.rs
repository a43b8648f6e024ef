//! Core types shared by the ledger and the Stratum server

use serde::{Deserialize, Serialize};
use std::fmt;

/// Proof-of-work difficulty: the number of leading zero hex characters a
/// sealed block's digest must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Difficulty(u32);

impl Difficulty {
    /// The retarget floor. Difficulty never drops below one leading zero.
    pub const MIN: Difficulty = Difficulty(1);

    /// Create a new difficulty, clamped to the floor
    pub fn new(value: u32) -> Self {
        Self(value.max(1))
    }

    /// The required leading-zero count
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Check whether a hex digest satisfies this difficulty
    pub fn is_met_by(&self, digest_hex: &str) -> bool {
        let n = self.0 as usize;
        digest_hex.len() >= n && digest_hex.bytes().take(n).all(|b| b == b'0')
    }

    /// Encode as the 8-character nbits field of a mining job
    pub fn to_nbits(&self) -> String {
        format!("{:08x}", self.0)
    }

    /// One step harder
    pub fn raise(&self) -> Self {
        Self(self.0 + 1)
    }

    /// One step easier, floored at [`Difficulty::MIN`]
    pub fn lower(&self) -> Self {
        Self(self.0.saturating_sub(1).max(1))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
