//! Memory-hard cost function for block hashing
//!
//! Block and share digests go through scrypt, whose memory/CPU cost factors
//! make specialized-hardware shortcuts unattractive. Hashing is a pure
//! function of the input bytes: the salt is a fixed domain-separation
//! constant, so a digest can always be recomputed for validation.
//!
//! Every hash also charges a process-wide cost accumulator through a
//! [`CostMeter`]. The default meter simulates energy draw from elapsed wall
//! time and sampled CPU utilization with bounded jitter; tests swap in a
//! deterministic meter without touching any caller.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use scrypt::Params;
use serde::Serialize;
use std::time::{Duration, Instant};
use sysinfo::System;

/// Digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Fixed salt keying every digest. Hashing must stay deterministic so the
/// chain can be revalidated by recomputation.
const DOMAIN_SALT: &[u8] = b"joulecoin/header/v1";

/// Base cost units charged per hash before CPU and time scaling
const COST_BASELINE: f64 = 0.1;
/// Bounded random variance applied to the baseline
const COST_JITTER: f64 = 0.05;

/// Cost factors for the scrypt hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostParams {
    /// log2 of the CPU/memory cost factor N
    pub log_n: u8,
    /// Block size factor
    pub r: u32,
    /// Parallelization factor
    pub p: u32,
    /// Digest length in bytes
    pub dk_len: usize,
}

impl CostParams {
    /// Production parameters: N=16384, r=8, p=1
    pub const fn production() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
            dk_len: DIGEST_LEN,
        }
    }

    /// Cheap parameters for tests: N=16, r=1, p=1
    pub const fn light() -> Self {
        Self {
            log_n: 4,
            r: 1,
            p: 1,
            dk_len: DIGEST_LEN,
        }
    }

    /// Check the factors against scrypt's constraints
    pub fn validate(&self) -> Result<()> {
        self.to_scrypt().map(|_| ())
    }

    fn to_scrypt(self) -> Result<Params> {
        Params::new(self.log_n, self.r, self.p, self.dk_len)
            .map_err(|e| Error::crypto(format!("Invalid cost parameters: {e}")))
    }
}

impl Default for CostParams {
    fn default() -> Self {
        Self::production()
    }
}

/// Pluggable estimator for the cost charged per hash.
///
/// The production meter samples the host; tests use [`FixedCostMeter`] so
/// block costs are reproducible.
pub trait CostMeter: Send + Sync {
    /// Estimate the cost of one hash that took `elapsed` wall time
    fn measure(&self, elapsed: Duration) -> f64;
}

/// Simulated cost model: baseline units with bounded jitter, scaled by the
/// instantaneous CPU utilization and the elapsed wall time.
pub struct SimulatedCostMeter {
    system: Mutex<System>,
}

impl SimulatedCostMeter {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SimulatedCostMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl CostMeter for SimulatedCostMeter {
    fn measure(&self, elapsed: Duration) -> f64 {
        let cpu = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.global_cpu_usage() as f64
        };
        let base = COST_BASELINE + rand::rng().random_range(-COST_JITTER..=COST_JITTER);
        base * (1.0 + cpu / 100.0) * elapsed.as_secs_f64()
    }
}

/// Deterministic meter charging a constant amount per hash
pub struct FixedCostMeter(pub f64);

impl CostMeter for FixedCostMeter {
    fn measure(&self, _elapsed: Duration) -> f64 {
        self.0
    }
}

/// The keyed, deliberately expensive hash primitive
pub struct CostFn {
    params: CostParams,
    scrypt_params: Params,
    meter: Box<dyn CostMeter>,
    total: Mutex<f64>,
}

impl CostFn {
    /// Create a cost function with an explicit meter
    pub fn new(params: CostParams, meter: Box<dyn CostMeter>) -> Result<Self> {
        Ok(Self {
            scrypt_params: params.to_scrypt()?,
            params,
            meter,
            total: Mutex::new(0.0),
        })
    }

    /// Create a cost function with the simulated host meter
    pub fn simulated(params: CostParams) -> Result<Self> {
        Self::new(params, Box::new(SimulatedCostMeter::new()))
    }

    /// Hash `data` and return the hex digest, charging the cost accumulator
    pub fn hash(&self, data: &[u8]) -> String {
        let start = Instant::now();
        let mut digest = [0u8; DIGEST_LEN];
        scrypt::scrypt(data, DOMAIN_SALT, &self.scrypt_params, &mut digest)
            .expect("digest length is validated at construction");
        let cost = self.meter.measure(start.elapsed());
        *self.total.lock() += cost;
        hex::encode(digest)
    }

    /// Cumulative cost charged since construction or the last reset
    pub fn total_cost(&self) -> f64 {
        *self.total.lock()
    }

    /// Reset the cost accumulator
    pub fn reset_cost(&self) {
        *self.total.lock() = 0.0;
    }

    /// The configured cost factors
    pub fn params(&self) -> CostParams {
        self.params
    }
}
