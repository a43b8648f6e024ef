//! Configuration management for the joulecoin node
//!
//! Command line arguments merged with an optional configuration file
//! (YAML or JSON), with validation and typed accessors.

use crate::cost::{CostParams, DIGEST_LEN};
use crate::error::{Error, Result};
use crate::ledger::LedgerParams;
use crate::stratum::StratumConfig;
use crate::types::Difficulty;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Complete configuration for the node
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "joulecoin",
    version = env!("CARGO_PKG_VERSION"),
    about = "Joulecoin node",
    long_about = "A proof-of-work ledger node serving mining jobs to Stratum clients"
)]
pub struct Config {
    /// Print the effective configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Interface the Stratum server binds
    #[arg(long, default_value = "0.0.0.0")]
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the Stratum server binds
    #[arg(short = 'p', long, default_value = "3333")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address credited with mining rewards
    #[arg(short = 'a', long)]
    pub reward_address: Option<String>,

    /// Maximum concurrent miner connections
    #[arg(long, default_value = "1024")]
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Difficulty/head reconciliation interval in seconds
    #[arg(long, default_value = "10")]
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Inactive-session sweep interval in seconds
    #[arg(long, default_value = "60")]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Seconds of inactivity before a session is disconnected
    #[arg(long, default_value = "600")]
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: u64,

    /// Initial chain difficulty (leading zero hex characters)
    #[arg(long, default_value = "4")]
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u32,

    /// log2 of the scrypt CPU/memory cost factor N
    #[arg(long, default_value = "14")]
    #[serde(default = "default_cost_log_n")]
    pub cost_log_n: u8,

    /// scrypt block size factor
    #[arg(long, default_value = "8")]
    #[serde(default = "default_cost_r")]
    pub cost_r: u32,

    /// scrypt parallelization factor
    #[arg(long, default_value = "1")]
    #[serde(default = "default_cost_p")]
    pub cost_p: u32,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl Config {
    /// Load configuration from CLI arguments and an optional file
    pub async fn load() -> Result<Self> {
        let mut config = Self::parse();

        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config (CLI takes precedence)
    fn merge_with_file(mut self, file_config: Self) -> Self {
        if self.reward_address.is_none() {
            self.reward_address = file_config.reward_address;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.parse::<IpAddr>().is_err() {
            return Err(Error::config(format!(
                "Invalid interface address: {}",
                self.host
            )));
        }
        if self.initial_difficulty == 0 {
            return Err(Error::config("Initial difficulty must be at least 1"));
        }
        if self.inactivity_timeout == 0 {
            return Err(Error::config("Inactivity timeout must be greater than 0"));
        }
        self.cost_params().validate()?;
        Ok(())
    }

    /// Cost-function factors
    pub fn cost_params(&self) -> CostParams {
        CostParams {
            log_n: self.cost_log_n,
            r: self.cost_r,
            p: self.cost_p,
            dk_len: DIGEST_LEN,
        }
    }

    /// Ledger construction parameters
    pub fn ledger_params(&self) -> LedgerParams {
        LedgerParams {
            initial_difficulty: Difficulty::new(self.initial_difficulty),
            ..LedgerParams::default()
        }
    }

    /// Stratum server configuration; requires a reward address
    pub fn stratum_config(&self) -> Result<StratumConfig> {
        let reward_address = self.reward_address.clone().ok_or_else(|| {
            Error::config("Reward address is required for serving. Use --reward-address")
        })?;
        Ok(StratumConfig {
            host: self.host.clone(),
            port: self.port,
            reward_address,
            max_connections: self.max_connections,
            refresh_interval: Duration::from_secs(self.refresh_interval),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            inactivity_timeout: Duration::from_secs(self.inactivity_timeout),
        })
    }
}

// Default value functions for serde
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3333
}
fn default_max_connections() -> usize {
    1024
}
fn default_refresh_interval() -> u64 {
    10
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_inactivity_timeout() -> u64 {
    600
}
fn default_initial_difficulty() -> u32 {
    4
}
fn default_cost_log_n() -> u8 {
    14
}
fn default_cost_r() -> u32 {
    8
}
fn default_cost_p() -> u32 {
    1
}
fn default_log_level() -> LogLevel {
    LogLevel::Info
}
