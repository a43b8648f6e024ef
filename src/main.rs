//! Joulecoin node - main application
//!
//! Composition root: builds the cost function, the ledger, and the Stratum
//! server from configuration and runs until interrupted.

use joulecoin::{config::Config, cost::CostFn, ledger::Ledger, stratum::StratumServer};
use joulecoin::{Result, APP_NAME, APP_VERSION};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().await?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(tracing::Level::from(config.log_level).to_string())
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    if config.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let stratum_config = config.stratum_config()?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: listen={}:{}, difficulty={}, cost N=2^{}",
        config.host, config.port, config.initial_difficulty, config.cost_log_n
    );

    let cost = Arc::new(CostFn::simulated(config.cost_params())?);
    let ledger = Arc::new(Mutex::new(Ledger::with_params(
        cost,
        config.ledger_params(),
    )));

    let server = StratumServer::bind(stratum_config, ledger).await?;
    server.run().await
}
