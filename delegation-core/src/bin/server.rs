//! Delegation ledger binary
//!
//! Opens the ledger from `DELEGATION_*` environment variables (or a TOML
//! file given as the first argument) and runs until interrupted. Operators
//! are registered by the embedding chain; this binary starts with none.

use anyhow::Context as _;
use delegation_core::{operators::OperatorSet, telemetry, Config, HookSet, Ledger};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    telemetry::init_tracing(&config.logging)?;
    tracing::info!(service = %config.service_name, "Starting delegation ledger");

    let export_path = config.genesis.export_path.clone();
    let operators = Arc::new(OperatorSet::new());
    let ledger = Ledger::open(config, operators, HookSet::new())
        .await
        .context("opening ledger")?;

    let height = ledger.current_height().await?;
    tracing::info!(height, "Ledger opened successfully");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down delegation ledger");

    if let Some(path) = export_path {
        ledger
            .export_genesis_to(&path)
            .await
            .with_context(|| format!("exporting genesis to {}", path.display()))?;
    }

    ledger.shutdown().await?;
    Ok(())
}
