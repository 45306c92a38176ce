//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `delegation_delegations_total` - Successful DelegateTo calls
//! - `delegation_undelegations_total` - Successful UndelegateFrom calls
//! - `delegation_undelegations_completed_total` - Records paid out by the sweep
//! - `delegation_undelegations_deferred_total` - Records pushed back by a hold
//! - `delegation_slashes_total` - Negative native restaking balance updates
//! - `delegation_slash_shortfall_total` - Slashes that exhausted every tier
//! - `delegation_hook_failures_total` - Observer failures
//! - `delegation_block_height` - Last swept height

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Successful delegations
    pub delegations_total: IntCounter,

    /// Successful undelegations
    pub undelegations_total: IntCounter,

    /// Completed undelegations
    pub completed_total: IntCounter,

    /// Deferred undelegations
    pub deferred_total: IntCounter,

    /// Slash events
    pub slashes_total: IntCounter,

    /// Slash events with uncovered remainder
    pub slash_shortfall_total: IntCounter,

    /// Hook failures
    pub hook_failures_total: IntCounter,

    /// Last swept height
    pub block_height: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let delegations_total = counter(
            &registry,
            "delegation_delegations_total",
            "Successful DelegateTo calls",
        )?;
        let undelegations_total = counter(
            &registry,
            "delegation_undelegations_total",
            "Successful UndelegateFrom calls",
        )?;
        let completed_total = counter(
            &registry,
            "delegation_undelegations_completed_total",
            "Undelegations completed by the maturity sweep",
        )?;
        let deferred_total = counter(
            &registry,
            "delegation_undelegations_deferred_total",
            "Undelegations deferred by a hold",
        )?;
        let slashes_total = counter(
            &registry,
            "delegation_slashes_total",
            "Negative native restaking balance updates",
        )?;
        let slash_shortfall_total = counter(
            &registry,
            "delegation_slash_shortfall_total",
            "Slashes larger than the staker's recorded stake",
        )?;
        let hook_failures_total = counter(
            &registry,
            "delegation_hook_failures_total",
            "Failed notification hooks",
        )?;

        let block_height = IntGauge::with_opts(Opts::new(
            "delegation_block_height",
            "Last height swept for matured undelegations",
        ))?;
        registry.register(Box::new(block_height.clone()))?;

        Ok(Self {
            delegations_total,
            undelegations_total,
            completed_total,
            deferred_total,
            slashes_total,
            slash_shortfall_total,
            hook_failures_total,
            block_height,
            registry,
        })
    }

    /// Record a maturity sweep
    pub fn record_sweep(&self, height: u64, completed: usize, deferred: usize) {
        self.completed_total.inc_by(completed as u64);
        self.deferred_total.inc_by(deferred as u64);
        self.block_height.set(height as i64);
    }

    /// Record hook failures
    pub fn record_hook_failures(&self, failures: usize) {
        self.hook_failures_total.inc_by(failures as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric names are static and unique")
    }
}
