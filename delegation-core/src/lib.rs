//! Restaking Delegation Ledger
//!
//! Tracks how stakers' deposited assets are delegated to operators, converts
//! token amounts to pool shares, queues undelegations until they mature, and
//! absorbs slashes of natively restaked balances.
//!
//! # Architecture
//!
//! - **Share pools**: each (operator, asset) pool mints shares at its current
//!   exchange rate; slashing the pool moves the rate, never the shares
//! - **Transactional context**: every operation writes into a buffer that is
//!   committed only on success
//! - **Single writer**: one actor task owns the store and the block height
//! - **Maturity sweep**: undelegations complete at end of block unless held
//!
//! # Invariants
//!
//! - Share conservation: a pool's total share is the sum of its delegators' shares
//! - Balance identity: deposit = withdrawable + delegated + pending undelegation
//! - Truncation: no conversion ever rounds in the staker's favour
//! - Atomicity: a failed operation leaves no writes behind

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod assets;
pub mod association;
pub mod config;
pub mod context;
pub mod delegation_state;
pub mod engine;
pub mod error;
pub mod genesis;
pub mod hooks;
pub mod keys;
pub mod ledger;
pub mod maturity;
pub mod metrics;
pub mod operators;
pub mod share;
pub mod slash;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod undelegation_state;

// Re-exports
pub use config::Config;
pub use engine::{DelegationEngine, ShareRemoval};
pub use error::{Error, Result};
pub use genesis::GenesisState;
pub use hooks::{DelegationHooks, HookSet};
pub use ledger::Ledger;
pub use types::{
    AssetId, BlockInfo, DelegationInfo, DelegationParams, OperatorAddress, RecordKey,
    SingleDelegationInfo, SlashOutcome, StakerId, SweepReport, TxHash, UndelegationFilter,
    UndelegationRecord,
};
