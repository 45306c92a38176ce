//! Operator registry interface
//!
//! Registration, freezing and unbonding policy are owned elsewhere; the
//! engine only asks questions. [`OperatorSet`] is a small in-memory registry
//! for hosts that do not run a full operator module.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::{context::Context, types::OperatorAddress, Error, Result};

/// Operator registry as seen by the delegation engine
pub trait OperatorRegistry: Send + Sync {
    /// Operator is registered
    fn is_operator(&self, ctx: &Context<'_>, operator: &OperatorAddress) -> Result<bool>;

    /// Operator is frozen (slashed out) and must not receive delegations
    fn is_frozen(&self, ctx: &Context<'_>, operator: &OperatorAddress) -> Result<bool>;

    /// Blocks an undelegation from `operator` submitted at `from_height` waits
    fn unbonding_delay(
        &self,
        ctx: &Context<'_>,
        operator: &OperatorAddress,
        from_height: u64,
    ) -> Result<u64>;
}

/// Registered operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorEntry {
    /// Frozen operators reject new delegations
    pub frozen: bool,
    /// Unbonding delay in blocks
    pub unbonding_blocks: u64,
}

/// In-memory operator registry
#[derive(Debug, Default)]
pub struct OperatorSet {
    operators: RwLock<BTreeMap<OperatorAddress, OperatorEntry>>,
}

impl OperatorSet {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) an operator
    pub fn register(&self, operator: OperatorAddress, unbonding_blocks: u64) {
        tracing::info!(operator = %operator, unbonding_blocks, "Operator registered");
        self.operators.write().insert(
            operator,
            OperatorEntry {
                frozen: false,
                unbonding_blocks,
            },
        );
    }

    /// Freeze or unfreeze a registered operator
    pub fn set_frozen(&self, operator: &OperatorAddress, frozen: bool) -> Result<()> {
        let mut operators = self.operators.write();
        let entry = operators
            .get_mut(operator)
            .ok_or_else(|| Error::OperatorNotExist(operator.to_string()))?;
        entry.frozen = frozen;
        tracing::info!(operator = %operator, frozen, "Operator freeze status changed");
        Ok(())
    }

    /// Look up an operator
    pub fn get(&self, operator: &OperatorAddress) -> Option<OperatorEntry> {
        self.operators.read().get(operator).cloned()
    }
}

impl OperatorRegistry for OperatorSet {
    fn is_operator(&self, _ctx: &Context<'_>, operator: &OperatorAddress) -> Result<bool> {
        Ok(self.operators.read().contains_key(operator))
    }

    fn is_frozen(&self, _ctx: &Context<'_>, operator: &OperatorAddress) -> Result<bool> {
        Ok(self
            .operators
            .read()
            .get(operator)
            .map(|entry| entry.frozen)
            .unwrap_or(false))
    }

    fn unbonding_delay(
        &self,
        _ctx: &Context<'_>,
        operator: &OperatorAddress,
        _from_height: u64,
    ) -> Result<u64> {
        self.operators
            .read()
            .get(operator)
            .map(|entry| entry.unbonding_blocks)
            .ok_or_else(|| Error::OperatorNotExist(operator.to_string()))
    }
}
