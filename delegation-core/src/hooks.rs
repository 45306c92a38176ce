//! Notifications to other modules
//!
//! Observers run in registration order after a successful mutation. Each one
//! runs on a branch of the operation's context: its writes are kept if it
//! returns `Ok` and discarded otherwise. A failing observer is logged and
//! never fails the operation that triggered it.

use std::fmt;
use std::sync::Arc;

use crate::{
    context::Context,
    types::{OperatorAddress, RecordKey},
    Result,
};

/// Observer of delegation events
pub trait DelegationHooks: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// A delegation to `operator` was applied
    fn after_delegation(&self, _ctx: &mut Context<'_>, _operator: &OperatorAddress) -> Result<()> {
        Ok(())
    }

    /// An undelegation from `operator` was queued under `key`
    fn after_undelegation_started(
        &self,
        _ctx: &mut Context<'_>,
        _operator: &OperatorAddress,
        _key: &RecordKey,
    ) -> Result<()> {
        Ok(())
    }

    /// The undelegation under `key` matured and was paid out
    fn after_undelegation_completed(
        &self,
        _ctx: &mut Context<'_>,
        _operator: &OperatorAddress,
        _key: &RecordKey,
    ) -> Result<()> {
        Ok(())
    }
}

/// Event delivered to observers
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    /// Delegation applied
    Delegated {
        /// Operator delegated to
        operator: &'a OperatorAddress,
    },
    /// Undelegation queued
    UndelegationStarted {
        /// Operator undelegated from
        operator: &'a OperatorAddress,
        /// Record key
        key: &'a RecordKey,
    },
    /// Undelegation completed
    UndelegationCompleted {
        /// Operator undelegated from
        operator: &'a OperatorAddress,
        /// Record key
        key: &'a RecordKey,
    },
}

impl HookEvent<'_> {
    fn label(&self) -> &'static str {
        match self {
            HookEvent::Delegated { .. } => "after_delegation",
            HookEvent::UndelegationStarted { .. } => "after_undelegation_started",
            HookEvent::UndelegationCompleted { .. } => "after_undelegation_completed",
        }
    }
}

/// Ordered list of observers
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn DelegationHooks>>,
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hook| hook.name().to_string()))
            .finish()
    }
}

impl HookSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer
    pub fn push(&mut self, hook: Arc<dyn DelegationHooks>) {
        self.hooks.push(hook);
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True if no observers are registered
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Deliver `event` to every observer; returns the number that failed
    pub fn dispatch(&self, ctx: &mut Context<'_>, event: HookEvent<'_>) -> usize {
        let mut failures = 0;

        for hook in &self.hooks {
            let mut branch = ctx.branch();
            let result = match event {
                HookEvent::Delegated { operator } => hook.after_delegation(&mut branch, operator),
                HookEvent::UndelegationStarted { operator, key } => {
                    hook.after_undelegation_started(&mut branch, operator, key)
                }
                HookEvent::UndelegationCompleted { operator, key } => {
                    hook.after_undelegation_completed(&mut branch, operator, key)
                }
            };

            let result = result.and_then(|()| branch.commit().map(|_| ()));
            if let Err(e) = result {
                failures += 1;
                tracing::warn!(
                    hook = hook.name(),
                    event = event.label(),
                    error = %e,
                    "Hook failed, continuing"
                );
            }
        }

        failures
    }
}
