//! End-of-block maturity sweep
//!
//! Every record indexed at the current height either completes, crediting
//! its tokens back to the staker's withdrawable balance, or, while held,
//! moves to the next height's index.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    context::Context,
    delegation_state,
    engine::DelegationEngine,
    hooks::HookEvent,
    types::{DelegationDelta, OperatorAssetDelta, RecordKey, StakerAssetDelta, SweepReport},
    undelegation_state, Error, Result,
};

impl DelegationEngine {
    /// Complete or defer every undelegation maturing at the context's height
    pub fn end_block(&self, ctx: &mut Context<'_>) -> Result<SweepReport> {
        let height = ctx.height();
        let next = height
            .checked_add(1)
            .ok_or_else(|| Error::ArithmeticOverflow(format!("height {} + 1", height)))?;

        let mut report = SweepReport {
            height,
            ..Default::default()
        };

        for key in undelegation_state::keys_maturing_at(ctx, height)? {
            let holds = undelegation_state::hold_count(ctx, &key)?;
            if holds > 0 {
                undelegation_state::reschedule(ctx, &key, height, next)?;
                debug!(record = %key, holds, next, "Undelegation held, deferred");
                report.deferred.push(key);
                continue;
            }

            self.complete_undelegation(ctx, &key)?;
            undelegation_state::remove_maturity_entry(ctx, height, &key)?;
            self.notify(
                ctx,
                HookEvent::UndelegationCompleted {
                    operator: &key.operator,
                    key: &key,
                },
            );
            report.completed.push(key);
        }

        self.metrics
            .record_sweep(height, report.completed.len(), report.deferred.len());
        if !report.completed.is_empty() || !report.deferred.is_empty() {
            info!(
                height,
                completed = report.completed.len(),
                deferred = report.deferred.len(),
                "Maturity sweep"
            );
        }

        Ok(report)
    }

    fn complete_undelegation(&self, ctx: &mut Context<'_>, key: &RecordKey) -> Result<Decimal> {
        let mut record = undelegation_state::must_get_record(ctx, key)?;
        if !record.is_pending {
            return Err(Error::InvariantViolation(format!(
                "completed undelegation {} still indexed for maturity",
                key
            )));
        }

        let staker = self
            .assets
            .staker_balance(ctx, &record.staker_id, &record.asset_id)?;
        let pool = self
            .assets
            .operator_balance(ctx, &record.operator, &record.asset_id)?;
        let delegation = delegation_state::get_delegation(
            ctx,
            &record.staker_id,
            &record.asset_id,
            &record.operator,
        )?
        .unwrap_or_default();

        let owed = record.actual_completed_amount.min(record.amount);
        let completed = owed
            .min(staker.pending_undelegation_amount)
            .min(pool.pending_undelegation_amount)
            .min(delegation.wait_undelegation_amount);
        if completed < owed {
            warn!(
                record = %key,
                owed = %owed,
                completed = %completed,
                "Pending buckets smaller than undelegation, clamped"
            );
        }

        if !completed.is_zero() {
            self.assets.apply_staker_delta(
                ctx,
                &record.staker_id,
                &record.asset_id,
                &StakerAssetDelta {
                    withdrawable_amount: completed,
                    pending_undelegation_amount: -completed,
                    ..Default::default()
                },
            )?;
            self.assets.apply_operator_delta(
                ctx,
                &record.operator,
                &record.asset_id,
                &OperatorAssetDelta {
                    pending_undelegation_amount: -completed,
                    ..Default::default()
                },
            )?;
            delegation_state::update_delegation(
                ctx,
                &record.staker_id,
                &record.asset_id,
                &record.operator,
                &DelegationDelta {
                    wait_undelegation_amount: -completed,
                    ..Default::default()
                },
            )?;
        }

        record.is_pending = false;
        record.actual_completed_amount = completed;
        undelegation_state::set_record(ctx, &record)?;

        debug!(
            record = %key,
            staker = %record.staker_id,
            amount = %completed,
            "Undelegation completed"
        );

        Ok(completed)
    }
}
