//! Native restaking balance updates
//!
//! A positive change credits the staker's deposit. A negative change is a
//! slash and is taken from three tiers in order: the withdrawable balance,
//! then pending undelegations (ascending by record key), then delegated
//! shares (ascending by operator). Whatever the three tiers cannot cover is
//! reported as a shortfall.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    context::Context,
    delegation_state,
    engine::{DelegationEngine, ShareRemoval},
    share,
    types::{
        AssetId, DelegationDelta, OperatorAssetDelta, SlashOutcome,
        StakerAssetDelta, StakerId, UndelegationFilter,
    },
    undelegation_state, Error, Result,
};

impl DelegationEngine {
    /// Apply a signed change to a staker's natively restaked balance
    pub fn update_native_restaking_balance(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<SlashOutcome> {
        if !amount.fract().is_zero() {
            return Err(Error::InvalidAmount(format!(
                "{} is not a whole token amount",
                amount
            )));
        }
        if amount.is_zero() {
            return Ok(SlashOutcome::default());
        }

        if amount > Decimal::ZERO {
            self.assets.apply_staker_delta(
                ctx,
                staker,
                asset,
                &StakerAssetDelta {
                    total_deposit_amount: amount,
                    withdrawable_amount: amount,
                    ..Default::default()
                },
            )?;
            info!(staker = %staker, asset = %asset, amount = %amount, "Restaking balance credited");
            return Ok(SlashOutcome::default());
        }

        self.metrics.slashes_total.inc();
        let mut remaining = -amount;
        let mut outcome = SlashOutcome::default();

        outcome.from_withdrawable = self.slash_withdrawable(ctx, staker, asset, remaining)?;
        remaining -= outcome.from_withdrawable;

        if !remaining.is_zero() {
            outcome.from_pending_undelegations =
                self.slash_pending_undelegations(ctx, staker, asset, remaining)?;
            remaining -= outcome.from_pending_undelegations;
        }

        if !remaining.is_zero() {
            outcome.from_delegations = self.slash_delegations(ctx, staker, asset, remaining)?;
            remaining -= outcome.from_delegations;
        }

        outcome.shortfall = remaining;
        if !remaining.is_zero() {
            self.metrics.slash_shortfall_total.inc();
            warn!(
                staker = %staker,
                asset = %asset,
                requested = %-amount,
                shortfall = %remaining,
                "Slash exceeds the staker's recorded stake"
            );
        }

        info!(
            staker = %staker,
            asset = %asset,
            withdrawable = %outcome.from_withdrawable,
            pending = %outcome.from_pending_undelegations,
            delegated = %outcome.from_delegations,
            "Restaking balance slashed"
        );

        Ok(outcome)
    }

    fn slash_withdrawable(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        remaining: Decimal,
    ) -> Result<Decimal> {
        let balance = self.assets.staker_balance(ctx, staker, asset)?;
        let cut = remaining.min(balance.withdrawable_amount);
        if cut.is_zero() {
            return Ok(Decimal::ZERO);
        }

        self.assets.apply_staker_delta(
            ctx,
            staker,
            asset,
            &StakerAssetDelta {
                total_deposit_amount: -cut,
                withdrawable_amount: -cut,
                ..Default::default()
            },
        )?;
        Ok(cut)
    }

    fn slash_pending_undelegations(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        mut remaining: Decimal,
    ) -> Result<Decimal> {
        let mut taken = Decimal::ZERO;

        let pending =
            undelegation_state::staker_records(ctx, staker, asset, UndelegationFilter::Pending)?;
        for mut record in pending {
            if remaining.is_zero() {
                break;
            }
            let cut = remaining.min(record.actual_completed_amount);
            if cut.is_zero() {
                continue;
            }

            record.actual_completed_amount -= cut;
            undelegation_state::set_record(ctx, &record)?;

            self.assets.apply_staker_delta(
                ctx,
                staker,
                asset,
                &StakerAssetDelta {
                    total_deposit_amount: -cut,
                    pending_undelegation_amount: -cut,
                    ..Default::default()
                },
            )?;
            self.assets.apply_operator_delta(
                ctx,
                &record.operator,
                asset,
                &OperatorAssetDelta {
                    pending_undelegation_amount: -cut,
                    ..Default::default()
                },
            )?;
            delegation_state::update_delegation(
                ctx,
                staker,
                asset,
                &record.operator,
                &DelegationDelta {
                    wait_undelegation_amount: -cut,
                    ..Default::default()
                },
            )?;

            debug!(record = %record.key(), cut = %cut, "Pending undelegation slashed");
            remaining -= cut;
            taken += cut;
        }

        Ok(taken)
    }

    fn slash_delegations(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        mut remaining: Decimal,
    ) -> Result<Decimal> {
        let mut taken = Decimal::ZERO;

        for (operator, amounts) in delegation_state::delegations_for_staker_asset(ctx, staker, asset)? {
            if remaining.is_zero() {
                break;
            }
            if amounts.undelegatable_share.is_zero() {
                continue;
            }

            let pool = self.assets.operator_balance(ctx, &operator, asset)?;
            if pool.total_amount.is_zero() {
                continue;
            }
            let share = share::shares_to_cover(&pool, remaining, amounts.undelegatable_share)?;
            if share::tokens_from_shares(share, pool.total_share, pool.total_amount)?.is_zero() {
                continue;
            }

            let recovered =
                self.remove_share(ctx, ShareRemoval::Slash, staker, asset, &operator, share)?;
            if recovered.is_zero() {
                continue;
            }
            self.assets.apply_staker_delta(
                ctx,
                staker,
                asset,
                &StakerAssetDelta {
                    total_deposit_amount: -recovered,
                    ..Default::default()
                },
            )?;

            debug!(operator = %operator, share = %share, tokens = %recovered, "Delegation slashed");
            remaining -= recovered;
            taken += recovered;
        }

        Ok(taken)
    }
}
