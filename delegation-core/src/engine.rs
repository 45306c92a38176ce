//! Delegation engine
//!
//! The engine owns no state of its own. Every operation reads and writes
//! through the [`Context`] it is handed, and the caller commits the context
//! only if the operation returns `Ok`. A failed operation therefore leaves no
//! trace, even if it wrote before failing.
//!
//! The end-of-block sweep lives in `maturity.rs` and the slashing cascade in
//! `slash.rs`; both are further `impl` blocks on [`DelegationEngine`].

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    assets::AssetRegistry,
    association,
    context::Context,
    delegation_state,
    hooks::{DelegationHooks, HookEvent, HookSet},
    metrics::Metrics,
    operators::OperatorRegistry,
    share,
    types::{
        AssetId, DelegationDelta, DelegationInfo, DelegationParams, OperatorAddress,
        OperatorAssetDelta, RecordKey, SingleDelegationInfo, StakerAssetDelta, StakerId,
        UndelegationFilter, UndelegationRecord,
    },
    undelegation_state, Error, Result,
};

/// Why shares are leaving a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareRemoval {
    /// Tokens move to the pending undelegation buckets
    Undelegation,
    /// Tokens are destroyed
    Slash,
}

/// Delegation engine
pub struct DelegationEngine {
    pub(crate) operators: Arc<dyn OperatorRegistry>,
    pub(crate) assets: Arc<dyn AssetRegistry>,
    pub(crate) hooks: HookSet,
    pub(crate) metrics: Metrics,
}

impl std::fmt::Debug for DelegationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationEngine")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl DelegationEngine {
    /// Create an engine over the given registries
    pub fn new(operators: Arc<dyn OperatorRegistry>, assets: Arc<dyn AssetRegistry>) -> Self {
        Self {
            operators,
            assets,
            hooks: HookSet::new(),
            metrics: Metrics::default(),
        }
    }

    /// Use an externally owned metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register an observer
    pub fn with_hook(mut self, hook: Arc<dyn DelegationHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replace the observer list
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Asset registry
    pub fn assets(&self) -> &dyn AssetRegistry {
        self.assets.as_ref()
    }

    /// Operator registry
    pub fn operators(&self) -> &dyn OperatorRegistry {
        self.operators.as_ref()
    }

    pub(crate) fn notify(&self, ctx: &mut Context<'_>, event: HookEvent<'_>) {
        let failures = self.hooks.dispatch(ctx, event);
        if failures > 0 {
            self.metrics.record_hook_failures(failures);
        }
    }

    fn ensure_operator(&self, ctx: &Context<'_>, operator: &OperatorAddress) -> Result<()> {
        if !self.operators.is_operator(ctx, operator)? {
            return Err(Error::OperatorNotExist(operator.to_string()));
        }
        Ok(())
    }

    /// Delegate `params.amount` of the staker's withdrawable balance to an
    /// operator. Returns the shares minted.
    pub fn delegate_to(&self, ctx: &mut Context<'_>, params: &DelegationParams) -> Result<Decimal> {
        validate_amount(params.amount)?;
        let staker = params.staker_id()?;
        let asset = params.asset_id()?;
        let operator = &params.operator;

        self.ensure_operator(ctx, operator)?;
        if !ctx.block().is_replay && self.operators.is_frozen(ctx, operator)? {
            return Err(Error::OperatorIsFrozen(operator.to_string()));
        }

        let balance = self.assets.staker_balance(ctx, &staker, &asset)?;
        if balance.withdrawable_amount < params.amount {
            return Err(Error::DelegationAmountTooBig {
                amount: params.amount,
                withdrawable: balance.withdrawable_amount,
            });
        }

        self.assets.apply_staker_delta(
            ctx,
            &staker,
            &asset,
            &StakerAssetDelta {
                withdrawable_amount: -params.amount,
                ..Default::default()
            },
        )?;

        let pool = self.assets.operator_balance(ctx, operator, &asset)?;
        let minted = share::calculate_share(&pool, params.amount)?;
        if minted.is_zero() {
            return Err(Error::InvalidAmount(format!(
                "{} mints no shares at the current rate",
                params.amount
            )));
        }

        let own_share = if association::is_associated_with(ctx, &staker, operator)? {
            minted
        } else {
            Decimal::ZERO
        };
        self.assets.apply_operator_delta(
            ctx,
            operator,
            &asset,
            &OperatorAssetDelta {
                total_amount: params.amount,
                total_share: minted,
                operator_share: own_share,
                ..Default::default()
            },
        )?;
        delegation_state::update_delegation(
            ctx,
            &staker,
            &asset,
            operator,
            &DelegationDelta {
                undelegatable_share: minted,
                ..Default::default()
            },
        )?;

        self.notify(ctx, HookEvent::Delegated { operator });
        self.metrics.delegations_total.inc();

        info!(
            staker = %staker,
            asset = %asset,
            operator = %operator,
            amount = %params.amount,
            share = %minted,
            height = ctx.height(),
            "Delegated"
        );

        Ok(minted)
    }

    /// Convert `params.amount` worth of delegated shares into a pending
    /// undelegation. Returns the key of the new record.
    pub fn undelegate_from(
        &self,
        ctx: &mut Context<'_>,
        params: &DelegationParams,
    ) -> Result<RecordKey> {
        validate_amount(params.amount)?;
        let staker = params.staker_id()?;
        let asset = params.asset_id()?;
        let operator = &params.operator;

        self.ensure_operator(ctx, operator)?;

        let delegation = delegation_state::get_delegation(ctx, &staker, &asset, operator)?
            .unwrap_or_default();
        let pool = self.assets.operator_balance(ctx, operator, &asset)?;
        if pool.total_amount.is_zero() {
            return Err(Error::InsufficientShares {
                required: params.amount,
                available: delegation.undelegatable_share,
            });
        }

        let required =
            share::shares_to_cover(&pool, params.amount, delegation.undelegatable_share)?;
        let redeemable = share::tokens_from_shares(required, pool.total_share, pool.total_amount)?;
        if redeemable != params.amount {
            return Err(Error::InsufficientShares {
                required: share::shares_from_tokens(
                    pool.total_share,
                    params.amount,
                    pool.total_amount,
                )?,
                available: delegation.undelegatable_share,
            });
        }

        let removed = self.remove_share(
            ctx,
            ShareRemoval::Undelegation,
            &staker,
            &asset,
            operator,
            required,
        )?;
        if removed != params.amount {
            return Err(Error::InvariantViolation(format!(
                "undelegation of {} redeemed {} tokens",
                params.amount, removed
            )));
        }
        self.assets.apply_staker_delta(
            ctx,
            &staker,
            &asset,
            &StakerAssetDelta {
                pending_undelegation_amount: removed,
                ..Default::default()
            },
        )?;

        let height = ctx.height();
        let delay = self.operators.unbonding_delay(ctx, operator, height)?;
        let completed_height = height.checked_add(delay).ok_or_else(|| {
            Error::ArithmeticOverflow(format!("maturity height {} + {}", height, delay))
        })?;

        let record = UndelegationRecord {
            staker_id: staker.clone(),
            asset_id: asset.clone(),
            operator: operator.clone(),
            tx_hash: params.tx_hash,
            tx_nonce: params.tx_nonce,
            block_number: height,
            completed_height,
            amount: params.amount,
            actual_completed_amount: removed,
            is_pending: true,
        };
        let key = undelegation_state::insert_record(ctx, &record)?;

        self.notify(
            ctx,
            HookEvent::UndelegationStarted {
                operator,
                key: &key,
            },
        );
        self.metrics.undelegations_total.inc();

        info!(
            staker = %staker,
            asset = %asset,
            operator = %operator,
            amount = %params.amount,
            share = %required,
            tokens = %removed,
            maturity = completed_height,
            "Undelegation started"
        );

        Ok(key)
    }

    /// Burn `share` from a delegation and return the tokens it redeemed.
    ///
    /// In undelegation mode the tokens move to the operator's pending bucket
    /// and the delegation's waiting amount. In slash mode they leave the pool.
    pub fn remove_share(
        &self,
        ctx: &mut Context<'_>,
        mode: ShareRemoval,
        staker: &StakerId,
        asset: &AssetId,
        operator: &OperatorAddress,
        share: Decimal,
    ) -> Result<Decimal> {
        let pool = self.assets.operator_balance(ctx, operator, asset)?;
        let tokens = share::tokens_from_shares(share, pool.total_share, pool.total_amount)?;

        let own_share = if association::is_associated_with(ctx, staker, operator)? {
            share
        } else {
            Decimal::ZERO
        };
        let pending = match mode {
            ShareRemoval::Undelegation => tokens,
            ShareRemoval::Slash => Decimal::ZERO,
        };

        self.assets.apply_operator_delta(
            ctx,
            operator,
            asset,
            &OperatorAssetDelta {
                total_amount: -tokens,
                total_share: -share,
                operator_share: -own_share,
                pending_undelegation_amount: pending,
            },
        )?;
        delegation_state::update_delegation(
            ctx,
            staker,
            asset,
            operator,
            &DelegationDelta {
                undelegatable_share: -share,
                wait_undelegation_amount: pending,
            },
        )?;

        debug!(
            staker = %staker,
            asset = %asset,
            operator = %operator,
            mode = ?mode,
            share = %share,
            tokens = %tokens,
            "Shares removed"
        );

        Ok(tokens)
    }

    /// Associate a staker with an operator. Shares the staker already holds
    /// with that operator start counting as the operator's own.
    pub fn associate_operator_with_staker(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        operator: &OperatorAddress,
    ) -> Result<()> {
        self.ensure_operator(ctx, operator)?;
        if let Some(existing) = association::associated_operator(ctx, staker)? {
            return Err(Error::OperatorAlreadyAssociated {
                staker: staker.to_string(),
                operator: existing.to_string(),
            });
        }

        self.shift_operator_share(ctx, staker, operator, Sign::Add)?;
        association::set_association(ctx, staker, operator)?;

        info!(staker = %staker, operator = %operator, "Staker associated");
        Ok(())
    }

    /// Remove a staker's association, moving its shares back out of the
    /// operator's own share.
    pub fn dissociate_operator_from_staker(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
    ) -> Result<OperatorAddress> {
        let operator = association::associated_operator(ctx, staker)?
            .ok_or_else(|| Error::NoAssociatedOperatorByStaker(staker.to_string()))?;

        self.shift_operator_share(ctx, staker, &operator, Sign::Sub)?;
        association::delete_association(ctx, staker)?;

        info!(staker = %staker, operator = %operator, "Staker dissociated");
        Ok(operator)
    }

    fn shift_operator_share(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        operator: &OperatorAddress,
        sign: Sign,
    ) -> Result<()> {
        for (asset, delegated_to, amounts) in delegation_state::delegations_for_staker(ctx, staker)? {
            if &delegated_to != operator || amounts.undelegatable_share.is_zero() {
                continue;
            }
            let change = match sign {
                Sign::Add => amounts.undelegatable_share,
                Sign::Sub => -amounts.undelegatable_share,
            };
            self.assets.apply_operator_delta(
                ctx,
                operator,
                &asset,
                &OperatorAssetDelta {
                    operator_share: change,
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    /// One delegation, valued at the operator's current rate
    pub fn single_delegation_info(
        &self,
        ctx: &Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        operator: &OperatorAddress,
    ) -> Result<SingleDelegationInfo> {
        let amounts = delegation_state::get_delegation(ctx, staker, asset, operator)?
            .unwrap_or_default();

        let max_undelegatable_amount = if amounts.undelegatable_share.is_zero() {
            Decimal::ZERO
        } else {
            let pool = self.assets.operator_balance(ctx, operator, asset)?;
            share::tokens_from_shares(
                amounts.undelegatable_share,
                pool.total_share,
                pool.total_amount,
            )?
        };

        Ok(SingleDelegationInfo {
            undelegatable_share: amounts.undelegatable_share,
            wait_undelegation_amount: amounts.wait_undelegation_amount,
            max_undelegatable_amount,
        })
    }

    /// Every delegation of one staker's asset
    pub fn delegation_info(
        &self,
        ctx: &Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<DelegationInfo> {
        let mut delegations = BTreeMap::new();
        let mut total = Decimal::ZERO;

        for (operator, _) in delegation_state::delegations_for_staker_asset(ctx, staker, asset)? {
            let info = self.single_delegation_info(ctx, staker, asset, &operator)?;
            total = total
                .checked_add(info.max_undelegatable_amount)
                .ok_or_else(|| Error::ArithmeticOverflow("total delegated amount".into()))?;
            delegations.insert(operator, info);
        }

        Ok(DelegationInfo {
            total_delegated_amount: total,
            delegations,
        })
    }

    /// Undelegation records of one staker's asset
    pub fn staker_undelegation_records(
        &self,
        ctx: &Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        filter: UndelegationFilter,
    ) -> Result<Vec<UndelegationRecord>> {
        undelegation_state::staker_records(ctx, staker, asset, filter)
    }

    /// One undelegation record
    pub fn undelegation_record(
        &self,
        ctx: &Context<'_>,
        key: &RecordKey,
    ) -> Result<Option<UndelegationRecord>> {
        undelegation_state::get_record(ctx, key)
    }

    /// Records indexed to mature at `height`
    pub fn undelegations_at_height(
        &self,
        ctx: &Context<'_>,
        height: u64,
    ) -> Result<Vec<UndelegationRecord>> {
        undelegation_state::keys_maturing_at(ctx, height)?
            .iter()
            .map(|key| undelegation_state::must_get_record(ctx, key))
            .collect()
    }

    /// Operator a staker is associated with
    pub fn associated_operator(
        &self,
        ctx: &Context<'_>,
        staker: &StakerId,
    ) -> Result<Option<OperatorAddress>> {
        association::associated_operator(ctx, staker)
    }

    /// Stakers delegating `asset` to `operator`
    pub fn stakers_by_operator(
        &self,
        ctx: &Context<'_>,
        operator: &OperatorAddress,
        asset: &AssetId,
    ) -> Result<Vec<StakerId>> {
        delegation_state::stakers_by_operator(ctx, operator, asset)
    }

    /// Current hold count of a record
    pub fn undelegation_hold_count(&self, ctx: &Context<'_>, key: &RecordKey) -> Result<u64> {
        undelegation_state::hold_count(ctx, key)
    }

    /// Keep a pending record from completing until released
    pub fn increment_undelegation_hold_count(
        &self,
        ctx: &mut Context<'_>,
        key: &RecordKey,
    ) -> Result<u64> {
        undelegation_state::increment_hold_count(ctx, key)
    }

    /// Release one hold on a record
    pub fn decrement_undelegation_hold_count(
        &self,
        ctx: &mut Context<'_>,
        key: &RecordKey,
    ) -> Result<u64> {
        undelegation_state::decrement_hold_count(ctx, key)
    }
}

#[derive(Clone, Copy)]
enum Sign {
    Add,
    Sub,
}

/// Token amounts are positive whole numbers
pub(crate) fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::AmountNotPositive(amount));
    }
    if !amount.fract().is_zero() {
        return Err(Error::InvalidAmount(format!(
            "{} is not a whole token amount",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::AssetStore,
        operators::OperatorSet,
        storage::MemStore,
        types::{BlockInfo, TxHash},
    };
    use rust_decimal_macros::dec;

    fn setup() -> (DelegationEngine, Arc<OperatorSet>) {
        let operators = Arc::new(OperatorSet::new());
        operators.register(OperatorAddress::new("op1").unwrap(), 10);
        let engine = DelegationEngine::new(operators.clone(), Arc::new(AssetStore::new()));
        (engine, operators)
    }

    fn params(amount: Decimal, nonce: u64) -> DelegationParams {
        DelegationParams {
            client_chain_id: 101,
            asset_address: vec![0xaa; 20],
            staker_address: vec![0x01; 20],
            operator: OperatorAddress::new("op1").unwrap(),
            amount,
            tx_hash: TxHash([nonce as u8; 32]),
            tx_nonce: nonce,
        }
    }

    fn deposit(engine: &DelegationEngine, ctx: &mut Context<'_>, amount: Decimal) {
        let p = params(amount, 0);
        engine
            .assets()
            .apply_staker_delta(
                ctx,
                &p.staker_id().unwrap(),
                &p.asset_id().unwrap(),
                &StakerAssetDelta {
                    total_deposit_amount: amount,
                    withdrawable_amount: amount,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_amount_validation() {
        assert!(matches!(
            validate_amount(dec!(0)),
            Err(Error::AmountNotPositive(_))
        ));
        assert!(matches!(
            validate_amount(dec!(-3)),
            Err(Error::AmountNotPositive(_))
        ));
        assert!(matches!(
            validate_amount(dec!(1.5)),
            Err(Error::InvalidAmount(_))
        ));
        assert!(validate_amount(dec!(7)).is_ok());
    }

    #[test]
    fn test_first_delegation_mints_one_to_one() {
        let (engine, _) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        deposit(&engine, &mut ctx, dec!(100));

        let p = params(dec!(10), 1);
        assert_eq!(engine.delegate_to(&mut ctx, &p).unwrap(), dec!(10));

        let staker = p.staker_id().unwrap();
        let asset = p.asset_id().unwrap();
        let pool = engine
            .assets()
            .operator_balance(&ctx, &p.operator, &asset)
            .unwrap();
        assert_eq!(pool.total_amount, dec!(10));
        assert_eq!(pool.total_share, dec!(10));
        assert_eq!(pool.operator_share, dec!(0));

        let info = engine
            .single_delegation_info(&ctx, &staker, &asset, &p.operator)
            .unwrap();
        assert_eq!(info.undelegatable_share, dec!(10));
        assert_eq!(info.max_undelegatable_amount, dec!(10));
        assert_eq!(
            engine
                .stakers_by_operator(&ctx, &p.operator, &asset)
                .unwrap(),
            vec![staker]
        );
        assert_eq!(engine.metrics().delegations_total.get(), 1);
    }

    #[test]
    fn test_delegate_validation_order() {
        let (engine, operators) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));

        // Amount is checked before the operator
        let mut p = params(dec!(0), 1);
        p.operator = OperatorAddress::new("nobody").unwrap();
        assert!(matches!(
            engine.delegate_to(&mut ctx, &p),
            Err(Error::AmountNotPositive(_))
        ));

        p.amount = dec!(5);
        assert!(matches!(
            engine.delegate_to(&mut ctx, &p),
            Err(Error::OperatorNotExist(_))
        ));

        let p = params(dec!(5), 1);
        operators.set_frozen(&p.operator, true).unwrap();
        assert!(matches!(
            engine.delegate_to(&mut ctx, &p),
            Err(Error::OperatorIsFrozen(_))
        ));

        operators.set_frozen(&p.operator, false).unwrap();
        assert!(matches!(
            engine.delegate_to(&mut ctx, &p),
            Err(Error::DelegationAmountTooBig { .. })
        ));
    }

    #[test]
    fn test_replay_skips_frozen_check() {
        let (engine, operators) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(
            &mut store,
            BlockInfo {
                height: 1,
                is_replay: true,
            },
        );
        deposit(&engine, &mut ctx, dec!(10));

        let p = params(dec!(10), 1);
        operators.set_frozen(&p.operator, true).unwrap();
        assert_eq!(engine.delegate_to(&mut ctx, &p).unwrap(), dec!(10));
    }

    #[test]
    fn test_undelegate_creates_record() {
        let (engine, _) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(5));
        deposit(&engine, &mut ctx, dec!(50));
        engine.delegate_to(&mut ctx, &params(dec!(50), 1)).unwrap();

        let p = params(dec!(20), 2);
        let key = engine.undelegate_from(&mut ctx, &p).unwrap();
        assert_eq!(key.height, 5);
        assert_eq!(key.tx_nonce, 2);

        let record = engine.undelegation_record(&ctx, &key).unwrap().unwrap();
        assert!(record.is_pending);
        assert_eq!(record.completed_height, 15);
        assert_eq!(record.amount, dec!(20));
        assert_eq!(record.actual_completed_amount, dec!(20));

        let staker = p.staker_id().unwrap();
        let asset = p.asset_id().unwrap();
        let balance = engine.assets().staker_balance(&ctx, &staker, &asset).unwrap();
        assert_eq!(balance.withdrawable_amount, dec!(0));
        assert_eq!(balance.pending_undelegation_amount, dec!(20));

        let pool = engine
            .assets()
            .operator_balance(&ctx, &p.operator, &asset)
            .unwrap();
        assert_eq!(pool.total_amount, dec!(30));
        assert_eq!(pool.pending_undelegation_amount, dec!(20));

        let info = engine
            .single_delegation_info(&ctx, &staker, &asset, &p.operator)
            .unwrap();
        assert_eq!(info.undelegatable_share, dec!(30));
        assert_eq!(info.wait_undelegation_amount, dec!(20));

        assert_eq!(engine.undelegations_at_height(&ctx, 15).unwrap(), vec![record]);
    }

    #[test]
    fn test_undelegate_off_par_redeems_full_amount() {
        let (engine, _) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        deposit(&engine, &mut ctx, dec!(703));
        engine.delegate_to(&mut ctx, &params(dec!(700), 1)).unwrap();

        let p = params(dec!(2), 3);
        let asset = p.asset_id().unwrap();
        engine
            .assets()
            .apply_operator_delta(
                &mut ctx,
                &p.operator,
                &asset,
                &OperatorAssetDelta {
                    total_amount: dec!(-400),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(engine.delegate_to(&mut ctx, &params(dec!(3), 2)).unwrap(), dec!(7));

        // 707 shares over 303 tokens: 2 tokens are 4.66.. shares, never a whole number
        let key = engine.undelegate_from(&mut ctx, &p).unwrap();
        let record = engine.undelegation_record(&ctx, &key).unwrap().unwrap();
        assert_eq!(record.amount, dec!(2));
        assert_eq!(record.actual_completed_amount, dec!(2));

        let pool = engine
            .assets()
            .operator_balance(&ctx, &p.operator, &asset)
            .unwrap();
        assert_eq!(pool.total_amount, dec!(301));
        assert_eq!(pool.pending_undelegation_amount, dec!(2));
        assert_eq!(pool.total_share, dec!(702.333333333333333333));

        let balance = engine
            .assets()
            .staker_balance(&ctx, &p.staker_id().unwrap(), &asset)
            .unwrap();
        assert_eq!(balance.pending_undelegation_amount, dec!(2));
    }

    #[test]
    fn test_undelegate_more_than_delegated() {
        let (engine, _) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        deposit(&engine, &mut ctx, dec!(10));
        engine.delegate_to(&mut ctx, &params(dec!(10), 1)).unwrap();

        assert!(matches!(
            engine.undelegate_from(&mut ctx, &params(dec!(11), 2)),
            Err(Error::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_association_counts_existing_share() {
        let (engine, _) = setup();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        deposit(&engine, &mut ctx, dec!(30));

        let p = params(dec!(20), 1);
        engine.delegate_to(&mut ctx, &p).unwrap();
        let staker = p.staker_id().unwrap();
        let asset = p.asset_id().unwrap();

        engine
            .associate_operator_with_staker(&mut ctx, &staker, &p.operator)
            .unwrap();
        let pool = engine
            .assets()
            .operator_balance(&ctx, &p.operator, &asset)
            .unwrap();
        assert_eq!(pool.operator_share, dec!(20));

        assert!(matches!(
            engine.associate_operator_with_staker(&mut ctx, &staker, &p.operator),
            Err(Error::OperatorAlreadyAssociated { .. })
        ));

        // Later delegations count immediately
        engine.delegate_to(&mut ctx, &params(dec!(10), 2)).unwrap();
        let pool = engine
            .assets()
            .operator_balance(&ctx, &p.operator, &asset)
            .unwrap();
        assert_eq!(pool.operator_share, dec!(30));

        assert_eq!(
            engine.dissociate_operator_from_staker(&mut ctx, &staker).unwrap(),
            p.operator
        );
        let pool = engine
            .assets()
            .operator_balance(&ctx, &p.operator, &asset)
            .unwrap();
        assert_eq!(pool.operator_share, dec!(0));
        assert!(matches!(
            engine.dissociate_operator_from_staker(&mut ctx, &staker),
            Err(Error::NoAssociatedOperatorByStaker(_))
        ));
    }

    #[test]
    fn test_delegation_info_totals() {
        let (engine, operators) = setup();
        operators.register(OperatorAddress::new("op2").unwrap(), 10);
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        deposit(&engine, &mut ctx, dec!(30));

        engine.delegate_to(&mut ctx, &params(dec!(10), 1)).unwrap();
        let mut p = params(dec!(15), 2);
        p.operator = OperatorAddress::new("op2").unwrap();
        engine.delegate_to(&mut ctx, &p).unwrap();

        let info = engine
            .delegation_info(&ctx, &p.staker_id().unwrap(), &p.asset_id().unwrap())
            .unwrap();
        assert_eq!(info.total_delegated_amount, dec!(25));
        assert_eq!(info.delegations.len(), 2);
    }
}
