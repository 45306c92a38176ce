//! Staker and operator asset balances
//!
//! Balances belong to the asset registry, but the only writes come from
//! this ledger and always go through a signed delta. A delta that would drive
//! any field below zero is refused with `InvariantViolation`.

use rust_decimal::Decimal;

use crate::{
    context::Context,
    keys,
    types::{
        AssetId, OperatorAddress, OperatorAssetDelta, OperatorAssetInfo, StakerAssetDelta,
        StakerAssetInfo, StakerId,
    },
    Error, Result,
};

/// Asset registry as seen by the delegation engine
pub trait AssetRegistry: Send + Sync {
    /// Balance of a staker for an asset (zero if never touched)
    fn staker_balance(
        &self,
        ctx: &Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<StakerAssetInfo>;

    /// Pool of an operator for an asset (empty if never touched)
    fn operator_balance(
        &self,
        ctx: &Context<'_>,
        operator: &OperatorAddress,
        asset: &AssetId,
    ) -> Result<OperatorAssetInfo>;

    /// Apply a signed change to a staker balance, returning the new balance
    fn apply_staker_delta(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        delta: &StakerAssetDelta,
    ) -> Result<StakerAssetInfo>;

    /// Apply a signed change to an operator pool, returning the new pool
    fn apply_operator_delta(
        &self,
        ctx: &mut Context<'_>,
        operator: &OperatorAddress,
        asset: &AssetId,
        delta: &OperatorAssetDelta,
    ) -> Result<OperatorAssetInfo>;
}

/// Add `delta` to `current`, refusing a negative result
pub(crate) fn apply_field(field: &str, current: Decimal, delta: Decimal) -> Result<Decimal> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| Error::ArithmeticOverflow(format!("{} + {}", current, delta)))?;
    if next.is_sign_negative() && !next.is_zero() {
        return Err(Error::InvariantViolation(format!(
            "{} would become negative: {} + ({})",
            field, current, delta
        )));
    }
    Ok(next)
}

/// Asset balances kept in the ledger's own state store
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetStore;

impl AssetStore {
    /// Create the store
    pub fn new() -> Self {
        Self
    }
}

impl AssetRegistry for AssetStore {
    fn staker_balance(
        &self,
        ctx: &Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<StakerAssetInfo> {
        Ok(ctx
            .get(&keys::staker_asset_key(staker, asset))?
            .unwrap_or_default())
    }

    fn operator_balance(
        &self,
        ctx: &Context<'_>,
        operator: &OperatorAddress,
        asset: &AssetId,
    ) -> Result<OperatorAssetInfo> {
        Ok(ctx
            .get(&keys::operator_asset_key(operator, asset))?
            .unwrap_or_default())
    }

    fn apply_staker_delta(
        &self,
        ctx: &mut Context<'_>,
        staker: &StakerId,
        asset: &AssetId,
        delta: &StakerAssetDelta,
    ) -> Result<StakerAssetInfo> {
        let current = self.staker_balance(ctx, staker, asset)?;
        let next = StakerAssetInfo {
            total_deposit_amount: apply_field(
                "total_deposit_amount",
                current.total_deposit_amount,
                delta.total_deposit_amount,
            )?,
            withdrawable_amount: apply_field(
                "withdrawable_amount",
                current.withdrawable_amount,
                delta.withdrawable_amount,
            )?,
            pending_undelegation_amount: apply_field(
                "pending_undelegation_amount",
                current.pending_undelegation_amount,
                delta.pending_undelegation_amount,
            )?,
        };

        let held = next
            .withdrawable_amount
            .checked_add(next.pending_undelegation_amount)
            .ok_or_else(|| {
                Error::ArithmeticOverflow(format!(
                    "withdrawable {} + pending {}",
                    next.withdrawable_amount, next.pending_undelegation_amount
                ))
            })?;
        if held > next.total_deposit_amount {
            return Err(Error::InvariantViolation(format!(
                "staker {} asset {}: withdrawable {} + pending {} exceeds deposit {}",
                staker,
                asset,
                next.withdrawable_amount,
                next.pending_undelegation_amount,
                next.total_deposit_amount
            )));
        }

        ctx.set(keys::staker_asset_key(staker, asset), &next)?;

        tracing::debug!(
            staker = %staker,
            asset = %asset,
            total = %next.total_deposit_amount,
            withdrawable = %next.withdrawable_amount,
            pending = %next.pending_undelegation_amount,
            "Staker balance updated"
        );

        Ok(next)
    }

    fn apply_operator_delta(
        &self,
        ctx: &mut Context<'_>,
        operator: &OperatorAddress,
        asset: &AssetId,
        delta: &OperatorAssetDelta,
    ) -> Result<OperatorAssetInfo> {
        let current = self.operator_balance(ctx, operator, asset)?;
        let next = OperatorAssetInfo {
            total_amount: apply_field("total_amount", current.total_amount, delta.total_amount)?,
            total_share: apply_field("total_share", current.total_share, delta.total_share)?,
            operator_share: apply_field(
                "operator_share",
                current.operator_share,
                delta.operator_share,
            )?,
            pending_undelegation_amount: apply_field(
                "pending_undelegation_amount",
                current.pending_undelegation_amount,
                delta.pending_undelegation_amount,
            )?,
        };

        if next.total_share.is_zero() != next.total_amount.is_zero() {
            return Err(Error::InvariantViolation(format!(
                "operator {} asset {}: total_share {} and total_amount {} must be zero together",
                operator, asset, next.total_share, next.total_amount
            )));
        }
        if next.operator_share > next.total_share {
            return Err(Error::InvariantViolation(format!(
                "operator {} asset {}: operator_share {} exceeds total_share {}",
                operator, asset, next.operator_share, next.total_share
            )));
        }

        ctx.set(keys::operator_asset_key(operator, asset), &next)?;

        tracing::debug!(
            operator = %operator,
            asset = %asset,
            total_amount = %next.total_amount,
            total_share = %next.total_share,
            pending = %next.pending_undelegation_amount,
            "Operator pool updated"
        );

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::MemStore, types::BlockInfo};
    use rust_decimal_macros::dec;

    fn ids() -> (StakerId, AssetId, OperatorAddress) {
        (
            StakerId::new(&[1], 1).unwrap(),
            AssetId::new(&[2], 1).unwrap(),
            OperatorAddress::new("op1").unwrap(),
        )
    }

    #[test]
    fn test_staker_delta_applies() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        let (staker, asset, _) = ids();
        let assets = AssetStore::new();

        let deposit = StakerAssetDelta {
            total_deposit_amount: dec!(100),
            withdrawable_amount: dec!(100),
            ..Default::default()
        };
        let info = assets
            .apply_staker_delta(&mut ctx, &staker, &asset, &deposit)
            .unwrap();
        assert_eq!(info.withdrawable_amount, dec!(100));
        assert_eq!(
            assets.staker_balance(&ctx, &staker, &asset).unwrap(),
            info
        );
    }

    #[test]
    fn test_negative_staker_balance_refused() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        let (staker, asset, _) = ids();

        let withdraw = StakerAssetDelta {
            withdrawable_amount: dec!(-1),
            total_deposit_amount: dec!(-1),
            ..Default::default()
        };
        let err = AssetStore
            .apply_staker_delta(&mut ctx, &staker, &asset, &withdraw)
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(ctx.pending_writes(), 0);
    }

    #[test]
    fn test_staker_buckets_cannot_exceed_deposit() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        let (staker, asset, _) = ids();

        let bad = StakerAssetDelta {
            withdrawable_amount: dec!(5),
            ..Default::default()
        };
        assert!(AssetStore
            .apply_staker_delta(&mut ctx, &staker, &asset, &bad)
            .is_err());
    }

    #[test]
    fn test_staker_bucket_overflow_is_an_error() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        let (staker, asset, _) = ids();

        let huge = StakerAssetDelta {
            total_deposit_amount: Decimal::MAX,
            withdrawable_amount: Decimal::MAX,
            pending_undelegation_amount: Decimal::MAX,
        };
        assert!(matches!(
            AssetStore.apply_staker_delta(&mut ctx, &staker, &asset, &huge),
            Err(Error::ArithmeticOverflow(_))
        ));
        assert_eq!(ctx.pending_writes(), 0);
    }

    #[test]
    fn test_operator_pool_share_amount_coupled() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        let (_, asset, operator) = ids();

        let shares_only = OperatorAssetDelta {
            total_share: dec!(10),
            ..Default::default()
        };
        assert!(AssetStore
            .apply_operator_delta(&mut ctx, &operator, &asset, &shares_only)
            .is_err());

        let both = OperatorAssetDelta {
            total_share: dec!(10),
            total_amount: dec!(10),
            ..Default::default()
        };
        let pool = AssetStore
            .apply_operator_delta(&mut ctx, &operator, &asset, &both)
            .unwrap();
        assert_eq!(pool.total_share, dec!(10));

        let own_too_big = OperatorAssetDelta {
            operator_share: dec!(11),
            ..Default::default()
        };
        assert!(AssetStore
            .apply_operator_delta(&mut ctx, &operator, &asset, &own_too_big)
            .is_err());
    }
}
