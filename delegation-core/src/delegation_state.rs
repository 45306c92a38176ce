//! Delegation state and the per-operator staker index
//!
//! A delegation entry exists while it holds shares or pending tokens; the
//! staker index entry for (operator, asset, staker) exists exactly as long.

use crate::{
    assets::apply_field,
    context::Context,
    keys,
    types::{AssetId, DelegationAmounts, DelegationDelta, OperatorAddress, StakerId},
    Result,
};

/// Delegation of one staker's asset to one operator
pub fn get_delegation(
    ctx: &Context<'_>,
    staker: &StakerId,
    asset: &AssetId,
    operator: &OperatorAddress,
) -> Result<Option<DelegationAmounts>> {
    ctx.get(&keys::delegation_key(staker, asset, operator))
}

/// Apply a signed change to a delegation and keep the staker index in step
pub fn update_delegation(
    ctx: &mut Context<'_>,
    staker: &StakerId,
    asset: &AssetId,
    operator: &OperatorAddress,
    delta: &DelegationDelta,
) -> Result<DelegationAmounts> {
    let key = keys::delegation_key(staker, asset, operator);
    let current: DelegationAmounts = ctx.get(&key)?.unwrap_or_default();

    let next = DelegationAmounts {
        undelegatable_share: apply_field(
            "undelegatable_share",
            current.undelegatable_share,
            delta.undelegatable_share,
        )?,
        wait_undelegation_amount: apply_field(
            "wait_undelegation_amount",
            current.wait_undelegation_amount,
            delta.wait_undelegation_amount,
        )?,
    };

    let index_key = keys::stakers_by_operator_key(operator, asset, staker);
    if next.is_zero() {
        ctx.delete(&key)?;
        ctx.delete(&index_key)?;
    } else {
        ctx.set(key, &next)?;
        ctx.set_marker(index_key)?;
    }

    tracing::debug!(
        staker = %staker,
        asset = %asset,
        operator = %operator,
        share = %next.undelegatable_share,
        waiting = %next.wait_undelegation_amount,
        "Delegation updated"
    );

    Ok(next)
}

/// Delegations of one staker's asset, ascending by operator key
pub fn delegations_for_staker_asset(
    ctx: &Context<'_>,
    staker: &StakerId,
    asset: &AssetId,
) -> Result<Vec<(OperatorAddress, DelegationAmounts)>> {
    ctx.scan::<DelegationAmounts>(&keys::delegation_prefix(staker, asset))?
        .into_iter()
        .map(|(key, amounts)| {
            let (_, _, operator) = keys::decode_delegation_key(&key)?;
            Ok((operator, amounts))
        })
        .collect()
}

/// Every delegation of one staker, across assets
pub fn delegations_for_staker(
    ctx: &Context<'_>,
    staker: &StakerId,
) -> Result<Vec<(AssetId, OperatorAddress, DelegationAmounts)>> {
    ctx.scan::<DelegationAmounts>(&keys::staker_delegation_prefix(staker))?
        .into_iter()
        .map(|(key, amounts)| {
            let (_, asset, operator) = keys::decode_delegation_key(&key)?;
            Ok((asset, operator, amounts))
        })
        .collect()
}

/// Every delegation in the ledger, in key order
pub fn all_delegations(
    ctx: &Context<'_>,
) -> Result<Vec<(StakerId, AssetId, OperatorAddress, DelegationAmounts)>> {
    ctx.scan::<DelegationAmounts>(&[keys::DELEGATION_PREFIX])?
        .into_iter()
        .map(|(key, amounts)| {
            let (staker, asset, operator) = keys::decode_delegation_key(&key)?;
            Ok((staker, asset, operator, amounts))
        })
        .collect()
}

/// Stakers with a delegation of `asset` to `operator`
pub fn stakers_by_operator(
    ctx: &Context<'_>,
    operator: &OperatorAddress,
    asset: &AssetId,
) -> Result<Vec<StakerId>> {
    ctx.keys(&keys::stakers_by_operator_prefix(operator, asset))?
        .iter()
        .map(|key| keys::decode_stakers_by_operator_key(key).map(|(_, _, staker)| staker))
        .collect()
}

/// Every staker index entry, in key order
pub fn all_stakers_by_operator(
    ctx: &Context<'_>,
) -> Result<Vec<(OperatorAddress, AssetId, StakerId)>> {
    ctx.keys(&[keys::STAKERS_BY_OPERATOR_PREFIX])?
        .iter()
        .map(|key| keys::decode_stakers_by_operator_key(key))
        .collect()
}

/// Write a delegation verbatim (genesis import)
pub(crate) fn set_delegation(
    ctx: &mut Context<'_>,
    staker: &StakerId,
    asset: &AssetId,
    operator: &OperatorAddress,
    amounts: &DelegationAmounts,
) -> Result<()> {
    ctx.set(keys::delegation_key(staker, asset, operator), amounts)
}

/// Write a staker index entry verbatim (genesis import)
pub(crate) fn set_staker_for_operator(
    ctx: &mut Context<'_>,
    operator: &OperatorAddress,
    asset: &AssetId,
    staker: &StakerId,
) -> Result<()> {
    ctx.set_marker(keys::stakers_by_operator_key(operator, asset, staker))
}
