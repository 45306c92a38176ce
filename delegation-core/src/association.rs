//! Staker to operator association (native restaking self-delegation)

use crate::{
    context::Context,
    keys,
    types::{OperatorAddress, StakerId},
    Result,
};

/// Operator a staker is associated with, if any
pub fn associated_operator(ctx: &Context<'_>, staker: &StakerId) -> Result<Option<OperatorAddress>> {
    ctx.get(&keys::association_key(staker))
}

/// Record an association, replacing any existing one
pub(crate) fn set_association(
    ctx: &mut Context<'_>,
    staker: &StakerId,
    operator: &OperatorAddress,
) -> Result<()> {
    ctx.set(keys::association_key(staker), operator)
}

/// Remove a staker's association
pub(crate) fn delete_association(ctx: &mut Context<'_>, staker: &StakerId) -> Result<()> {
    ctx.delete(&keys::association_key(staker))
}

/// Every association, ascending by staker key
pub fn all_associations(ctx: &Context<'_>) -> Result<Vec<(StakerId, OperatorAddress)>> {
    ctx.scan::<OperatorAddress>(&[keys::ASSOCIATION_PREFIX])?
        .into_iter()
        .map(|(key, operator)| Ok((keys::decode_association_key(&key)?, operator)))
        .collect()
}

/// True if `staker` is associated with exactly `operator`
pub fn is_associated_with(
    ctx: &Context<'_>,
    staker: &StakerId,
    operator: &OperatorAddress,
) -> Result<bool> {
    Ok(associated_operator(ctx, staker)?.as_ref() == Some(operator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::MemStore, types::BlockInfo};

    #[test]
    fn test_association_lifecycle() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        let staker = StakerId::new(&[1], 1).unwrap();
        let operator = OperatorAddress::new("op1").unwrap();
        let other = OperatorAddress::new("op2").unwrap();

        assert!(associated_operator(&ctx, &staker).unwrap().is_none());

        set_association(&mut ctx, &staker, &operator).unwrap();
        assert!(is_associated_with(&ctx, &staker, &operator).unwrap());
        assert!(!is_associated_with(&ctx, &staker, &other).unwrap());
        assert_eq!(
            all_associations(&ctx).unwrap(),
            vec![(staker.clone(), operator)]
        );

        delete_association(&mut ctx, &staker).unwrap();
        assert!(all_associations(&ctx).unwrap().is_empty());
    }
}
