//! Conversion between token amounts and pool shares
//!
//! Every division rounds toward zero, and the result is checked against the
//! undivided product, so a staker can never redeem more than the pool holds.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::{types::OperatorAssetInfo, Error, Result};

/// Decimal places kept on shares
pub const SHARE_DECIMALS: u32 = 18;

fn overflow(op: &str) -> Error {
    Error::ArithmeticOverflow(format!("share math: {}", op))
}

fn ensure_non_negative(values: &[Decimal]) -> Result<()> {
    if values.iter().any(|v| v.is_sign_negative() && !v.is_zero()) {
        return Err(Error::InvariantViolation(format!(
            "negative share math input: {:?}",
            values
        )));
    }
    Ok(())
}

/// Smallest representable step at `value`'s scale
fn unit_at_scale(value: Decimal) -> Decimal {
    Decimal::new(1, value.scale())
}

/// Shares minted (or burned) for `token_amount` against a pool of
/// `total_share` shares backed by `total_tokens` tokens.
///
/// Fails with `DivisorIsZero` on an empty pool; the first delegation is
/// handled by [`calculate_share`].
pub fn shares_from_tokens(
    total_share: Decimal,
    token_amount: Decimal,
    total_tokens: Decimal,
) -> Result<Decimal> {
    ensure_non_negative(&[total_share, token_amount, total_tokens])?;
    if total_tokens.is_zero() {
        return Err(Error::DivisorIsZero);
    }

    let numerator = total_share
        .checked_mul(token_amount)
        .ok_or_else(|| overflow("total_share * token_amount"))?;
    let mut share = numerator
        .checked_div(total_tokens)
        .ok_or_else(|| overflow("numerator / total_tokens"))?
        .round_dp_with_strategy(SHARE_DECIMALS, RoundingStrategy::ToZero);

    // Decimal division rounds its last digit; step back if that rounded up.
    for _ in 0..2 {
        match share.checked_mul(total_tokens) {
            Some(product) if product > numerator && !share.is_zero() => {
                share -= unit_at_scale(share);
            }
            _ => break,
        }
    }

    Ok(share)
}

/// Tokens redeemed by `staker_share` out of a pool of `total_share` shares
/// backed by `total_tokens` tokens. Truncates to whole tokens.
pub fn tokens_from_shares(
    staker_share: Decimal,
    total_share: Decimal,
    total_tokens: Decimal,
) -> Result<Decimal> {
    ensure_non_negative(&[staker_share, total_share, total_tokens])?;
    if total_share.is_zero() {
        return Err(Error::DivisorIsZero);
    }
    if staker_share > total_share {
        return Err(Error::InvariantViolation(format!(
            "share {} exceeds pool total {}",
            staker_share, total_share
        )));
    }
    if staker_share == total_share {
        return Ok(total_tokens);
    }

    let numerator = staker_share
        .checked_mul(total_tokens)
        .ok_or_else(|| overflow("staker_share * total_tokens"))?;
    let mut tokens = numerator
        .checked_div(total_share)
        .ok_or_else(|| overflow("numerator / total_share"))?
        .trunc();

    if let Some(product) = tokens.checked_mul(total_share) {
        if product > numerator && tokens > Decimal::ZERO {
            tokens -= Decimal::ONE;
        }
    }

    Ok(tokens.normalize())
}

/// Shares minted by delegating `amount` into `pool`.
///
/// An empty pool mints one share per token.
pub fn calculate_share(pool: &OperatorAssetInfo, amount: Decimal) -> Result<Decimal> {
    if pool.total_amount.is_zero() {
        if !pool.total_share.is_zero() {
            return Err(Error::InvariantViolation(format!(
                "pool has {} shares but no backing tokens",
                pool.total_share
            )));
        }
        return Ok(amount);
    }
    shares_from_tokens(pool.total_share, amount, pool.total_amount)
}

/// Smallest share of `pool` that redeems exactly `tokens`, never more than `cap`.
///
/// The truncated quotient usually redeems one token short, so it is bumped
/// by one share step when that step still redeems no more than `tokens`.
/// When `cap` is worth `tokens` or less, all of `cap` is returned and the
/// caller sees the shortfall in the redeemed amount.
pub fn shares_to_cover(pool: &OperatorAssetInfo, tokens: Decimal, cap: Decimal) -> Result<Decimal> {
    let held = tokens_from_shares(cap, pool.total_share, pool.total_amount)?;
    if held <= tokens {
        return Ok(cap);
    }

    let floor = shares_from_tokens(pool.total_share, tokens, pool.total_amount)?.min(cap);
    if tokens_from_shares(floor, pool.total_share, pool.total_amount)? == tokens {
        return Ok(floor);
    }

    let step = Decimal::new(1, SHARE_DECIMALS);
    let bumped = floor.checked_add(step).unwrap_or(floor).min(cap);
    if tokens_from_shares(bumped, pool.total_share, pool.total_amount)? <= tokens {
        Ok(bumped)
    } else {
        Ok(floor)
    }
}
