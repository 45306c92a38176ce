//! Undelegation queue
//!
//! Records are stored under their primary key and indexed twice: by
//! (staker, asset) for queries and slashing, and by maturity height for the
//! end-of-block sweep. Completed records stay in the primary keyspace and
//! the staker index; only the maturity entry is removed.
//!
//! Other modules may hold a record past its maturity height by raising its
//! hold count.

use crate::{
    context::Context,
    keys,
    types::{AssetId, RecordKey, StakerId, UndelegationFilter, UndelegationRecord},
    Error, Result,
};

/// Look up a record
pub fn get_record(ctx: &Context<'_>, key: &RecordKey) -> Result<Option<UndelegationRecord>> {
    ctx.get(&keys::undelegation_key(key))
}

/// Look up a record that must exist
pub fn must_get_record(ctx: &Context<'_>, key: &RecordKey) -> Result<UndelegationRecord> {
    get_record(ctx, key)?.ok_or_else(|| Error::UndelegationNotFound(key.to_string()))
}

/// Overwrite a record's fields; indexes are untouched
pub fn set_record(ctx: &mut Context<'_>, record: &UndelegationRecord) -> Result<()> {
    ctx.set(keys::undelegation_key(&record.key()), record)
}

/// Store a new record under all three indexes
pub fn insert_record(ctx: &mut Context<'_>, record: &UndelegationRecord) -> Result<RecordKey> {
    let key = record.key();
    if ctx.has(&keys::undelegation_key(&key))? {
        return Err(Error::InvariantViolation(format!(
            "undelegation {} already exists",
            key
        )));
    }

    set_record(ctx, record)?;
    ctx.set_marker(keys::staker_undelegation_key(
        &record.staker_id,
        &record.asset_id,
        &key,
    ))?;
    ctx.set_marker(keys::maturity_key(record.completed_height, &key))?;

    tracing::debug!(
        record = %key,
        staker = %record.staker_id,
        asset = %record.asset_id,
        maturity = record.completed_height,
        "Undelegation queued"
    );

    Ok(key)
}

/// Record keys of one staker's asset, ascending
pub fn staker_record_keys(
    ctx: &Context<'_>,
    staker: &StakerId,
    asset: &AssetId,
) -> Result<Vec<RecordKey>> {
    ctx.keys(&keys::staker_undelegation_prefix(staker, asset))?
        .iter()
        .map(|key| keys::decode_staker_undelegation_key(key))
        .collect()
}

/// Records of one staker's asset passing `filter`, ascending by key
pub fn staker_records(
    ctx: &Context<'_>,
    staker: &StakerId,
    asset: &AssetId,
    filter: UndelegationFilter,
) -> Result<Vec<UndelegationRecord>> {
    let mut records = Vec::new();
    for key in staker_record_keys(ctx, staker, asset)? {
        let record = must_get_record(ctx, &key)?;
        if filter.matches(&record) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Keys indexed to mature at `height`, ascending
pub fn keys_maturing_at(ctx: &Context<'_>, height: u64) -> Result<Vec<RecordKey>> {
    ctx.keys(&keys::maturity_prefix(height))?
        .iter()
        .map(|key| keys::decode_maturity_key(key).map(|(_, record)| record))
        .collect()
}

/// Move a record's maturity entry from one height to another
pub fn reschedule(ctx: &mut Context<'_>, key: &RecordKey, from: u64, to: u64) -> Result<()> {
    let old = keys::maturity_key(from, key);
    if !ctx.has(&old)? {
        return Err(Error::InvariantViolation(format!(
            "undelegation {} is not indexed at height {}",
            key, from
        )));
    }
    ctx.delete(&old)?;
    ctx.set_marker(keys::maturity_key(to, key))
}

/// Drop a record's maturity entry once it has completed
pub fn remove_maturity_entry(ctx: &mut Context<'_>, height: u64, key: &RecordKey) -> Result<()> {
    ctx.delete(&keys::maturity_key(height, key))
}

/// Every maturity index entry, ascending by height
pub fn all_maturity_entries(ctx: &Context<'_>) -> Result<Vec<(u64, RecordKey)>> {
    ctx.keys(&[keys::MATURITY_PREFIX])?
        .iter()
        .map(|key| keys::decode_maturity_key(key))
        .collect()
}

/// Every record, ascending by primary key
pub fn all_records(ctx: &Context<'_>) -> Result<Vec<UndelegationRecord>> {
    Ok(ctx
        .scan::<UndelegationRecord>(&[keys::UNDELEGATION_PREFIX])?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Current hold count of a record
pub fn hold_count(ctx: &Context<'_>, key: &RecordKey) -> Result<u64> {
    Ok(ctx.get(&keys::hold_count_key(key))?.unwrap_or(0))
}

fn set_hold_count(ctx: &mut Context<'_>, key: &RecordKey, count: u64) -> Result<()> {
    let store_key = keys::hold_count_key(key);
    if count == 0 {
        ctx.delete(&store_key)
    } else {
        ctx.set(store_key, &count)
    }
}

/// Place a hold on a pending record
pub fn increment_hold_count(ctx: &mut Context<'_>, key: &RecordKey) -> Result<u64> {
    let record = must_get_record(ctx, key)?;
    if !record.is_pending {
        return Err(Error::InvariantViolation(format!(
            "undelegation {} already completed",
            key
        )));
    }

    let count = hold_count(ctx, key)?
        .checked_add(1)
        .ok_or_else(|| Error::ArithmeticOverflow(format!("hold count of {}", key)))?;
    set_hold_count(ctx, key, count)?;

    tracing::debug!(record = %key, holds = count, "Undelegation hold placed");
    Ok(count)
}

/// Release a hold on a record
pub fn decrement_hold_count(ctx: &mut Context<'_>, key: &RecordKey) -> Result<u64> {
    let count = hold_count(ctx, key)?
        .checked_sub(1)
        .ok_or_else(|| Error::HoldCountUnderflow(key.to_string()))?;
    set_hold_count(ctx, key, count)?;

    tracing::debug!(record = %key, holds = count, "Undelegation hold released");
    Ok(count)
}

/// Every non-zero hold count, ascending by key
pub fn all_hold_counts(ctx: &Context<'_>) -> Result<Vec<(RecordKey, u64)>> {
    ctx.scan::<u64>(&[keys::HOLD_COUNT_PREFIX])?
        .into_iter()
        .map(|(key, count)| Ok((keys::decode_hold_count_key(&key)?, count)))
        .collect()
}

/// Write index entries verbatim (genesis import)
pub(crate) fn import_record(
    ctx: &mut Context<'_>,
    record: &UndelegationRecord,
) -> Result<()> {
    set_record(ctx, record)?;
    ctx.set_marker(keys::staker_undelegation_key(
        &record.staker_id,
        &record.asset_id,
        &record.key(),
    ))
}

/// Write a maturity entry verbatim (genesis import)
pub(crate) fn import_maturity_entry(
    ctx: &mut Context<'_>,
    height: u64,
    key: &RecordKey,
) -> Result<()> {
    ctx.set_marker(keys::maturity_key(height, key))
}

/// Write a hold count verbatim (genesis import)
pub(crate) fn import_hold_count(ctx: &mut Context<'_>, key: &RecordKey, count: u64) -> Result<()> {
    set_hold_count(ctx, key, count)
}
