//! Genesis import and export
//!
//! A [`GenesisState`] is a JSON snapshot of every keyspace the ledger
//! writes: associations, delegations with their staker index, undelegation
//! records with the maturity index and hold counts, and the balances kept by
//! the in-crate [`AssetStore`](crate::assets::AssetStore).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::{
    association,
    context::Context,
    delegation_state, keys,
    types::{
        AssetId, DelegationAmounts, OperatorAddress, OperatorAssetInfo, RecordKey,
        StakerAssetInfo, StakerId, UndelegationRecord,
    },
    undelegation_state, Error, Result,
};

/// Staker associated with an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationEntry {
    /// Staker
    pub staker_id: StakerId,
    /// Operator
    pub operator: OperatorAddress,
}

/// One delegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationStateEntry {
    /// Staker
    pub staker_id: StakerId,
    /// Asset
    pub asset_id: AssetId,
    /// Operator
    pub operator: OperatorAddress,
    /// Shares and waiting tokens
    pub states: DelegationAmounts,
}

/// Stakers delegating one asset to one operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakersByOperatorEntry {
    /// Operator
    pub operator: OperatorAddress,
    /// Asset
    pub asset_id: AssetId,
    /// Stakers, ascending
    pub stakers: Vec<StakerId>,
}

/// Maturity index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityEntry {
    /// Height the record is swept at
    pub height: u64,
    /// Record
    pub key: RecordKey,
}

/// Non-zero hold count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldCountEntry {
    /// Record
    pub key: RecordKey,
    /// Outstanding holds
    pub count: u64,
}

/// Staker balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerAssetEntry {
    /// Staker
    pub staker_id: StakerId,
    /// Asset
    pub asset_id: AssetId,
    /// Balance
    pub info: StakerAssetInfo,
}

/// Operator pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAssetEntry {
    /// Operator
    pub operator: OperatorAddress,
    /// Asset
    pub asset_id: AssetId,
    /// Pool
    pub info: OperatorAssetInfo,
}

/// Snapshot of the ledger state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    /// Staker to operator associations
    pub associations: Vec<AssociationEntry>,
    /// Delegations
    pub delegation_states: Vec<DelegationStateEntry>,
    /// Per-operator staker index
    pub stakers_by_operator: Vec<StakersByOperatorEntry>,
    /// Undelegation records, pending and completed
    pub undelegations: Vec<UndelegationRecord>,
    /// Maturity index of pending records
    pub maturity_index: Vec<MaturityEntry>,
    /// Hold counts
    pub hold_counts: Vec<HoldCountEntry>,
    /// Staker balances
    pub staker_assets: Vec<StakerAssetEntry>,
    /// Operator pools
    pub operator_assets: Vec<OperatorAssetEntry>,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidGenesis(msg.into())
}

fn check_ids(staker: Option<&StakerId>, asset: Option<&AssetId>) -> Result<()> {
    if let Some(staker) = staker {
        StakerId::parse(staker.as_str())?;
    }
    if let Some(asset) = asset {
        AssetId::parse(asset.as_str())?;
    }
    Ok(())
}

fn check_operator(operator: &OperatorAddress) -> Result<()> {
    OperatorAddress::new(operator.as_str()).map(|_| ())
}

fn check_amount(what: &str, value: Decimal, integral: bool) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(invalid(format!("{} is negative: {}", what, value)));
    }
    if integral && !value.fract().is_zero() {
        return Err(invalid(format!("{} is not a whole amount: {}", what, value)));
    }
    Ok(())
}

impl GenesisState {
    /// Read from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the snapshot is internally consistent
    pub fn validate(&self) -> Result<()> {
        let mut stakers = BTreeSet::new();
        for entry in &self.associations {
            check_ids(Some(&entry.staker_id), None)?;
            check_operator(&entry.operator)?;
            if !stakers.insert(&entry.staker_id) {
                return Err(invalid(format!("duplicate association for {}", entry.staker_id)));
            }
        }

        let mut delegations = BTreeSet::new();
        for entry in &self.delegation_states {
            check_ids(Some(&entry.staker_id), Some(&entry.asset_id))?;
            check_operator(&entry.operator)?;
            check_amount("undelegatable_share", entry.states.undelegatable_share, false)?;
            check_amount(
                "wait_undelegation_amount",
                entry.states.wait_undelegation_amount,
                true,
            )?;
            if !delegations.insert((&entry.operator, &entry.asset_id, &entry.staker_id)) {
                return Err(invalid(format!(
                    "duplicate delegation {}/{}/{}",
                    entry.staker_id, entry.asset_id, entry.operator
                )));
            }
        }

        let mut indexed = BTreeSet::new();
        for entry in &self.stakers_by_operator {
            check_ids(None, Some(&entry.asset_id))?;
            check_operator(&entry.operator)?;
            for staker in &entry.stakers {
                check_ids(Some(staker), None)?;
                if !indexed.insert((&entry.operator, &entry.asset_id, staker)) {
                    return Err(invalid(format!(
                        "duplicate staker index entry {}/{}/{}",
                        entry.operator, entry.asset_id, staker
                    )));
                }
                if !delegations.contains(&(&entry.operator, &entry.asset_id, staker)) {
                    return Err(invalid(format!(
                        "staker index entry {}/{}/{} has no delegation",
                        entry.operator, entry.asset_id, staker
                    )));
                }
            }
        }

        let mut records = BTreeMap::new();
        for record in &self.undelegations {
            check_ids(Some(&record.staker_id), Some(&record.asset_id))?;
            check_operator(&record.operator)?;
            check_amount("amount", record.amount, true)?;
            check_amount("actual_completed_amount", record.actual_completed_amount, true)?;
            if record.actual_completed_amount > record.amount {
                return Err(invalid(format!(
                    "undelegation {} completes more than requested",
                    record.key()
                )));
            }
            if records.insert(record.key(), record).is_some() {
                return Err(invalid(format!("duplicate undelegation {}", record.key())));
            }
        }

        let mut scheduled = BTreeSet::new();
        for entry in &self.maturity_index {
            match records.get(&entry.key) {
                Some(record) if record.is_pending => {}
                _ => {
                    return Err(invalid(format!(
                        "maturity entry {} at {} has no pending record",
                        entry.key, entry.height
                    )))
                }
            }
            if !scheduled.insert(&entry.key) {
                return Err(invalid(format!("undelegation {} scheduled twice", entry.key)));
            }
        }
        for (key, record) in &records {
            if record.is_pending && !scheduled.contains(key) {
                return Err(invalid(format!(
                    "pending undelegation {} missing from the maturity index",
                    key
                )));
            }
        }

        let mut held = BTreeSet::new();
        for entry in &self.hold_counts {
            if entry.count == 0 {
                return Err(invalid(format!("zero hold count for {}", entry.key)));
            }
            if !records.contains_key(&entry.key) {
                return Err(invalid(format!("hold on unknown undelegation {}", entry.key)));
            }
            if !held.insert(&entry.key) {
                return Err(invalid(format!("duplicate hold count for {}", entry.key)));
            }
        }

        let mut balances = BTreeSet::new();
        for entry in &self.staker_assets {
            check_ids(Some(&entry.staker_id), Some(&entry.asset_id))?;
            let info = &entry.info;
            check_amount("total_deposit_amount", info.total_deposit_amount, true)?;
            check_amount("withdrawable_amount", info.withdrawable_amount, true)?;
            check_amount(
                "pending_undelegation_amount",
                info.pending_undelegation_amount,
                true,
            )?;
            let held = info
                .withdrawable_amount
                .checked_add(info.pending_undelegation_amount)
                .ok_or_else(|| invalid(format!("staker {} balance overflows", entry.staker_id)))?;
            if held > info.total_deposit_amount {
                return Err(invalid(format!(
                    "staker {} asset {} holds more than deposited",
                    entry.staker_id, entry.asset_id
                )));
            }
            if !balances.insert((&entry.staker_id, &entry.asset_id)) {
                return Err(invalid(format!(
                    "duplicate balance {}/{}",
                    entry.staker_id, entry.asset_id
                )));
            }
        }

        let mut pools = BTreeSet::new();
        for entry in &self.operator_assets {
            check_ids(None, Some(&entry.asset_id))?;
            check_operator(&entry.operator)?;
            let info = &entry.info;
            check_amount("total_amount", info.total_amount, true)?;
            check_amount("total_share", info.total_share, false)?;
            check_amount("operator_share", info.operator_share, false)?;
            check_amount(
                "pending_undelegation_amount",
                info.pending_undelegation_amount,
                true,
            )?;
            if info.total_share.is_zero() != info.total_amount.is_zero() {
                return Err(invalid(format!(
                    "pool {}/{} has shares without tokens or tokens without shares",
                    entry.operator, entry.asset_id
                )));
            }
            if info.operator_share > info.total_share {
                return Err(invalid(format!(
                    "pool {}/{} operator share exceeds total",
                    entry.operator, entry.asset_id
                )));
            }
            if !pools.insert((&entry.operator, &entry.asset_id)) {
                return Err(invalid(format!(
                    "duplicate pool {}/{}",
                    entry.operator, entry.asset_id
                )));
            }
        }

        Ok(())
    }
}

/// Snapshot every ledger keyspace
pub fn export_genesis(ctx: &Context<'_>) -> Result<GenesisState> {
    let associations = association::all_associations(ctx)?
        .into_iter()
        .map(|(staker_id, operator)| AssociationEntry {
            staker_id,
            operator,
        })
        .collect();

    let delegation_states = delegation_state::all_delegations(ctx)?
        .into_iter()
        .map(|(staker_id, asset_id, operator, states)| DelegationStateEntry {
            staker_id,
            asset_id,
            operator,
            states,
        })
        .collect();

    let mut stakers_by_operator: Vec<StakersByOperatorEntry> = Vec::new();
    for (operator, asset_id, staker) in delegation_state::all_stakers_by_operator(ctx)? {
        match stakers_by_operator.last_mut() {
            Some(last) if last.operator == operator && last.asset_id == asset_id => {
                last.stakers.push(staker)
            }
            _ => stakers_by_operator.push(StakersByOperatorEntry {
                operator,
                asset_id,
                stakers: vec![staker],
            }),
        }
    }

    let maturity_index = undelegation_state::all_maturity_entries(ctx)?
        .into_iter()
        .map(|(height, key)| MaturityEntry { height, key })
        .collect();

    let hold_counts = undelegation_state::all_hold_counts(ctx)?
        .into_iter()
        .map(|(key, count)| HoldCountEntry { key, count })
        .collect();

    let staker_assets = ctx
        .scan::<StakerAssetInfo>(&[keys::STAKER_ASSET_PREFIX])?
        .into_iter()
        .map(|(key, info)| {
            let (staker_id, asset_id) = keys::decode_staker_asset_key(&key)?;
            Ok(StakerAssetEntry {
                staker_id,
                asset_id,
                info,
            })
        })
        .collect::<Result<_>>()?;

    let operator_assets = ctx
        .scan::<OperatorAssetInfo>(&[keys::OPERATOR_ASSET_PREFIX])?
        .into_iter()
        .map(|(key, info)| {
            let (operator, asset_id) = keys::decode_operator_asset_key(&key)?;
            Ok(OperatorAssetEntry {
                operator,
                asset_id,
                info,
            })
        })
        .collect::<Result<_>>()?;

    Ok(GenesisState {
        associations,
        delegation_states,
        stakers_by_operator,
        undelegations: undelegation_state::all_records(ctx)?,
        maturity_index,
        hold_counts,
        staker_assets,
        operator_assets,
    })
}

/// Load a validated snapshot into the context
pub fn init_genesis(ctx: &mut Context<'_>, state: &GenesisState) -> Result<()> {
    state.validate()?;

    for entry in &state.associations {
        association::set_association(ctx, &entry.staker_id, &entry.operator)?;
    }
    for entry in &state.delegation_states {
        delegation_state::set_delegation(
            ctx,
            &entry.staker_id,
            &entry.asset_id,
            &entry.operator,
            &entry.states,
        )?;
    }
    for entry in &state.stakers_by_operator {
        for staker in &entry.stakers {
            delegation_state::set_staker_for_operator(ctx, &entry.operator, &entry.asset_id, staker)?;
        }
    }
    for record in &state.undelegations {
        undelegation_state::import_record(ctx, record)?;
    }
    for entry in &state.maturity_index {
        undelegation_state::import_maturity_entry(ctx, entry.height, &entry.key)?;
    }
    for entry in &state.hold_counts {
        undelegation_state::import_hold_count(ctx, &entry.key, entry.count)?;
    }
    for entry in &state.staker_assets {
        ctx.set(
            keys::staker_asset_key(&entry.staker_id, &entry.asset_id),
            &entry.info,
        )?;
    }
    for entry in &state.operator_assets {
        ctx.set(
            keys::operator_asset_key(&entry.operator, &entry.asset_id),
            &entry.info,
        )?;
    }

    tracing::info!(
        associations = state.associations.len(),
        delegations = state.delegation_states.len(),
        undelegations = state.undelegations.len(),
        "Genesis imported"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{AssetRegistry, AssetStore},
        engine::DelegationEngine,
        operators::OperatorSet,
        storage::MemStore,
        types::{BlockInfo, DelegationParams, StakerAssetDelta, TxHash},
    };
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn populated_store() -> MemStore {
        let operators = Arc::new(OperatorSet::new());
        operators.register(OperatorAddress::new("op1").unwrap(), 5);
        let engine = DelegationEngine::new(operators, Arc::new(AssetStore::new()));

        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(3));
        let params = |amount, nonce: u64| DelegationParams {
            client_chain_id: 1,
            asset_address: vec![0xaa; 20],
            staker_address: vec![0x01; 20],
            operator: OperatorAddress::new("op1").unwrap(),
            amount,
            tx_hash: TxHash([nonce as u8; 32]),
            tx_nonce: nonce,
        };
        let p = params(dec!(30), 1);
        let staker = p.staker_id().unwrap();
        engine
            .assets()
            .apply_staker_delta(
                &mut ctx,
                &staker,
                &p.asset_id().unwrap(),
                &StakerAssetDelta {
                    total_deposit_amount: dec!(30),
                    withdrawable_amount: dec!(30),
                    ..Default::default()
                },
            )
            .unwrap();
        engine.delegate_to(&mut ctx, &p).unwrap();
        engine
            .associate_operator_with_staker(&mut ctx, &staker, &p.operator)
            .unwrap();
        let key = engine.undelegate_from(&mut ctx, &params(dec!(10), 2)).unwrap();
        engine
            .increment_undelegation_hold_count(&mut ctx, &key)
            .unwrap();
        ctx.commit().unwrap();
        store
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut store = populated_store();
        let exported = export_genesis(&Context::new(&mut store, BlockInfo::at(3))).unwrap();
        exported.validate().unwrap();
        assert_eq!(exported.associations.len(), 1);
        assert_eq!(exported.delegation_states.len(), 1);
        assert_eq!(exported.stakers_by_operator[0].stakers.len(), 1);
        assert_eq!(exported.undelegations.len(), 1);
        assert_eq!(exported.maturity_index[0].height, 8);
        assert_eq!(exported.hold_counts[0].count, 1);

        let json = serde_json::to_string(&exported).unwrap();
        let parsed: GenesisState = serde_json::from_str(&json).unwrap();

        let mut fresh = MemStore::new();
        let mut ctx = Context::new(&mut fresh, BlockInfo::at(3));
        init_genesis(&mut ctx, &parsed).unwrap();
        ctx.commit().unwrap();

        let reexported = export_genesis(&Context::new(&mut fresh, BlockInfo::at(3))).unwrap();
        assert_eq!(reexported, exported);
        assert_eq!(fresh.len(), store.len());
    }

    #[test]
    fn test_validate_rejects_duplicate_association() {
        let entry = AssociationEntry {
            staker_id: StakerId::new(&[1], 1).unwrap(),
            operator: OperatorAddress::new("op1").unwrap(),
        };
        let state = GenesisState {
            associations: vec![entry.clone(), entry],
            ..Default::default()
        };
        assert!(matches!(state.validate(), Err(Error::InvalidGenesis(_))));
    }

    #[test]
    fn test_validate_rejects_unscheduled_pending_record() {
        let mut store = populated_store();
        let mut state = export_genesis(&Context::new(&mut store, BlockInfo::at(3))).unwrap();
        state.maturity_index.clear();
        state.hold_counts.clear();
        assert!(matches!(state.validate(), Err(Error::InvalidGenesis(_))));
    }

    #[test]
    fn test_validate_rejects_index_without_delegation() {
        let mut store = populated_store();
        let mut state = export_genesis(&Context::new(&mut store, BlockInfo::at(3))).unwrap();
        state.delegation_states.clear();
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_id() {
        let state: GenesisState = serde_json::from_str(
            r#"{"associations":[{"staker_id":"not-an-id","operator":"op1"}]}"#,
        )
        .unwrap();
        assert!(matches!(state.validate(), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        let state = GenesisState::default();
        state.to_file(&path).unwrap();
        assert_eq!(GenesisState::from_file(&path).unwrap(), state);
    }
}
