//! Core types for the delegation ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode in the store, JSON in genesis files)
//! - Exact arithmetic (Decimal for token amounts and shares)
//!
//! Token amounts are whole numbers held in `Decimal`. Shares are fractional.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Maximum length of a client-chain address in bytes
pub const MAX_ADDRESS_LEN: usize = 32;

/// Maximum length of an operator address in bytes
pub const MAX_OPERATOR_ADDRESS_LEN: usize = 128;

fn chain_scoped_id(address: &[u8], client_chain_id: u64) -> Result<String> {
    if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
        return Err(Error::InvalidAddress(format!(
            "address must be 1..={} bytes, got {}",
            MAX_ADDRESS_LEN,
            address.len()
        )));
    }
    Ok(format!("0x{}_0x{:x}", hex::encode(address), client_chain_id))
}

fn validate_chain_scoped_id(id: &str) -> Result<()> {
    let invalid = || Error::InvalidAddress(format!("malformed id: {}", id));

    let (address, chain) = id.split_once('_').ok_or_else(invalid)?;
    let address = address.strip_prefix("0x").ok_or_else(invalid)?;
    let chain = chain.strip_prefix("0x").ok_or_else(invalid)?;

    let bytes = hex::decode(address).map_err(|_| invalid())?;
    if bytes.is_empty() || bytes.len() > MAX_ADDRESS_LEN {
        return Err(invalid());
    }
    u64::from_str_radix(chain, 16).map_err(|_| invalid())?;
    Ok(())
}

/// Staker identifier: `0x{address}_0x{client chain id}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StakerId(String);

impl StakerId {
    /// Build from a client-chain address and chain ID
    pub fn new(address: &[u8], client_chain_id: u64) -> Result<Self> {
        chain_scoped_id(address, client_chain_id).map(Self)
    }

    /// Parse an already formatted ID
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_chain_scoped_id(&id)?;
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset identifier: `0x{token address}_0x{client chain id}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    /// Build from a token address and chain ID
    pub fn new(address: &[u8], client_chain_id: u64) -> Result<Self> {
        chain_scoped_id(address, client_chain_id).map(Self)
    }

    /// Parse an already formatted ID
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_chain_scoped_id(&id)?;
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operator account address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct OperatorAddress(String);

impl OperatorAddress {
    /// Create a new operator address
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(Error::InvalidAddress(format!(
                "malformed operator address: {:?}",
                address
            )));
        }
        if address.len() > MAX_OPERATOR_ADDRESS_LEN {
            return Err(Error::InvalidAddress(format!(
                "operator address must be at most {} bytes, got {}",
                MAX_OPERATOR_ADDRESS_LEN,
                address.len()
            )));
        }
        Ok(Self(address))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperatorAddress {
    type Error = Error;

    fn try_from(address: String) -> Result<Self> {
        Self::new(address)
    }
}

impl fmt::Display for OperatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash that created an undelegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Block the ledger is executing in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Current block height
    pub height: u64,

    /// Replaying blocks after a chain restart; frozen-operator checks are skipped
    pub is_replay: bool,
}

impl BlockInfo {
    /// Normal block execution at `height`
    pub fn at(height: u64) -> Self {
        Self {
            height,
            is_replay: false,
        }
    }
}

/// Input for DelegateTo and UndelegateFrom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationParams {
    /// Client chain the asset lives on
    pub client_chain_id: u64,

    /// Token address on the client chain
    pub asset_address: Vec<u8>,

    /// Staker address on the client chain
    pub staker_address: Vec<u8>,

    /// Operator receiving (or losing) the delegation
    pub operator: OperatorAddress,

    /// Token amount
    pub amount: Decimal,

    /// Hash of the submitting transaction
    pub tx_hash: TxHash,

    /// Per-transaction nonce
    pub tx_nonce: u64,
}

impl DelegationParams {
    /// Derived staker ID
    pub fn staker_id(&self) -> Result<StakerId> {
        StakerId::new(&self.staker_address, self.client_chain_id)
    }

    /// Derived asset ID
    pub fn asset_id(&self) -> Result<AssetId> {
        AssetId::new(&self.asset_address, self.client_chain_id)
    }
}

/// Per-staker asset balance (owned by the asset registry)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerAssetInfo {
    /// Everything the staker has deposited and not withdrawn or lost
    pub total_deposit_amount: Decimal,

    /// Free balance, available to delegate or withdraw
    pub withdrawable_amount: Decimal,

    /// Undelegated tokens waiting for maturity
    pub pending_undelegation_amount: Decimal,
}

/// Signed change applied to a `StakerAssetInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerAssetDelta {
    /// Change of `total_deposit_amount`
    pub total_deposit_amount: Decimal,
    /// Change of `withdrawable_amount`
    pub withdrawable_amount: Decimal,
    /// Change of `pending_undelegation_amount`
    pub pending_undelegation_amount: Decimal,
}

/// Per-operator asset pool (owned by the asset registry)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAssetInfo {
    /// Tokens backing all delegators' shares
    pub total_amount: Decimal,

    /// Sum of all delegators' shares
    pub total_share: Decimal,

    /// Shares held by the stakers associated with this operator
    pub operator_share: Decimal,

    /// Undelegated tokens waiting for maturity
    pub pending_undelegation_amount: Decimal,
}

impl OperatorAssetInfo {
    /// Pool holds no shares
    pub fn is_empty(&self) -> bool {
        self.total_share.is_zero()
    }
}

/// Signed change applied to an `OperatorAssetInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAssetDelta {
    /// Change of `total_amount`
    pub total_amount: Decimal,
    /// Change of `total_share`
    pub total_share: Decimal,
    /// Change of `operator_share`
    pub operator_share: Decimal,
    /// Change of `pending_undelegation_amount`
    pub pending_undelegation_amount: Decimal,
}

/// Delegation state for one (staker, asset, operator)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationAmounts {
    /// Shares still delegated
    pub undelegatable_share: Decimal,

    /// Tokens already converted out of shares, waiting for maturity
    pub wait_undelegation_amount: Decimal,
}

impl DelegationAmounts {
    /// Nothing delegated and nothing pending
    pub fn is_zero(&self) -> bool {
        self.undelegatable_share.is_zero() && self.wait_undelegation_amount.is_zero()
    }
}

/// Signed change applied to a `DelegationAmounts`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationDelta {
    /// Change of `undelegatable_share`
    pub undelegatable_share: Decimal,
    /// Change of `wait_undelegation_amount`
    pub wait_undelegation_amount: Decimal,
}

/// Query view of one delegation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleDelegationInfo {
    /// Shares still delegated
    pub undelegatable_share: Decimal,

    /// Tokens waiting for maturity
    pub wait_undelegation_amount: Decimal,

    /// Tokens the shares redeem at the operator's current rate
    pub max_undelegatable_amount: Decimal,
}

/// Query view of all delegations of one staker's asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationInfo {
    /// Sum of `max_undelegatable_amount` across operators
    pub total_delegated_amount: Decimal,

    /// Per-operator view
    pub delegations: BTreeMap<OperatorAddress, SingleDelegationInfo>,
}

/// Primary key of an undelegation record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Operator undelegated from
    pub operator: OperatorAddress,
    /// Height the undelegation was submitted at
    pub height: u64,
    /// Per-transaction nonce
    pub tx_nonce: u64,
    /// Submitting transaction hash
    pub tx_hash: TxHash,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.operator, self.height, self.tx_nonce, self.tx_hash
        )
    }
}

/// Pending or completed undelegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndelegationRecord {
    /// Staker who undelegated
    pub staker_id: StakerId,

    /// Asset undelegated
    pub asset_id: AssetId,

    /// Operator undelegated from
    pub operator: OperatorAddress,

    /// Submitting transaction hash
    pub tx_hash: TxHash,

    /// Per-transaction nonce
    pub tx_nonce: u64,

    /// Height the undelegation was submitted at
    pub block_number: u64,

    /// Height the undelegation matures at
    pub completed_height: u64,

    /// Amount requested by the staker
    pub amount: Decimal,

    /// Amount that will be credited at completion (reduced by slashing)
    pub actual_completed_amount: Decimal,

    /// Still waiting for maturity
    pub is_pending: bool,
}

impl UndelegationRecord {
    /// Primary key of this record
    pub fn key(&self) -> RecordKey {
        RecordKey {
            operator: self.operator.clone(),
            height: self.block_number,
            tx_nonce: self.tx_nonce,
            tx_hash: self.tx_hash,
        }
    }
}

/// Filter for staker undelegation queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndelegationFilter {
    /// Not yet completed
    Pending,
    /// Completed
    Completed,
    /// Both
    All,
}

impl UndelegationFilter {
    /// Whether a record passes the filter
    pub fn matches(&self, record: &UndelegationRecord) -> bool {
        match self {
            UndelegationFilter::Pending => record.is_pending,
            UndelegationFilter::Completed => !record.is_pending,
            UndelegationFilter::All => true,
        }
    }
}

/// Outcome of one maturity sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Height swept
    pub height: u64,
    /// Records completed at this height
    pub completed: Vec<RecordKey>,
    /// Records deferred to the next height by a hold
    pub deferred: Vec<RecordKey>,
}

/// Outcome of a native restaking balance update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlashOutcome {
    /// Taken from the withdrawable balance
    pub from_withdrawable: Decimal,
    /// Taken from pending undelegations
    pub from_pending_undelegations: Decimal,
    /// Taken from delegated shares
    pub from_delegations: Decimal,
    /// Left over after every tier was exhausted
    pub shortfall: Decimal,
}

impl SlashOutcome {
    /// Total amount actually slashed
    pub fn total_slashed(&self) -> Decimal {
        self.from_withdrawable + self.from_pending_undelegations + self.from_delegations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staker_id_format() {
        let staker = StakerId::new(&[0xab, 0xcd], 101).unwrap();
        assert_eq!(staker.as_str(), "0xabcd_0x65");
        assert!(StakerId::parse("0xabcd_0x65").is_ok());
    }

    #[test]
    fn test_malformed_ids_rejected() {
        assert!(StakerId::new(&[], 1).is_err());
        assert!(StakerId::new(&[0u8; 33], 1).is_err());
        assert!(AssetId::parse("abcd_0x1").is_err());
        assert!(AssetId::parse("0xzz_0x1").is_err());
        assert!(AssetId::parse("0xab").is_err());
        assert!(OperatorAddress::new("").is_err());
        assert!(OperatorAddress::new("op 1").is_err());
        assert!(OperatorAddress::new("o".repeat(MAX_OPERATOR_ADDRESS_LEN)).is_ok());
        assert!(matches!(
            OperatorAddress::new("o".repeat(70_000)),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_operator_address_checked_on_deserialize() {
        let oversized = serde_json::to_string(&"o".repeat(MAX_OPERATOR_ADDRESS_LEN + 1)).unwrap();
        assert!(serde_json::from_str::<OperatorAddress>(&oversized).is_err());
        assert!(serde_json::from_str::<OperatorAddress>("\"op1\"").is_ok());
    }

    #[test]
    fn test_filter_matches() {
        let mut record = UndelegationRecord {
            staker_id: StakerId::new(&[1], 1).unwrap(),
            asset_id: AssetId::new(&[2], 1).unwrap(),
            operator: OperatorAddress::new("op1").unwrap(),
            tx_hash: TxHash([0u8; 32]),
            tx_nonce: 0,
            block_number: 1,
            completed_height: 10,
            amount: Decimal::from(5),
            actual_completed_amount: Decimal::from(5),
            is_pending: true,
        };
        assert!(UndelegationFilter::Pending.matches(&record));
        assert!(!UndelegationFilter::Completed.matches(&record));
        record.is_pending = false;
        assert!(UndelegationFilter::Completed.matches(&record));
        assert!(UndelegationFilter::All.matches(&record));
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey {
            operator: OperatorAddress::new("op1").unwrap(),
            height: 7,
            tx_nonce: 2,
            tx_hash: TxHash([0u8; 32]),
        };
        assert!(key.to_string().starts_with("op1/7/2/0x0000"));
    }
}
