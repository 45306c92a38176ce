//! Key layout of the state store
//!
//! Every key starts with a one-byte keyspace prefix. Variable-length
//! components are length-prefixed (`u16` big-endian) so a prefix never
//! matches a longer identifier; heights and nonces are big-endian so byte
//! order equals numeric order.
//!
//! | Prefix | Key | Value |
//! |---|---|---|
//! | `0x01` | staker, asset | `StakerAssetInfo` |
//! | `0x02` | operator, asset | `OperatorAssetInfo` |
//! | `0x11` | staker, asset, operator | `DelegationAmounts` |
//! | `0x12` | operator, asset, staker | empty |
//! | `0x21` | record key | `UndelegationRecord` |
//! | `0x22` | staker, asset, record key | empty |
//! | `0x23` | maturity height, record key | empty |
//! | `0x24` | record key | `u64` hold count |
//! | `0x31` | staker | `OperatorAddress` |
//! | `0xf0` | - | last committed height |

use crate::{
    types::{AssetId, OperatorAddress, RecordKey, StakerId, TxHash},
    Error, Result,
};

/// Staker asset balances
pub const STAKER_ASSET_PREFIX: u8 = 0x01;
/// Operator asset pools
pub const OPERATOR_ASSET_PREFIX: u8 = 0x02;
/// Delegation by (staker, asset, operator)
pub const DELEGATION_PREFIX: u8 = 0x11;
/// Staker index by (operator, asset)
pub const STAKERS_BY_OPERATOR_PREFIX: u8 = 0x12;
/// Undelegation record by primary key
pub const UNDELEGATION_PREFIX: u8 = 0x21;
/// Undelegation record keys by (staker, asset)
pub const STAKER_UNDELEGATION_PREFIX: u8 = 0x22;
/// Undelegation record keys by maturity height
pub const MATURITY_PREFIX: u8 = 0x23;
/// Hold counts by record key
pub const HOLD_COUNT_PREFIX: u8 = 0x24;
/// Associated operator by staker
pub const ASSOCIATION_PREFIX: u8 = 0x31;
/// Last committed block height
pub const LAST_HEIGHT_KEY: &[u8] = &[0xf0];

struct KeyBuilder(Vec<u8>);

impl KeyBuilder {
    fn new(prefix: u8) -> Self {
        Self(vec![prefix])
    }

    fn segment(mut self, part: &str) -> Self {
        let bytes = part.as_bytes();
        // Ids are length-bounded when constructed or deserialized
        debug_assert!(bytes.len() <= u16::MAX as usize);
        self.0.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        self.0.extend_from_slice(bytes);
        self
    }

    fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.0.extend_from_slice(bytes);
        self
    }

    fn build(self) -> Vec<u8> {
        self.0
    }
}

/// Cursor over the components of a stored key
pub struct KeyReader<'a> {
    bytes: &'a [u8],
}

impl<'a> KeyReader<'a> {
    /// Start reading after a known prefix of `skip` bytes
    pub fn new(key: &'a [u8], skip: usize) -> Result<Self> {
        if key.len() < skip {
            return Err(malformed(key));
        }
        Ok(Self { bytes: &key[skip..] })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(malformed(self.bytes));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    /// Next length-prefixed string
    pub fn segment(&mut self) -> Result<String> {
        let len = self.take(2)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| malformed(bytes))
    }

    /// Next big-endian `u64`
    pub fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    /// Next record key
    pub fn record_key(&mut self) -> Result<RecordKey> {
        let operator = OperatorAddress::new(self.segment()?)?;
        let height = self.u64()?;
        let tx_nonce = self.u64()?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.take(32)?);
        Ok(RecordKey {
            operator,
            height,
            tx_nonce,
            tx_hash: TxHash(hash),
        })
    }
}

fn malformed(bytes: &[u8]) -> Error {
    Error::Storage(format!("malformed key: 0x{}", hex::encode(bytes)))
}

fn record_key_bytes(builder: KeyBuilder, key: &RecordKey) -> KeyBuilder {
    builder
        .segment(key.operator.as_str())
        .u64(key.height)
        .u64(key.tx_nonce)
        .raw(&key.tx_hash.0)
}

/// Staker balance for an asset
pub fn staker_asset_key(staker: &StakerId, asset: &AssetId) -> Vec<u8> {
    KeyBuilder::new(STAKER_ASSET_PREFIX)
        .segment(staker.as_str())
        .segment(asset.as_str())
        .build()
}

/// Operator pool for an asset
pub fn operator_asset_key(operator: &OperatorAddress, asset: &AssetId) -> Vec<u8> {
    KeyBuilder::new(OPERATOR_ASSET_PREFIX)
        .segment(operator.as_str())
        .segment(asset.as_str())
        .build()
}

/// Decode (staker, asset) from a staker balance key
pub fn decode_staker_asset_key(key: &[u8]) -> Result<(StakerId, AssetId)> {
    let mut reader = KeyReader::new(key, 1)?;
    let staker = StakerId::parse(reader.segment()?)?;
    let asset = AssetId::parse(reader.segment()?)?;
    Ok((staker, asset))
}

/// Decode (operator, asset) from an operator pool key
pub fn decode_operator_asset_key(key: &[u8]) -> Result<(OperatorAddress, AssetId)> {
    let mut reader = KeyReader::new(key, 1)?;
    let operator = OperatorAddress::new(reader.segment()?)?;
    let asset = AssetId::parse(reader.segment()?)?;
    Ok((operator, asset))
}

/// Delegation of one staker's asset to one operator
pub fn delegation_key(staker: &StakerId, asset: &AssetId, operator: &OperatorAddress) -> Vec<u8> {
    KeyBuilder::new(DELEGATION_PREFIX)
        .segment(staker.as_str())
        .segment(asset.as_str())
        .segment(operator.as_str())
        .build()
}

/// All delegations of one staker's asset
pub fn delegation_prefix(staker: &StakerId, asset: &AssetId) -> Vec<u8> {
    KeyBuilder::new(DELEGATION_PREFIX)
        .segment(staker.as_str())
        .segment(asset.as_str())
        .build()
}

/// All delegations of one staker
pub fn staker_delegation_prefix(staker: &StakerId) -> Vec<u8> {
    KeyBuilder::new(DELEGATION_PREFIX)
        .segment(staker.as_str())
        .build()
}

/// Decode (staker, asset, operator) from a delegation key
pub fn decode_delegation_key(key: &[u8]) -> Result<(StakerId, AssetId, OperatorAddress)> {
    let mut reader = KeyReader::new(key, 1)?;
    let staker = StakerId::parse(reader.segment()?)?;
    let asset = AssetId::parse(reader.segment()?)?;
    let operator = OperatorAddress::new(reader.segment()?)?;
    Ok((staker, asset, operator))
}

/// Staker index entry
pub fn stakers_by_operator_key(
    operator: &OperatorAddress,
    asset: &AssetId,
    staker: &StakerId,
) -> Vec<u8> {
    KeyBuilder::new(STAKERS_BY_OPERATOR_PREFIX)
        .segment(operator.as_str())
        .segment(asset.as_str())
        .segment(staker.as_str())
        .build()
}

/// All stakers delegating an asset to an operator
pub fn stakers_by_operator_prefix(operator: &OperatorAddress, asset: &AssetId) -> Vec<u8> {
    KeyBuilder::new(STAKERS_BY_OPERATOR_PREFIX)
        .segment(operator.as_str())
        .segment(asset.as_str())
        .build()
}

/// Decode (operator, asset, staker) from a staker index key
pub fn decode_stakers_by_operator_key(key: &[u8]) -> Result<(OperatorAddress, AssetId, StakerId)> {
    let mut reader = KeyReader::new(key, 1)?;
    let operator = OperatorAddress::new(reader.segment()?)?;
    let asset = AssetId::parse(reader.segment()?)?;
    let staker = StakerId::parse(reader.segment()?)?;
    Ok((operator, asset, staker))
}

/// Undelegation record
pub fn undelegation_key(key: &RecordKey) -> Vec<u8> {
    record_key_bytes(KeyBuilder::new(UNDELEGATION_PREFIX), key).build()
}

/// Staker undelegation index entry
pub fn staker_undelegation_key(staker: &StakerId, asset: &AssetId, key: &RecordKey) -> Vec<u8> {
    let builder = KeyBuilder::new(STAKER_UNDELEGATION_PREFIX)
        .segment(staker.as_str())
        .segment(asset.as_str());
    record_key_bytes(builder, key).build()
}

/// All undelegations of one staker's asset
pub fn staker_undelegation_prefix(staker: &StakerId, asset: &AssetId) -> Vec<u8> {
    KeyBuilder::new(STAKER_UNDELEGATION_PREFIX)
        .segment(staker.as_str())
        .segment(asset.as_str())
        .build()
}

/// Decode the record key from a staker undelegation index key
pub fn decode_staker_undelegation_key(key: &[u8]) -> Result<RecordKey> {
    let mut reader = KeyReader::new(key, 1)?;
    reader.segment()?;
    reader.segment()?;
    reader.record_key()
}

/// Maturity index entry
pub fn maturity_key(height: u64, key: &RecordKey) -> Vec<u8> {
    record_key_bytes(KeyBuilder::new(MATURITY_PREFIX).u64(height), key).build()
}

/// All records maturing at `height`
pub fn maturity_prefix(height: u64) -> Vec<u8> {
    KeyBuilder::new(MATURITY_PREFIX).u64(height).build()
}

/// Decode (height, record key) from a maturity index key
pub fn decode_maturity_key(key: &[u8]) -> Result<(u64, RecordKey)> {
    let mut reader = KeyReader::new(key, 1)?;
    let height = reader.u64()?;
    Ok((height, reader.record_key()?))
}

/// Hold count of a record
pub fn hold_count_key(key: &RecordKey) -> Vec<u8> {
    record_key_bytes(KeyBuilder::new(HOLD_COUNT_PREFIX), key).build()
}

/// Decode the record key from a hold count key
pub fn decode_hold_count_key(key: &[u8]) -> Result<RecordKey> {
    KeyReader::new(key, 1)?.record_key()
}

/// Associated operator of a staker
pub fn association_key(staker: &StakerId) -> Vec<u8> {
    KeyBuilder::new(ASSOCIATION_PREFIX)
        .segment(staker.as_str())
        .build()
}

/// Decode the staker from an association key
pub fn decode_association_key(key: &[u8]) -> Result<StakerId> {
    StakerId::parse(KeyReader::new(key, 1)?.segment()?)
}
