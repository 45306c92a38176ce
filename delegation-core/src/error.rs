//! Error types for the delegation ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Validation and balance errors are always returned before anything is
/// written. `InvariantViolation` aborts the enclosing operation; its buffered
/// writes are dropped by the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Delegation or undelegation amount is zero or negative
    #[error("Amount must be positive, got {0}")]
    AmountNotPositive(Decimal),

    /// Token amount is not a whole number of base units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed staker, asset or operator address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operator is not registered
    #[error("Operator does not exist: {0}")]
    OperatorNotExist(String),

    /// Operator is frozen and cannot receive delegations
    #[error("Operator is frozen: {0}")]
    OperatorIsFrozen(String),

    /// Staker's withdrawable balance is smaller than the delegation amount
    #[error("Delegation amount {amount} exceeds withdrawable balance {withdrawable}")]
    DelegationAmountTooBig {
        /// Requested amount
        amount: Decimal,
        /// Available withdrawable balance
        withdrawable: Decimal,
    },

    /// Undelegation would burn more shares than the staker holds
    #[error("Insufficient shares: need {required}, have {available}")]
    InsufficientShares {
        /// Shares needed to redeem the requested amount
        required: Decimal,
        /// Undelegatable shares held
        available: Decimal,
    },

    /// Division by a zero pool total
    #[error("Divisor is zero")]
    DivisorIsZero,

    /// Decimal arithmetic overflowed
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    /// Staker already has an associated operator
    #[error("Staker {staker} is already associated with operator {operator}")]
    OperatorAlreadyAssociated {
        /// Staker ID
        staker: String,
        /// Currently associated operator
        operator: String,
    },

    /// Staker has no associated operator
    #[error("No operator associated with staker {0}")]
    NoAssociatedOperatorByStaker(String),

    /// Undelegation record not found
    #[error("Undelegation record not found: {0}")]
    UndelegationNotFound(String),

    /// Hold count would drop below zero
    #[error("Hold count underflow for undelegation {0}")]
    HoldCountUnderflow(String),

    /// Invariant violation (negative balance, share/amount mismatch, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Genesis state failed validation
    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON error (genesis files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// True for errors caused by caller input rather than ledger state or IO
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::AmountNotPositive(_)
                | Error::InvalidAmount(_)
                | Error::InvalidAddress(_)
                | Error::OperatorNotExist(_)
                | Error::OperatorIsFrozen(_)
        )
    }
}
