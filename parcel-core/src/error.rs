//! Error types for PARCEL operations

use crate::{CellKey, OwnerKind, PaidTier};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {entity} {key}")]
    NotFound { entity: String, key: String },

    #[error("Insert failed for {entity} {key}: {reason}")]
    InsertFailed {
        entity: String,
        key: String,
        reason: String,
    },

    #[error("Update failed for {entity} {key}: {reason}")]
    UpdateFailed {
        entity: String,
        key: String,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Why a price quote could not be produced.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CostRejection {
    #[error("free claims exhausted and no paid tier chosen")]
    NoTierChosenAndFreeExhausted,

    #[error("free slot {slot} is beyond the quota of {quota}")]
    FreeQuotaExceeded { slot: u32, quota: u32 },

    #[error("{tier:?} claims cost {expected}, offered {offered}")]
    PriceMismatch {
        tier: PaidTier,
        offered: u32,
        expected: u32,
    },
}

/// Master error type for all PARCEL errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParcelError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cell {cell} is already claimed by {owner_name}")]
    Conflict { cell: CellKey, owner_name: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Cell set is not connected: {groups} separate regions")]
    NotConnected { groups: usize },

    #[error("Cell {cell} is not personally owned by the founder")]
    NotAllOwnedByFounder { cell: CellKey },

    #[error("Cost rejected: {0}")]
    CostRejected(#[from] CostRejection),

    #[error("Claim limit reached: {current} of {limit}")]
    ClaimLimitReached { current: usize, limit: usize },

    #[error("Stale quote: free slot {quoted} requested but next free slot is {expected}")]
    StaleQuote { quoted: u32, expected: u32 },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ParcelError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ParcelError::NotFound { what: what.into() }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        ParcelError::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        ParcelError::InvariantViolation {
            reason: reason.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ParcelError::Validation(ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Errors that indicate a defect rather than a rejected request.
    pub fn is_bug_signal(&self) -> bool {
        matches!(self, ParcelError::InvariantViolation { .. })
    }
}

/// Result type alias for PARCEL operations.
pub type ParcelResult<T> = Result<T, ParcelError>;

/// Outcome of a protection check. `Denied` carries enough to tell the actor whose land it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDecision {
    Allowed,
    Denied {
        owner_name: String,
        owner_kind: OwnerKind,
    },
}

impl ActionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ActionDecision::Allowed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
