//! Error taxonomy for inventory and request operations.

use crate::types::BloodType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for blood bank operations.
pub type Result<T> = std::result::Result<T, BloodBankError>;

/// Every failure the engine reports to its caller.
///
/// Domain-rule violations are never retried internally; the caller inspects
/// the kind and decides (for example accept a partial allocation after an
/// [`BloodBankError::InsufficientStock`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BloodBankError {
    /// Malformed, missing or out-of-range input. Nothing was mutated.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown unit, request or donor.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record ("unit", "request", "donor")
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Illegal status transition or lost conditional write.
    #[error("Conflict on {entity} {id}: {reason} (current status: {current})")]
    Conflict {
        /// Kind of record
        entity: &'static str,
        /// Record identifier
        id: String,
        /// Status observed at the time of the failure
        current: String,
        /// What was attempted
        reason: String,
    },

    /// Not enough eligible stock to satisfy an allocation.
    #[error(
        "Insufficient {blood_type} stock: requested {requested} units, {available} available"
    )]
    InsufficientStock {
        /// Blood type requested
        blood_type: BloodType,
        /// Units that were needed
        requested: u32,
        /// Units that could be gathered
        available: u32,
    },

    /// Declared data contradicts a record of truth (e.g. donor blood type).
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// The backing store failed; the only retry candidate.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`BloodBankError::Validation`]
    ValidationError,
    /// See [`BloodBankError::NotFound`]
    NotFound,
    /// See [`BloodBankError::Conflict`]
    Conflict,
    /// See [`BloodBankError::InsufficientStock`]
    InsufficientStock,
    /// See [`BloodBankError::Integrity`]
    IntegrityError,
    /// See [`BloodBankError::Storage`]
    StorageError,
}

impl ErrorKind {
    /// The code as a string, e.g. `"insufficient_stock"`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InsufficientStock => "insufficient_stock",
            Self::IntegrityError => "integrity_error",
            Self::StorageError => "storage_error",
        }
    }
}

impl BloodBankError {
    /// Stable kind of this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::Integrity(_) => ErrorKind::IntegrityError,
            Self::Storage(_) => ErrorKind::StorageError,
        }
    }

    /// Units missing from an allocation, if this is a stock shortfall.
    #[must_use]
    pub const fn shortfall(&self) -> Option<u32> {
        match self {
            Self::InsufficientStock {
                requested,
                available,
                ..
            } => Some(requested.saturating_sub(*available)),
            _ => None,
        }
    }

    /// Only storage failures are candidates for a bounded retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(
        entity: &'static str,
        id: impl ToString,
        current: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            current: current.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Storage("store lock poisoned".to_string())
    }
}
