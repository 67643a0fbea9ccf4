//! Error types for ScopeDB core.

use scopedb_store::{RecordKey, StoreError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in scope coordination and unit-of-work operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Store failure, propagated unchanged to the caller.
    ///
    /// Deadlocks and serialization conflicts arrive through this variant
    /// verbatim; they are never retried here.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An entity with the same key is already tracked.
    #[error("entity {table}[{key}] is already tracked")]
    DuplicateKey {
        /// Table of the entity.
        table: String,
        /// Key of the entity.
        key: RecordKey,
    },

    /// Entity absent on a load/find-style lookup.
    #[error("entity {table}[{key}] not found")]
    NotFound {
        /// Table searched.
        table: String,
        /// Key that was not found.
        key: RecordKey,
    },

    /// Misuse of the scope or tracker lifecycle.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the misuse.
        message: String,
    },

    /// A `RequiresNew` scope was opened on the connection already carrying
    /// the ambient transaction.
    #[error("nested transaction not supported on the same connection")]
    NestedTransactionNotSupported,

    /// Two physical connections cannot participate in one logical
    /// transaction.
    #[error("distributed transactions across connections are not supported")]
    UnsupportedDistributedTransaction,

    /// The ambient context was consulted where no scope was ever opened.
    #[error("no ambient transaction in this context")]
    NoAmbientTransaction,

    /// Optimistic check failed: the snapshot diverged from the store's
    /// current value.
    #[error("concurrency conflict on {table}[{key}]")]
    ConcurrencyConflict {
        /// Table of the diverged entity.
        table: String,
        /// Key of the diverged entity.
        key: RecordKey,
    },

    /// A stored row could not be mapped to an entity.
    #[error("row mapping failed for {table}: {message}")]
    Mapping {
        /// Table of the unmappable row.
        table: String,
        /// What was missing or malformed.
        message: String,
    },
}

impl CoreError {
    /// Creates a duplicate key error.
    pub fn duplicate_key(table: impl Into<String>, key: RecordKey) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key,
        }
    }

    /// Creates a not found error.
    pub fn not_found(table: impl Into<String>, key: RecordKey) -> Self {
        Self::NotFound {
            table: table.into(),
            key,
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a concurrency conflict error.
    pub fn concurrency_conflict(table: impl Into<String>, key: RecordKey) -> Self {
        Self::ConcurrencyConflict {
            table: table.into(),
            key,
        }
    }

    /// Creates a row mapping error.
    pub fn mapping(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Checks whether this error is a store-reported deadlock.
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, CoreError::Store(StoreError::Deadlock { .. }))
    }
}
