//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// The unit-of-work layer relies on these kinds being distinguishable:
/// deadlocks are propagated verbatim to callers, while `ConnectionBusy`
/// is translated into a scope-level nesting error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A lock acquisition formed a cycle of mutual waits.
    ///
    /// With a single logical caller driving every transaction, a
    /// conflicting lock can never be released while the requester waits,
    /// so the conflict is surfaced immediately instead of blocking.
    #[error("deadlock on {table}[{key}]")]
    Deadlock {
        /// Table holding the contested row.
        table: String,
        /// Key of the contested row.
        key: i64,
    },

    /// The connection already has a live transaction.
    ///
    /// One physical connection cannot multiplex two live transactions.
    #[error("connection {connection} already has a live transaction")]
    ConnectionBusy {
        /// The busy connection.
        connection: u64,
    },

    /// A serializable transaction wrote a row committed after its snapshot.
    #[error("serialization conflict on {table}[{key}]")]
    SerializationConflict {
        /// Table holding the conflicting row.
        table: String,
        /// Key of the conflicting row.
        key: i64,
    },

    /// An insert targeted a key that already exists.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// Table holding the existing row.
        table: String,
        /// The duplicate key.
        key: i64,
    },

    /// The transaction handle is not active (already committed or rolled back).
    #[error("transaction {tx} is not active")]
    InactiveTransaction {
        /// The stale handle.
        tx: u64,
    },

    /// The connection is not known to this store.
    #[error("unknown connection {connection}")]
    UnknownConnection {
        /// The unknown connection id.
        connection: u64,
    },

    /// A raw statement was not recognized.
    #[error("unsupported statement: {statement}")]
    UnsupportedStatement {
        /// The offending statement text.
        statement: String,
    },
}

impl StoreError {
    /// Creates a deadlock error.
    pub fn deadlock(table: impl Into<String>, key: i64) -> Self {
        Self::Deadlock {
            table: table.into(),
            key,
        }
    }

    /// Creates a serialization conflict error.
    pub fn serialization_conflict(table: impl Into<String>, key: i64) -> Self {
        Self::SerializationConflict {
            table: table.into(),
            key,
        }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(table: impl Into<String>, key: i64) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key,
        }
    }

    /// Creates an unsupported statement error.
    pub fn unsupported_statement(statement: impl Into<String>) -> Self {
        Self::UnsupportedStatement {
            statement: statement.into(),
        }
    }
}
