//! Store trait definition and transaction identifiers.

use crate::error::StoreResult;
use crate::value::{Row, Value};
use std::fmt;

/// Key of a stored record.
///
/// Keys are integers, immutable once assigned, and unique within a table.
pub type RecordKey = i64;

/// Isolation level for a store transaction.
///
/// Controls what concurrent modifications a transaction can observe and
/// which row locks its reads acquire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsolationLevel {
    /// Reads see other transactions' uncommitted writes; no read locks.
    ReadUncommitted,
    /// Reads see only committed data; no read locks.
    ReadCommitted,
    /// Reads lock rows and writes are validated against the begin
    /// snapshot. The store default, by convention.
    #[default]
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::Serializable => "serializable",
        };
        write!(f, "{name}")
    }
}

/// Identifier of a physical store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a connection id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Handle of a live store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxHandle(pub u64);

impl TxHandle {
    /// Creates a transaction handle.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// A transactional record store.
///
/// The unit-of-work layer consumes this trait and nothing below it.
/// Implementations must report [`crate::StoreError::Deadlock`],
/// [`crate::StoreError::ConnectionBusy`], and
/// [`crate::StoreError::SerializationConflict`] as distinguishable
/// error kinds - the coordinator above maps or propagates each one
/// differently.
///
/// # Invariants
///
/// - A connection has at most one live transaction at a time.
/// - Pending writes of a transaction are visible to its own reads
///   (read-your-own-writes) and invisible to other connections until
///   commit, except under `ReadUncommitted`.
/// - `commit` applies every pending write atomically or none at all.
pub trait Store: Send + Sync {
    /// Opens a new connection.
    fn connect(&self) -> ConnectionId;

    /// Begins a transaction on `conn` with the given isolation level.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionBusy` if the connection already has a live
    /// transaction, or `UnknownConnection` for a foreign connection id.
    fn begin(&self, conn: ConnectionId, isolation: IsolationLevel) -> StoreResult<TxHandle>;

    /// Commits a transaction, making its writes durable and visible.
    ///
    /// # Errors
    ///
    /// Returns `InactiveTransaction` for a closed handle, or
    /// `SerializationConflict` if first-committer-wins validation fails.
    fn commit(&self, tx: TxHandle) -> StoreResult<()>;

    /// Rolls back a transaction, discarding its pending writes.
    ///
    /// # Errors
    ///
    /// Returns `InactiveTransaction` for a closed handle.
    fn rollback(&self, tx: TxHandle) -> StoreResult<()>;

    /// Reads a row within the transaction's isolation rules.
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` if a `Serializable` read lock conflicts with
    /// another live transaction's exclusive lock.
    fn get(&self, tx: TxHandle, table: &str, key: RecordKey) -> StoreResult<Option<Row>>;

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if the key already exists (committed or
    /// pending in this transaction), or the lock errors of [`Store::put`].
    fn insert(&self, tx: TxHandle, table: &str, key: RecordKey, row: Row) -> StoreResult<()>;

    /// Writes a row (upsert).
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` on a conflicting row lock, or
    /// `SerializationConflict` if the row was committed past the
    /// transaction's snapshot under `Serializable`.
    fn put(&self, tx: TxHandle, table: &str, key: RecordKey, row: Row) -> StoreResult<()>;

    /// Deletes a row. Deleting an absent row is a no-op.
    ///
    /// # Errors
    ///
    /// Same lock errors as [`Store::put`].
    fn delete(&self, tx: TxHandle, table: &str, key: RecordKey) -> StoreResult<()>;

    /// Executes a raw statement, returning a row set.
    ///
    /// The statement language is implementation-defined and deliberately
    /// small; unrecognized statements fail with `UnsupportedStatement`.
    fn execute_raw(&self, tx: TxHandle, statement: &str, params: &[Value])
        -> StoreResult<Vec<Row>>;
}
