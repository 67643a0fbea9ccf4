//! Deterministic in-memory store.

use crate::error::{StoreError, StoreResult};
use crate::store::{ConnectionId, IsolationLevel, RecordKey, Store, TxHandle};
use crate::value::{Row, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A committed row together with the sequence of the commit that wrote it.
#[derive(Debug, Clone)]
struct CommittedRow {
    row: Row,
    seq: u64,
}

/// A pending write inside a live transaction. `None` deletes the row.
type PendingWrite = Option<Row>;

#[derive(Debug)]
struct TxnState {
    conn: ConnectionId,
    isolation: IsolationLevel,
    begin_seq: u64,
    writes: BTreeMap<(String, RecordKey), PendingWrite>,
}

#[derive(Debug, Default)]
struct LockState {
    exclusive: Option<u64>,
    shared: BTreeSet<u64>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, BTreeMap<RecordKey, CommittedRow>>,
    txns: BTreeMap<u64, TxnState>,
    locks: HashMap<(String, RecordKey), LockState>,
    connections: HashSet<u64>,
    busy_connections: HashSet<u64>,
    next_conn: u64,
    next_tx: u64,
    commit_seq: u64,
    writes_applied: u64,
}

/// A deterministic in-memory transactional record store.
///
/// This store drives every test in the workspace. It implements the
/// [`Store`] contract with row-level locking and first-committer-wins
/// validation:
///
/// - writes take exclusive row locks, `Serializable` reads take shared
///   row locks;
/// - a conflicting acquisition by a different live transaction is
///   reported as [`StoreError::Deadlock`] immediately - the single
///   logical caller that drives both transactions could never release
///   the held lock while waiting;
/// - a `Serializable` transaction writing a row committed after its
///   begin snapshot fails with [`StoreError::SerializationConflict`];
/// - one connection carries at most one live transaction
///   ([`StoreError::ConnectionBusy`]).
///
/// # Thread safety
///
/// The store itself is thread-safe and may be shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of row writes applied by commits.
    ///
    /// Tests use this to assert that a repeated save performs zero
    /// additional writes.
    #[must_use]
    pub fn writes_applied(&self) -> u64 {
        self.inner.lock().writes_applied
    }

    /// Returns the number of live transactions.
    #[must_use]
    pub fn live_transactions(&self) -> usize {
        self.inner.lock().txns.len()
    }

    /// Returns the latest committed row, bypassing any transaction.
    ///
    /// Test helper; production reads go through [`Store::get`].
    #[must_use]
    pub fn committed(&self, table: &str, key: RecordKey) -> Option<Row> {
        let inner = self.inner.lock();
        inner
            .tables
            .get(table)
            .and_then(|t| t.get(&key))
            .map(|c| c.row.clone())
    }
}

impl Inner {
    fn txn(&self, tx: TxHandle) -> StoreResult<&TxnState> {
        self.txns
            .get(&tx.as_u64())
            .ok_or(StoreError::InactiveTransaction { tx: tx.as_u64() })
    }

    fn committed_row(&self, table: &str, key: RecordKey) -> Option<&CommittedRow> {
        self.tables.get(table).and_then(|t| t.get(&key))
    }

    /// Acquires an exclusive lock for `tx`, upgrading its own shared lock.
    fn lock_exclusive(&mut self, tx: u64, table: &str, key: RecordKey) -> StoreResult<()> {
        let state = self
            .locks
            .entry((table.to_owned(), key))
            .or_default();
        if let Some(holder) = state.exclusive {
            if holder != tx {
                return Err(StoreError::deadlock(table, key));
            }
            return Ok(());
        }
        if state.shared.iter().any(|&holder| holder != tx) {
            return Err(StoreError::deadlock(table, key));
        }
        state.shared.remove(&tx);
        state.exclusive = Some(tx);
        Ok(())
    }

    /// Acquires a shared lock for `tx`.
    fn lock_shared(&mut self, tx: u64, table: &str, key: RecordKey) -> StoreResult<()> {
        let state = self
            .locks
            .entry((table.to_owned(), key))
            .or_default();
        if let Some(holder) = state.exclusive {
            if holder != tx {
                return Err(StoreError::deadlock(table, key));
            }
            return Ok(());
        }
        state.shared.insert(tx);
        Ok(())
    }

    fn release_locks(&mut self, tx: u64) {
        for state in self.locks.values_mut() {
            if state.exclusive == Some(tx) {
                state.exclusive = None;
            }
            state.shared.remove(&tx);
        }
        self.locks.retain(|_, state| !state.is_free());
    }

    /// Prepares a write: lock the row and validate the snapshot.
    fn check_write(&mut self, tx: TxHandle, table: &str, key: RecordKey) -> StoreResult<()> {
        let (isolation, begin_seq) = {
            let txn = self.txn(tx)?;
            (txn.isolation, txn.begin_seq)
        };
        self.lock_exclusive(tx.as_u64(), table, key)?;
        if isolation == IsolationLevel::Serializable {
            if let Some(committed) = self.committed_row(table, key) {
                // First committer wins: the row moved past our snapshot.
                if committed.seq > begin_seq {
                    return Err(StoreError::serialization_conflict(table, key));
                }
            }
        }
        Ok(())
    }

    fn record_write(
        &mut self,
        tx: TxHandle,
        table: &str,
        key: RecordKey,
        write: PendingWrite,
    ) -> StoreResult<()> {
        let txn = self
            .txns
            .get_mut(&tx.as_u64())
            .ok_or(StoreError::InactiveTransaction { tx: tx.as_u64() })?;
        txn.writes.insert((table.to_owned(), key), write);
        Ok(())
    }

    fn close(&mut self, tx: TxHandle) -> StoreResult<TxnState> {
        let state = self
            .txns
            .remove(&tx.as_u64())
            .ok_or(StoreError::InactiveTransaction { tx: tx.as_u64() })?;
        self.release_locks(tx.as_u64());
        self.busy_connections.remove(&state.conn.as_u64());
        Ok(state)
    }

    /// Merges a transaction's pending writes over the committed rows of
    /// a table, in key order.
    fn merged_scan(&self, tx: TxHandle, table: &str) -> StoreResult<Vec<Row>> {
        let txn = self.txn(tx)?;
        let mut merged: BTreeMap<RecordKey, Option<Row>> = BTreeMap::new();
        if let Some(rows) = self.tables.get(table) {
            for (key, committed) in rows {
                merged.insert(*key, Some(committed.row.clone()));
            }
        }
        for ((t, key), write) in &txn.writes {
            if t == table {
                merged.insert(*key, write.clone());
            }
        }
        Ok(merged.into_values().flatten().collect())
    }
}

impl Store for MemoryStore {
    fn connect(&self) -> ConnectionId {
        let mut inner = self.inner.lock();
        inner.next_conn += 1;
        let id = inner.next_conn;
        inner.connections.insert(id);
        ConnectionId::new(id)
    }

    fn begin(&self, conn: ConnectionId, isolation: IsolationLevel) -> StoreResult<TxHandle> {
        let mut inner = self.inner.lock();
        if !inner.connections.contains(&conn.as_u64()) {
            return Err(StoreError::UnknownConnection {
                connection: conn.as_u64(),
            });
        }
        if !inner.busy_connections.insert(conn.as_u64()) {
            return Err(StoreError::ConnectionBusy {
                connection: conn.as_u64(),
            });
        }
        inner.next_tx += 1;
        let tx = inner.next_tx;
        let begin_seq = inner.commit_seq;
        inner.txns.insert(
            tx,
            TxnState {
                conn,
                isolation,
                begin_seq,
                writes: BTreeMap::new(),
            },
        );
        tracing::trace!(%conn, tx, %isolation, "transaction started");
        Ok(TxHandle::new(tx))
    }

    fn commit(&self, tx: TxHandle) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let state = inner.close(tx)?;
        inner.commit_seq += 1;
        let seq = inner.commit_seq;
        let write_count = state.writes.len() as u64;
        for ((table, key), write) in state.writes {
            let rows = inner.tables.entry(table).or_default();
            match write {
                Some(row) => {
                    rows.insert(key, CommittedRow { row, seq });
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        inner.writes_applied += write_count;
        tracing::trace!(tx = tx.as_u64(), seq, write_count, "transaction committed");
        Ok(())
    }

    fn rollback(&self, tx: TxHandle) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let state = inner.close(tx)?;
        tracing::trace!(
            tx = tx.as_u64(),
            discarded = state.writes.len(),
            "transaction rolled back"
        );
        Ok(())
    }

    fn get(&self, tx: TxHandle, table: &str, key: RecordKey) -> StoreResult<Option<Row>> {
        let mut inner = self.inner.lock();
        let isolation = inner.txn(tx)?.isolation;

        // Read-your-own-writes comes first, at every isolation level.
        if let Some(write) = inner.txn(tx)?.writes.get(&(table.to_owned(), key)) {
            return Ok(write.clone());
        }

        match isolation {
            IsolationLevel::ReadUncommitted => {
                // Dirty read: the latest pending write of any live
                // transaction wins over the committed row.
                let mut dirty = None;
                for (id, txn) in &inner.txns {
                    if *id == tx.as_u64() {
                        continue;
                    }
                    if let Some(write) = txn.writes.get(&(table.to_owned(), key)) {
                        dirty = Some(write.clone());
                    }
                }
                if let Some(write) = dirty {
                    return Ok(write);
                }
            }
            IsolationLevel::ReadCommitted => {}
            IsolationLevel::Serializable => {
                inner.lock_shared(tx.as_u64(), table, key)?;
            }
        }

        Ok(inner.committed_row(table, key).map(|c| c.row.clone()))
    }

    fn insert(&self, tx: TxHandle, table: &str, key: RecordKey, row: Row) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let pending = inner
            .txn(tx)?
            .writes
            .get(&(table.to_owned(), key))
            .cloned();
        let exists = match pending {
            Some(Some(_)) => true,
            Some(None) => false, // pending delete frees the key
            None => inner.committed_row(table, key).is_some(),
        };
        if exists {
            return Err(StoreError::duplicate_key(table, key));
        }
        inner.check_write(tx, table, key)?;
        inner.record_write(tx, table, key, Some(row))
    }

    fn put(&self, tx: TxHandle, table: &str, key: RecordKey, row: Row) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_write(tx, table, key)?;
        inner.record_write(tx, table, key, Some(row))
    }

    fn delete(&self, tx: TxHandle, table: &str, key: RecordKey) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_write(tx, table, key)?;
        inner.record_write(tx, table, key, None)
    }

    fn execute_raw(
        &self,
        tx: TxHandle,
        statement: &str,
        _params: &[Value],
    ) -> StoreResult<Vec<Row>> {
        let inner = self.inner.lock();
        let mut parts = statement.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("scan"), Some(table), None) => inner.merged_scan(tx, table),
            (Some("count"), Some(table), None) => {
                let rows = inner.merged_scan(tx, table)?;
                Ok(vec![Row::new().with("count", rows.len() as i64)])
            }
            _ => Err(StoreError::unsupported_statement(statement)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_row(title: &str) -> Row {
        Row::new().with("title", title).with("author_id", 1i64)
    }

    fn begin_on_new_conn(store: &MemoryStore, isolation: IsolationLevel) -> TxHandle {
        let conn = store.connect();
        store.begin(conn, isolation).unwrap()
    }

    #[test]
    fn commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(tx, "books", 1, book_row("Dune")).unwrap();
        store.commit(tx).unwrap();

        let reader = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        let row = store.get(reader, "books", 1).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::text("Dune")));
    }

    #[test]
    fn rollback_discards_writes() {
        let store = MemoryStore::new();
        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(tx, "books", 1, book_row("Dune")).unwrap();
        store.rollback(tx).unwrap();

        let reader = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        assert!(store.get(reader, "books", 1).unwrap().is_none());
    }

    #[test]
    fn read_your_own_writes() {
        let store = MemoryStore::new();
        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(tx, "books", 1, book_row("Dune")).unwrap();

        let row = store.get(tx, "books", 1).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::text("Dune")));
    }

    #[test]
    fn uncommitted_writes_invisible_to_other_connection() {
        let store = MemoryStore::new();
        let writer = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(writer, "books", 1, book_row("Dune")).unwrap();

        let reader = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        assert!(store.get(reader, "books", 1).unwrap().is_none());
    }

    #[test]
    fn read_uncommitted_sees_pending_writes() {
        let store = MemoryStore::new();
        let writer = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(writer, "books", 1, book_row("Dune")).unwrap();

        let reader = begin_on_new_conn(&store, IsolationLevel::ReadUncommitted);
        let row = store.get(reader, "books", 1).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::text("Dune")));
    }

    #[test]
    fn second_transaction_on_same_connection_is_busy() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let _tx = store.begin(conn, IsolationLevel::default()).unwrap();

        let result = store.begin(conn, IsolationLevel::default());
        assert!(matches!(result, Err(StoreError::ConnectionBusy { .. })));
    }

    #[test]
    fn connection_reusable_after_commit() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let tx = store.begin(conn, IsolationLevel::default()).unwrap();
        store.commit(tx).unwrap();

        assert!(store.begin(conn, IsolationLevel::default()).is_ok());
    }

    #[test]
    fn unknown_connection_rejected() {
        let store = MemoryStore::new();
        let result = store.begin(ConnectionId::new(99), IsolationLevel::default());
        assert!(matches!(result, Err(StoreError::UnknownConnection { .. })));
    }

    #[test]
    fn closed_handle_is_inactive() {
        let store = MemoryStore::new();
        let tx = begin_on_new_conn(&store, IsolationLevel::default());
        store.commit(tx).unwrap();

        assert!(matches!(
            store.commit(tx),
            Err(StoreError::InactiveTransaction { .. })
        ));
        assert!(matches!(
            store.rollback(tx),
            Err(StoreError::InactiveTransaction { .. })
        ));
        assert!(matches!(
            store.get(tx, "books", 1),
            Err(StoreError::InactiveTransaction { .. })
        ));
    }

    #[test]
    fn write_write_conflict_is_deadlock() {
        let store = MemoryStore::new();
        let a = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        let b = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);

        store.put(a, "books", 1, book_row("A")).unwrap();
        let result = store.put(b, "books", 1, book_row("B"));
        assert_eq!(result, Err(StoreError::deadlock("books", 1)));
    }

    #[test]
    fn serializable_read_blocks_other_writer() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(setup, "books", 1, book_row("Dune")).unwrap();
        store.commit(setup).unwrap();

        // Serializable reader takes a shared lock on the row.
        let reader = begin_on_new_conn(&store, IsolationLevel::Serializable);
        assert!(store.get(reader, "books", 1).unwrap().is_some());

        let writer = begin_on_new_conn(&store, IsolationLevel::ReadUncommitted);
        let result = store.put(writer, "books", 1, book_row("X"));
        assert_eq!(result, Err(StoreError::deadlock("books", 1)));
    }

    #[test]
    fn exclusive_lock_blocks_serializable_reader() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(setup, "books", 1, book_row("Dune")).unwrap();
        store.commit(setup).unwrap();

        let writer = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(writer, "books", 1, book_row("X")).unwrap();

        let reader = begin_on_new_conn(&store, IsolationLevel::Serializable);
        let result = store.get(reader, "books", 1);
        assert_eq!(result, Err(StoreError::deadlock("books", 1)));
    }

    #[test]
    fn locks_released_on_rollback() {
        let store = MemoryStore::new();
        let a = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(a, "books", 1, book_row("A")).unwrap();
        store.rollback(a).unwrap();

        let b = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        assert!(store.put(b, "books", 1, book_row("B")).is_ok());
    }

    #[test]
    fn serialization_conflict_past_snapshot() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(setup, "books", 1, book_row("v1")).unwrap();
        store.commit(setup).unwrap();

        // Old transaction begins, then the row moves forward underneath it.
        let old = begin_on_new_conn(&store, IsolationLevel::Serializable);
        let newer = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(newer, "books", 1, book_row("v2")).unwrap();
        store.commit(newer).unwrap();

        let result = store.put(old, "books", 1, book_row("v3"));
        assert_eq!(result, Err(StoreError::serialization_conflict("books", 1)));
    }

    #[test]
    fn insert_duplicate_committed_key_fails() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.insert(setup, "books", 1, book_row("Dune")).unwrap();
        store.commit(setup).unwrap();

        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        let result = store.insert(tx, "books", 1, book_row("Other"));
        assert_eq!(result, Err(StoreError::duplicate_key("books", 1)));
    }

    #[test]
    fn insert_after_pending_delete_succeeds() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.insert(setup, "books", 1, book_row("Dune")).unwrap();
        store.commit(setup).unwrap();

        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.delete(tx, "books", 1).unwrap();
        assert!(store.insert(tx, "books", 1, book_row("Reborn")).is_ok());
    }

    #[test]
    fn delete_then_get_sees_tombstone() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(setup, "books", 1, book_row("Dune")).unwrap();
        store.commit(setup).unwrap();

        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.delete(tx, "books", 1).unwrap();
        assert!(store.get(tx, "books", 1).unwrap().is_none());
        store.commit(tx).unwrap();

        assert!(store.committed("books", 1).is_none());
    }

    #[test]
    fn writes_applied_counts_committed_rows_only() {
        let store = MemoryStore::new();
        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(tx, "books", 1, book_row("A")).unwrap();
        store.put(tx, "books", 2, book_row("B")).unwrap();
        store.commit(tx).unwrap();
        assert_eq!(store.writes_applied(), 2);

        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(tx, "books", 3, book_row("C")).unwrap();
        store.rollback(tx).unwrap();
        assert_eq!(store.writes_applied(), 2);
    }

    #[test]
    fn scan_merges_pending_writes() {
        let store = MemoryStore::new();
        let setup = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.put(setup, "books", 1, book_row("A")).unwrap();
        store.put(setup, "books", 2, book_row("B")).unwrap();
        store.commit(setup).unwrap();

        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        store.delete(tx, "books", 1).unwrap();
        store.put(tx, "books", 3, book_row("C")).unwrap();

        let rows = store.execute_raw(tx, "scan books", &[]).unwrap();
        assert_eq!(rows.len(), 2);

        let counts = store.execute_raw(tx, "count books", &[]).unwrap();
        assert_eq!(counts[0].get("count"), Some(&Value::Integer(2)));
    }

    #[test]
    fn unsupported_statement_rejected() {
        let store = MemoryStore::new();
        let tx = begin_on_new_conn(&store, IsolationLevel::ReadCommitted);
        let result = store.execute_raw(tx, "drop table books", &[]);
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedStatement { .. })
        ));
    }
}
