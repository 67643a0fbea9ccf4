//! The unit of work: one connection, one change tracker, one save path.

use crate::config::Config;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::scope::{AmbientContext, ScopeOption, TransactionScope};
use crate::tracker::{ChangeTracker, EntryStatus, PendingOp};
use scopedb_store::{ConnectionId, IsolationLevel, RecordKey, Store, TxHandle, Value};
use std::sync::Arc;
use tracing::debug;

/// A unit of work over one store connection.
///
/// Tracks entities loaded through it and flushes their accumulated
/// changes on [`save`](Self::save). When an ambient scope is open the
/// flush joins its transaction; otherwise each save and each read runs
/// in its own short-lived autocommit transaction.
///
/// Several units of work may share one context (and, via
/// [`on_connection`](Self::on_connection), one connection) to
/// participate in the same ambient transaction.
pub struct UnitOfWork {
    store: Arc<dyn Store>,
    conn: ConnectionId,
    ctx: AmbientContext,
    tracker: ChangeTracker,
    config: Config,
}

impl UnitOfWork {
    /// Creates a unit of work on a fresh connection.
    #[must_use]
    pub fn new(ctx: &AmbientContext) -> Self {
        Self::with_config(ctx, Config::default())
    }

    /// Creates a unit of work on a fresh connection with `config`.
    #[must_use]
    pub fn with_config(ctx: &AmbientContext, config: Config) -> Self {
        let store = ctx.store().clone();
        let conn = store.connect();
        Self {
            store,
            conn,
            ctx: ctx.clone(),
            tracker: ChangeTracker::new(),
            config,
        }
    }

    /// Creates a unit of work sharing an existing connection.
    ///
    /// Two units of work on the same connection can both join the same
    /// ambient transaction, each with its own change tracker.
    #[must_use]
    pub fn on_connection(ctx: &AmbientContext, conn: ConnectionId) -> Self {
        Self {
            store: ctx.store().clone(),
            conn,
            ctx: ctx.clone(),
            tracker: ChangeTracker::new(),
            config: Config::default(),
        }
    }

    /// The connection this unit of work reads and writes on.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    /// The change tracker, for inspection.
    #[must_use]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Opens a transaction scope on this unit of work's connection.
    ///
    /// `isolation` defaults to the configured scope level
    /// ([`Config::scope_isolation`]); it only applies when the scope
    /// starts a fresh transaction.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`AmbientContext::begin_scope`].
    pub fn begin_scope(
        &self,
        option: ScopeOption,
        isolation: Option<IsolationLevel>,
    ) -> CoreResult<TransactionScope> {
        let level = isolation.unwrap_or(self.config.scope_isolation);
        self.ctx.begin_scope(self.conn, option, Some(level))
    }

    /// Looks up an entity by key, attaching it for tracking.
    ///
    /// Already-tracked entities come straight from the tracker (identity
    /// map): repeated finds observe this unit of work's unsaved edits.
    /// An entity marked removed reads as absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedDistributedTransaction`] if an
    /// ambient transaction runs on another connection, a store error,
    /// or [`CoreError::Mapping`] for an unmappable row.
    pub fn find<E: Entity>(&mut self, key: RecordKey) -> CoreResult<Option<E>> {
        if let Some(entry) = self.tracker.get(E::TABLE, key) {
            if entry.status() == EntryStatus::Removed {
                return Ok(None);
            }
            return E::from_row(key, entry.current()).map(Some);
        }
        let row = self.read(|store, tx| store.get(tx, E::TABLE, key))?;
        match row {
            Some(row) => {
                let entity = E::from_row(key, &row)?;
                self.tracker.attach(E::TABLE, key, row)?;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    /// Looks up an entity by key, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an absent key, plus the
    /// errors of [`find`](Self::find).
    pub fn load<E: Entity>(&mut self, key: RecordKey) -> CoreResult<E> {
        self.find(key)?
            .ok_or_else(|| CoreError::not_found(E::TABLE, key))
    }

    /// Reads every row of an entity's table, attaching untracked ones.
    ///
    /// Tracked entities come from the tracker, so the result reflects
    /// this unit of work's unsaved edits. Removed entities are skipped.
    ///
    /// # Errors
    ///
    /// Same as [`find`](Self::find).
    pub fn scan<E: Entity>(&mut self) -> CoreResult<Vec<E>> {
        let rows = self.read(|store, tx| {
            store.execute_raw(tx, &format!("scan {}", E::TABLE), &[])
        })?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row
                .get("id")
                .and_then(Value::as_integer)
                .ok_or_else(|| CoreError::mapping(E::TABLE, "scan row lacks an `id` field"))?;
            if let Some(entry) = self.tracker.get(E::TABLE, key) {
                if entry.status() != EntryStatus::Removed {
                    out.push(E::from_row(key, entry.current())?);
                }
                continue;
            }
            let entity = E::from_row(key, &row)?;
            self.tracker.attach(E::TABLE, key, row)?;
            out.push(entity);
        }
        Ok(out)
    }

    /// Registers a new entity for insertion at the next save.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already tracked.
    pub fn add<E: Entity>(&mut self, entity: &E) -> CoreResult<()> {
        self.tracker.attach_new(E::TABLE, entity.key(), entity.to_row())
    }

    /// Attaches an existing entity with a clean snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already tracked.
    pub fn attach<E: Entity>(&mut self, entity: &E) -> CoreResult<()> {
        self.tracker.attach_entity(entity)
    }

    /// Overwrites a tracked entity's current state from `entity`.
    ///
    /// Dirtiness still follows from snapshot comparison, so an update
    /// that matches the original leaves the entity clean.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked
    /// or is marked removed.
    pub fn update<E: Entity>(&mut self, entity: &E) -> CoreResult<()> {
        let row = entity.to_row();
        for (name, value) in row.iter() {
            self.tracker
                .set_field(E::TABLE, entity.key(), name, value.clone())?;
        }
        Ok(())
    }

    /// Sets one field of a tracked entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked
    /// or is marked removed.
    pub fn set_field<E: Entity>(
        &mut self,
        key: RecordKey,
        field: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        self.tracker.set_field(E::TABLE, key, field, value)
    }

    /// Forces a full update of `entity` at the next save.
    ///
    /// An untracked entity is attached as forced, so a detached or
    /// newly constructed entity can be written without loading it first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is marked
    /// removed.
    pub fn mark_modified<E: Entity>(&mut self, entity: &E) -> CoreResult<()> {
        self.tracker
            .mark_modified(E::TABLE, entity.key(), entity.to_row())
    }

    /// Marks a tracked entity for deletion at the next save.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked.
    pub fn remove<E: Entity>(&mut self, key: RecordKey) -> CoreResult<()> {
        self.tracker.remove(E::TABLE, key)
    }

    /// Stops tracking an entity; later saves ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked.
    pub fn detach<E: Entity>(&mut self, key: RecordKey) -> CoreResult<()> {
        self.tracker.detach(E::TABLE, key)
    }

    /// Flushes all pending changes, returning how many were written.
    ///
    /// With no pending changes this is a no-op returning zero; saving
    /// twice without intervening edits writes nothing the second time.
    ///
    /// Inside an ambient scope the flush joins that transaction and
    /// becomes durable only when the owning scope commits; a flush
    /// error dooms the shared transaction before propagating. Outside
    /// any scope the flush runs in its own autocommit transaction.
    ///
    /// # Errors
    ///
    /// Propagates store errors (deadlocks and serialization conflicts
    /// included) without retrying. Returns
    /// [`CoreError::UnsupportedDistributedTransaction`] if the ambient
    /// transaction runs on another connection, or
    /// [`CoreError::ConcurrencyConflict`] when an optimistic check
    /// fails.
    pub fn save(&mut self) -> CoreResult<usize> {
        let pending = self.tracker.pending();
        if pending.is_empty() {
            return Ok(0);
        }
        let count = pending.len();

        if let Some(txn) = self.ctx.current_txn() {
            if txn.conn != self.conn {
                return Err(CoreError::UnsupportedDistributedTransaction);
            }
            if let Err(err) = self.flush(txn.tx) {
                self.ctx.doom_current();
                return Err(err);
            }
        } else {
            let tx = self.store.begin(self.conn, self.config.autocommit_isolation)?;
            if let Err(err) = self.flush(tx) {
                let _ = self.store.rollback(tx);
                return Err(err);
            }
            self.store.commit(tx)?;
        }

        self.tracker.mark_flushed();
        debug!(conn = %self.conn, count, "changes saved");
        Ok(count)
    }

    fn flush(&self, tx: TxHandle) -> CoreResult<()> {
        if self.config.optimistic_checks {
            self.check_snapshots(tx)?;
        }
        for change in self.tracker.pending() {
            match change.op {
                PendingOp::Insert(row) => {
                    self.store.insert(tx, change.table, change.key, row)?;
                }
                PendingOp::Update(row) => {
                    self.store.put(tx, change.table, change.key, row)?;
                }
                PendingOp::Delete => {
                    self.store.delete(tx, change.table, change.key)?;
                }
            }
        }
        Ok(())
    }

    // Optimistic check: each loaded snapshot must still match the row
    // the store holds, otherwise another writer got there first.
    fn check_snapshots(&self, tx: TxHandle) -> CoreResult<()> {
        for entry in self.tracker.dirty_entities() {
            if entry.status() == EntryStatus::New {
                continue;
            }
            let stored = self.store.get(tx, entry.table(), entry.key())?;
            if stored.as_ref() != Some(entry.original()) {
                return Err(CoreError::concurrency_conflict(entry.table(), entry.key()));
            }
        }
        Ok(())
    }

    fn read<T>(
        &self,
        op: impl FnOnce(&dyn Store, TxHandle) -> scopedb_store::StoreResult<T>,
    ) -> CoreResult<T> {
        if let Some(txn) = self.ctx.current_txn() {
            if txn.conn != self.conn {
                return Err(CoreError::UnsupportedDistributedTransaction);
            }
            return Ok(op(self.store.as_ref(), txn.tx)?);
        }
        let tx = self.store.begin(self.conn, self.config.autocommit_isolation)?;
        match op(self.store.as_ref(), tx) {
            Ok(value) => {
                self.store.commit(tx)?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.store.rollback(tx);
                Err(err.into())
            }
        }
    }
}
