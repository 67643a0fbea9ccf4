//! Change tracking and dirty detection.
//!
//! The tracker keeps, per entity, the row as it was loaded (the
//! snapshot) and the row as it currently stands. Dirtiness is always
//! recomputed by comparison, so writing a field back to its original
//! value clears its dirty state: a save after such a round trip is a
//! no-op.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use scopedb_store::{RecordKey, Row, Value};
use std::collections::HashMap;

/// Lifecycle status of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Loaded from the store with a clean snapshot.
    Loaded,
    /// Newly attached; pending insertion.
    New,
    /// Marked for deletion.
    Removed,
}

/// A tracked entity: its snapshot, its current state, and its status.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    table: &'static str,
    key: RecordKey,
    original: Row,
    current: Row,
    status: EntryStatus,
    forced: bool,
}

impl TrackedEntity {
    /// Table the entity belongs to.
    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Key of the entity.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        self.key
    }

    /// The snapshot taken when the entity was attached or last flushed.
    #[must_use]
    pub fn original(&self) -> &Row {
        &self.original
    }

    /// The entity's current row.
    #[must_use]
    pub fn current(&self) -> &Row {
        &self.current
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> EntryStatus {
        self.status
    }

    /// Field names that currently differ from the snapshot.
    ///
    /// A forced or new entity reports every field as dirty.
    #[must_use]
    pub fn dirty_fields(&self) -> Vec<String> {
        if self.forced || self.status == EntryStatus::New {
            return self.current.iter().map(|(name, _)| name.to_owned()).collect();
        }
        self.original.diff(&self.current)
    }

    /// Checks whether the entity needs flushing.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self.status {
            EntryStatus::New | EntryStatus::Removed => true,
            EntryStatus::Loaded => self.forced || self.original != self.current,
        }
    }
}

/// The flush operation a pending change requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    /// Insert the row (key must not exist yet).
    Insert(Row),
    /// Write the row over the existing one.
    Update(Row),
    /// Delete the row.
    Delete,
}

/// One entry of the flush set, in attachment order.
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// Table of the entity.
    pub table: &'static str,
    /// Key of the entity.
    pub key: RecordKey,
    /// The operation to perform.
    pub op: PendingOp,
}

/// Tracks loaded entities and their dirty state.
///
/// Entries are owned exclusively by one tracker and iterate in
/// attachment order, so flushes are deterministic.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: HashMap<(&'static str, RecordKey), TrackedEntity>,
    order: Vec<(&'static str, RecordKey)>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_entry(
        &mut self,
        table: &'static str,
        key: RecordKey,
        entry: TrackedEntity,
    ) -> CoreResult<()> {
        if self.entries.contains_key(&(table, key)) {
            return Err(CoreError::duplicate_key(table, key));
        }
        self.entries.insert((table, key), entry);
        self.order.push((table, key));
        Ok(())
    }

    /// Attaches an entity with a clean snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already tracked.
    pub fn attach(&mut self, table: &'static str, key: RecordKey, row: Row) -> CoreResult<()> {
        self.insert_entry(
            table,
            key,
            TrackedEntity {
                table,
                key,
                original: row.clone(),
                current: row,
                status: EntryStatus::Loaded,
                forced: false,
            },
        )
    }

    /// Attaches an entity pending insertion.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already tracked.
    pub fn attach_new(&mut self, table: &'static str, key: RecordKey, row: Row) -> CoreResult<()> {
        self.insert_entry(
            table,
            key,
            TrackedEntity {
                table,
                key,
                original: Row::new(),
                current: row,
                status: EntryStatus::New,
                forced: false,
            },
        )
    }

    /// Forces every field of an entity dirty, regardless of snapshot
    /// comparison.
    ///
    /// The supplied row becomes the entity's current state. An untracked
    /// entity is attached as forced, so a detached or newly constructed
    /// entity can be pushed as a full update without loading it first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is marked
    /// removed.
    pub fn mark_modified(
        &mut self,
        table: &'static str,
        key: RecordKey,
        row: Row,
    ) -> CoreResult<()> {
        if let Some(entry) = self.entries.get_mut(&(table, key)) {
            if entry.status == EntryStatus::Removed {
                return Err(CoreError::invalid_state(format!(
                    "entity {table}[{key}] is marked removed"
                )));
            }
            entry.current = row;
            entry.forced = true;
            return Ok(());
        }
        self.entries.insert(
            (table, key),
            TrackedEntity {
                table,
                key,
                original: row.clone(),
                current: row,
                status: EntryStatus::Loaded,
                forced: true,
            },
        );
        self.order.push((table, key));
        Ok(())
    }

    /// Removes tracking; subsequent mutation has no persistence effect.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked.
    pub fn detach(&mut self, table: &'static str, key: RecordKey) -> CoreResult<()> {
        if self.entries.remove(&(table, key)).is_none() {
            return Err(CoreError::invalid_state(format!(
                "entity {table}[{key}] is not tracked"
            )));
        }
        self.order.retain(|&k| k != (table, key));
        Ok(())
    }

    /// Marks a tracked entity for deletion.
    ///
    /// Removing a pending-new entity simply drops it from the tracker.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked.
    pub fn remove(&mut self, table: &'static str, key: RecordKey) -> CoreResult<()> {
        let status = self.entry_mut(table, key)?.status;
        if status == EntryStatus::New {
            return self.detach(table, key);
        }
        self.entry_mut(table, key)?.status = EntryStatus::Removed;
        Ok(())
    }

    /// Sets a field on a tracked entity's current row.
    ///
    /// Dirtiness follows from comparison against the snapshot: setting a
    /// field back to its original value makes that field clean again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the entity is not tracked
    /// or is marked removed.
    pub fn set_field(
        &mut self,
        table: &'static str,
        key: RecordKey,
        field: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let entry = self.entry_mut(table, key)?;
        if entry.status == EntryStatus::Removed {
            return Err(CoreError::invalid_state(format!(
                "entity {table}[{key}] is marked removed"
            )));
        }
        entry.current.set(field, value);
        Ok(())
    }

    /// Gets a tracked entity.
    #[must_use]
    pub fn get(&self, table: &'static str, key: RecordKey) -> Option<&TrackedEntity> {
        self.entries.get(&(table, key))
    }

    /// Checks whether an entity is tracked.
    #[must_use]
    pub fn is_tracked(&self, table: &'static str, key: RecordKey) -> bool {
        self.entries.contains_key(&(table, key))
    }

    /// Returns dirty entities in attachment order.
    pub fn dirty_entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .filter(|e| e.is_dirty())
    }

    /// Returns the flush set in attachment order.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingChange> {
        self.dirty_entities()
            .map(|entry| PendingChange {
                table: entry.table,
                key: entry.key,
                op: match entry.status {
                    EntryStatus::New => PendingOp::Insert(entry.current.clone()),
                    EntryStatus::Loaded => PendingOp::Update(entry.current.clone()),
                    EntryStatus::Removed => PendingOp::Delete,
                },
            })
            .collect()
    }

    /// Resets dirty state after a successful flush.
    ///
    /// Snapshots become the current rows, forced flags clear, and removed
    /// entries drop out of the tracker, so a repeated save with no
    /// intervening mutation flushes nothing.
    pub fn mark_flushed(&mut self) {
        let removed: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.status == EntryStatus::Removed)
            .map(|(&k, _)| k)
            .collect();
        for key in removed {
            self.entries.remove(&key);
            self.order.retain(|&k| k != key);
        }
        for entry in self.entries.values_mut() {
            entry.original = entry.current.clone();
            entry.status = EntryStatus::Loaded;
            entry.forced = false;
        }
    }

    /// Attaches a typed entity with a clean snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already tracked.
    pub fn attach_entity<E: Entity>(&mut self, entity: &E) -> CoreResult<()> {
        self.attach(E::TABLE, entity.key(), entity.to_row())
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all tracking state.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn entry_mut(
        &mut self,
        table: &'static str,
        key: RecordKey,
    ) -> CoreResult<&mut TrackedEntity> {
        self.entries.get_mut(&(table, key)).ok_or_else(|| {
            CoreError::invalid_state(format!("entity {table}[{key}] is not tracked"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_row(title: &str, description: &str) -> Row {
        Row::new()
            .with("id", 1i64)
            .with("title", title)
            .with("description", description)
    }

    #[test]
    fn attach_takes_clean_snapshot() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();

        let entry = tracker.get("books", 1).unwrap();
        assert_eq!(entry.status(), EntryStatus::Loaded);
        assert!(!entry.is_dirty());
        assert!(entry.dirty_fields().is_empty());
    }

    #[test]
    fn attach_duplicate_fails() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();

        let err = tracker.attach("books", 1, book_row("B", "d")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
    }

    #[test]
    fn same_key_different_table_is_distinct() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        assert!(tracker
            .attach("authors", 1, Row::new().with("name", "Frank"))
            .is_ok());
    }

    #[test]
    fn set_field_marks_dirty() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.set_field("books", 1, "title", "B").unwrap();

        let entry = tracker.get("books", 1).unwrap();
        assert!(entry.is_dirty());
        assert_eq!(entry.dirty_fields(), vec!["title".to_owned()]);
    }

    #[test]
    fn restore_to_original_clears_dirtiness() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.set_field("books", 1, "title", "B").unwrap();
        tracker.set_field("books", 1, "title", "A").unwrap();

        assert!(!tracker.get("books", 1).unwrap().is_dirty());
        assert!(tracker.pending().is_empty());
    }

    #[test]
    fn mark_modified_forces_all_fields() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.mark_modified("books", 1, book_row("A", "d")).unwrap();

        let entry = tracker.get("books", 1).unwrap();
        assert!(entry.is_dirty());
        assert_eq!(entry.dirty_fields().len(), 3);
    }

    #[test]
    fn mark_modified_attaches_untracked_as_forced() {
        let mut tracker = ChangeTracker::new();
        tracker.mark_modified("books", 42, book_row("A", "d")).unwrap();

        let entry = tracker.get("books", 42).unwrap();
        assert_eq!(entry.status(), EntryStatus::Loaded);
        assert!(entry.is_dirty());
        assert_eq!(entry.dirty_fields().len(), 3);

        // Flushes as a full update, not an insert.
        let pending = tracker.pending();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].op, PendingOp::Update(_)));
    }

    #[test]
    fn mark_modified_on_removed_fails() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.remove("books", 1).unwrap();

        let err = tracker.mark_modified("books", 1, book_row("B", "d")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn detach_stops_tracking() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.detach("books", 1).unwrap();

        assert!(!tracker.is_tracked("books", 1));
        assert!(tracker
            .set_field("books", 1, "title", "B")
            .is_err());
    }

    #[test]
    fn new_entity_pends_insert() {
        let mut tracker = ChangeTracker::new();
        tracker.attach_new("books", 7, book_row("A", "d")).unwrap();

        let pending = tracker.pending();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].op, PendingOp::Insert(_)));
    }

    #[test]
    fn removed_entity_pends_delete() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.remove("books", 1).unwrap();

        let pending = tracker.pending();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].op, PendingOp::Delete));
    }

    #[test]
    fn remove_pending_new_drops_entry() {
        let mut tracker = ChangeTracker::new();
        tracker.attach_new("books", 7, book_row("A", "d")).unwrap();
        tracker.remove("books", 7).unwrap();

        assert!(!tracker.is_tracked("books", 7));
        assert!(tracker.pending().is_empty());
    }

    #[test]
    fn set_field_on_removed_fails() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.remove("books", 1).unwrap();

        let err = tracker.set_field("books", 1, "title", "B").unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn pending_in_attachment_order() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 2, book_row("B", "d")).unwrap();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.attach("books", 3, book_row("C", "d")).unwrap();

        tracker.set_field("books", 3, "title", "C2").unwrap();
        tracker.set_field("books", 2, "title", "B2").unwrap();

        let keys: Vec<_> = tracker.pending().iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![2, 3]);
    }

    #[test]
    fn mark_flushed_resets_baseline() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.set_field("books", 1, "title", "B").unwrap();
        assert_eq!(tracker.pending().len(), 1);

        tracker.mark_flushed();
        assert!(tracker.pending().is_empty());

        // Still tracked; the new baseline is the flushed state.
        let entry = tracker.get("books", 1).unwrap();
        assert_eq!(entry.original().get("title"), Some(&Value::text("B")));
    }

    #[test]
    fn mark_flushed_drops_removed_and_keeps_new() {
        let mut tracker = ChangeTracker::new();
        tracker.attach("books", 1, book_row("A", "d")).unwrap();
        tracker.remove("books", 1).unwrap();
        tracker.attach_new("books", 2, book_row("B", "d")).unwrap();

        tracker.mark_flushed();

        assert!(!tracker.is_tracked("books", 1));
        let entry = tracker.get("books", 2).unwrap();
        assert_eq!(entry.status(), EntryStatus::Loaded);
        assert!(!entry.is_dirty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Writing arbitrary values and then restoring the original
            // always leaves the entity clean.
            #[test]
            fn restore_always_clears_dirty(values in prop::collection::vec(".*", 1..8)) {
                let mut tracker = ChangeTracker::new();
                tracker.attach("books", 1, book_row("A", "d")).unwrap();

                for value in &values {
                    tracker.set_field("books", 1, "title", value.as_str()).unwrap();
                }
                tracker.set_field("books", 1, "title", "A").unwrap();

                prop_assert!(!tracker.get("books", 1).unwrap().is_dirty());
            }
        }
    }
}
