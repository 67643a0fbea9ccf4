//! # ScopeDB Core
//!
//! Explicit transaction-scope coordination for a unit-of-work
//! data-access layer.
//!
//! This crate provides:
//! - [`ChangeTracker`] - snapshot-based per-field dirty detection
//! - [`AmbientContext`] / [`TransactionScope`] - a nestable transaction
//!   coordinator with `Required`/`RequiresNew` propagation
//! - [`UnitOfWork`] - ties a change tracker to a store connection and
//!   the currently ambient transaction; `save()` flushes tracked changes
//! - [`Entity`] - the mapping seam between typed records and stored rows
//!
//! The ambient context is an explicit value threaded through calls, not
//! hidden thread-local state: it is `!Send` by construction, so sharing
//! it across threads without an explicit handoff is a compile error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod scope;
mod tracker;
mod types;
mod uow;

pub use config::Config;
pub use entity::{required_integer, required_text, Entity};
pub use error::{CoreError, CoreResult};
pub use scope::{AmbientContext, AmbientTxn, ScopeOption, ScopeState, TransactionScope};
pub use tracker::{ChangeTracker, EntryStatus, PendingChange, PendingOp, TrackedEntity};
pub use types::ScopeId;
pub use uow::UnitOfWork;

pub use scopedb_store::{
    ConnectionId, IsolationLevel, MemoryStore, RecordKey, Row, Store, StoreError, TxHandle, Value,
};
