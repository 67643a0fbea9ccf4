//! # ScopeDB Store
//!
//! Transactional record store abstraction for ScopeDB.
//!
//! This crate defines the lowest-level storage seam the unit-of-work layer
//! is written against. Stores are **opaque record stores**: they expose
//! begin/commit/rollback with a configurable isolation level and row-level
//! get/put/delete, and they report lock and serialization failures as
//! distinguishable error kinds. They know nothing about entities, change
//! tracking, or ambient scope propagation - that all lives above this crate.
//!
//! ## Available stores
//!
//! - [`MemoryStore`] - deterministic in-memory store used by every test
//!
//! ## Example
//!
//! ```rust
//! use scopedb_store::{IsolationLevel, MemoryStore, Row, Store, Value};
//!
//! let store = MemoryStore::new();
//! let conn = store.connect();
//! let tx = store.begin(conn, IsolationLevel::ReadCommitted).unwrap();
//! let row = Row::new().with("title", Value::text("Dune"));
//! store.insert(tx, "books", 1, row).unwrap();
//! store.commit(tx).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;
mod value;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{ConnectionId, IsolationLevel, RecordKey, Store, TxHandle};
pub use value::{Row, Value};
