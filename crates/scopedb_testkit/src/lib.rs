//! # ScopeDB Testkit
//!
//! Test utilities for ScopeDB.
//!
//! This crate provides:
//! - A seeded library fixture (authors and books) over a fresh
//!   in-memory store
//! - Property-based test generators using proptest
//! - Tracing initialization for test runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scopedb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_library() {
//!     with_library(|lib| {
//!         let mut uow = lib.unit_of_work();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use fixtures::*;
pub use generators::*;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Initializes tracing output for tests, once per process.
///
/// Honors `RUST_LOG`; defaults to `debug` for the scopedb crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("scopedb_core=debug,scopedb_store=debug")
            });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
