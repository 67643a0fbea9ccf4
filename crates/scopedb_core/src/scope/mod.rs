//! Ambient transaction-scope coordination.
//!
//! Scopes nest in strict LIFO order within one [`AmbientContext`]. The
//! innermost scope defines the ambient transaction that unit-of-work
//! saves join; see [`ScopeOption`] for how a new scope relates to it.

mod coordinator;
mod state;

pub use coordinator::{AmbientContext, AmbientTxn, TransactionScope};
pub use state::{ScopeOption, ScopeState};
