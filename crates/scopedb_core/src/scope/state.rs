//! Scope lifecycle state and the frames the coordinator stacks.

use crate::types::ScopeId;
use scopedb_store::{ConnectionId, IsolationLevel, TxHandle};

/// How a new scope relates to an already-ambient transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeOption {
    /// Join the ambient transaction if one exists, otherwise start one.
    ///
    /// A joined scope shares the owner's store transaction: there is no
    /// partial commit, and leaving the scope un-completed dooms the
    /// whole shared transaction.
    #[default]
    Required,
    /// Always start an independent transaction, even inside another
    /// scope. Requires its own connection; the underlying store rejects
    /// a second live transaction on one connection.
    RequiresNew,
}

/// Lifecycle state of one scope.
///
/// Scopes move strictly forward: `Active` to `Completed` to `Disposed`,
/// or `Active` straight to `Disposed` (which votes rollback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Open; work may still happen inside it.
    Active,
    /// The caller voted commit. No further completes are allowed.
    Completed,
    /// Closed; its commit-or-rollback decision has been applied.
    Disposed,
}

/// A store transaction shared by one or more stacked scopes.
#[derive(Debug)]
pub(crate) struct SharedTxn {
    pub(crate) tx: TxHandle,
    pub(crate) conn: ConnectionId,
    pub(crate) isolation: IsolationLevel,
    /// Set when any sharing scope closes without completing. A doomed
    /// transaction rolls back at owner dispose even if the owner
    /// completed.
    pub(crate) doomed: bool,
}

/// One entry of the scope stack.
#[derive(Debug)]
pub(crate) struct ScopeFrame {
    pub(crate) id: ScopeId,
    pub(crate) option: ScopeOption,
    pub(crate) state: ScopeState,
    /// Index into the coordinator's transaction slots.
    pub(crate) txn: usize,
    /// Whether disposing this frame commits or rolls back the
    /// transaction. Exactly one frame owns each transaction.
    pub(crate) owns_txn: bool,
}
