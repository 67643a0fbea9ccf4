//! The ambient context and the scope guard.

use crate::error::{CoreError, CoreResult};
use crate::scope::state::{ScopeFrame, ScopeOption, ScopeState, SharedTxn};
use crate::types::ScopeId;
use scopedb_store::{ConnectionId, IsolationLevel, Store, TxHandle};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Read-only view of the currently ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientTxn {
    /// Handle of the live store transaction.
    pub tx: TxHandle,
    /// Connection the transaction runs on.
    pub conn: ConnectionId,
    /// Isolation level it was begun with.
    pub isolation: IsolationLevel,
    /// Whether a sharing scope has already voted rollback.
    pub doomed: bool,
}

#[derive(Debug, Default)]
struct ContextInner {
    stack: Vec<ScopeFrame>,
    txns: Vec<Option<SharedTxn>>,
    next_scope: u64,
}

/// Carrier of the ambient transaction for one logical caller.
///
/// The context is an explicit value handed around, not hidden
/// thread-local state. It is `!Send` by construction (`Rc` inside), so
/// handing it to another thread is a compile error rather than a
/// runtime surprise. Clones share the same scope stack.
#[derive(Clone)]
pub struct AmbientContext {
    store: Arc<dyn Store>,
    inner: Rc<RefCell<ContextInner>>,
}

impl std::fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AmbientContext")
            .field("depth", &inner.stack.len())
            .finish_non_exhaustive()
    }
}

impl AmbientContext {
    /// Creates a context with no ambient transaction.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            inner: Rc::new(RefCell::new(ContextInner::default())),
        }
    }

    /// The store this context coordinates transactions on.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Opens a scope on `conn` and pushes it onto the stack.
    ///
    /// With [`ScopeOption::Required`] and an ambient transaction
    /// present, the scope joins it; an explicit `isolation` is ignored
    /// in that case because the ambient transaction's level already
    /// governs every participant. Otherwise a fresh store transaction
    /// is begun with `isolation` (`Serializable` when unspecified).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NestedTransactionNotSupported`] for a
    /// `RequiresNew` scope on the connection already carrying the
    /// ambient transaction, or a store error if `begin` fails.
    pub fn begin_scope(
        &self,
        conn: ConnectionId,
        option: ScopeOption,
        isolation: Option<IsolationLevel>,
    ) -> CoreResult<TransactionScope> {
        let mut inner = self.inner.borrow_mut();
        let ambient = inner
            .stack
            .last()
            .map(|frame| frame.txn)
            .and_then(|slot| inner.txns[slot].as_ref().map(|txn| (slot, txn.conn)));

        let (slot, owns_txn) = match (option, ambient) {
            (ScopeOption::Required, Some((slot, ambient_conn))) => {
                if conn != ambient_conn {
                    return Err(CoreError::UnsupportedDistributedTransaction);
                }
                let ambient_level = inner.txns[slot].as_ref().map(|txn| txn.isolation);
                if isolation.is_some() && isolation != ambient_level {
                    debug!(%conn, "explicit isolation ignored; joining ambient transaction");
                }
                (slot, false)
            }
            (ScopeOption::RequiresNew, Some((_, ambient_conn))) if conn == ambient_conn => {
                return Err(CoreError::NestedTransactionNotSupported);
            }
            _ => {
                let level = isolation.unwrap_or_default();
                let tx = self.store.begin(conn, level)?;
                debug!(%tx, %conn, isolation = %level, "transaction begun");
                inner.txns.push(Some(SharedTxn {
                    tx,
                    conn,
                    isolation: level,
                    doomed: false,
                }));
                (inner.txns.len() - 1, true)
            }
        };

        let id = ScopeId::new(inner.next_scope);
        inner.next_scope += 1;
        inner.stack.push(ScopeFrame {
            id,
            option,
            state: ScopeState::Active,
            txn: slot,
            owns_txn,
        });
        debug!(%id, ?option, joined = !owns_txn, "scope opened");

        Ok(TransactionScope {
            ctx: self.clone(),
            id,
            disposed: false,
        })
    }

    /// The currently ambient transaction, if any scope is open.
    #[must_use]
    pub fn current_txn(&self) -> Option<AmbientTxn> {
        let inner = self.inner.borrow();
        let slot = inner.stack.last()?.txn;
        inner.txns[slot].as_ref().map(|txn| AmbientTxn {
            tx: txn.tx,
            conn: txn.conn,
            isolation: txn.isolation,
            doomed: txn.doomed,
        })
    }

    /// The ambient transaction, failing if no scope is open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoAmbientTransaction`].
    pub fn require_txn(&self) -> CoreResult<AmbientTxn> {
        self.current_txn().ok_or(CoreError::NoAmbientTransaction)
    }

    /// Checks whether any scope is currently open.
    #[must_use]
    pub fn has_ambient(&self) -> bool {
        !self.inner.borrow().stack.is_empty()
    }

    /// State of a scope, or `Disposed` if it has left the stack.
    #[must_use]
    pub fn scope_state(&self, id: ScopeId) -> ScopeState {
        self.inner
            .borrow()
            .stack
            .iter()
            .find(|frame| frame.id == id)
            .map_or(ScopeState::Disposed, |frame| frame.state)
    }

    /// Dooms the ambient transaction so it can only roll back.
    ///
    /// Called when a flush inside a scope fails: the transaction's
    /// partial writes must not survive, whatever the scopes later vote.
    pub fn doom_current(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(slot) = inner.stack.last().map(|frame| frame.txn) {
            if let Some(txn) = inner.txns[slot].as_mut() {
                debug!(tx = %txn.tx, "ambient transaction doomed");
                txn.doomed = true;
            }
        }
    }

    fn complete(&self, id: ScopeId) -> CoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        let frame = inner
            .stack
            .iter_mut()
            .find(|frame| frame.id == id)
            .ok_or_else(|| CoreError::invalid_state(format!("{id} is already disposed")))?;
        match frame.state {
            ScopeState::Active => {
                frame.state = ScopeState::Completed;
                debug!(%id, "scope completed");
                Ok(())
            }
            ScopeState::Completed => Err(CoreError::invalid_state(format!(
                "{id} was already completed"
            ))),
            ScopeState::Disposed => Err(CoreError::invalid_state(format!("{id} is disposed"))),
        }
    }

    fn dispose(&self, id: ScopeId) -> CoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.stack.last() {
            Some(frame) if frame.id == id => {}
            Some(_) => {
                return Err(CoreError::invalid_state(format!(
                    "{id} is not the innermost scope; dispose in LIFO order"
                )))
            }
            None => return Err(CoreError::invalid_state(format!("{id} is already disposed"))),
        }
        let frame = inner.stack.pop().ok_or(CoreError::NoAmbientTransaction)?;

        let completed = frame.state == ScopeState::Completed;
        if !completed {
            // An un-completed participant vetoes the whole transaction.
            if let Some(txn) = inner.txns[frame.txn].as_mut() {
                txn.doomed = true;
            }
        }
        if !frame.owns_txn {
            debug!(%id, option = ?frame.option, completed, "joined scope closed");
            return Ok(());
        }

        let txn = inner.txns[frame.txn]
            .take()
            .ok_or_else(|| CoreError::invalid_state(format!("{id} lost its transaction")))?;
        drop(inner);

        if completed && !txn.doomed {
            debug!(%id, option = ?frame.option, tx = %txn.tx, "committing");
            self.store.commit(txn.tx)?;
        } else {
            debug!(%id, option = ?frame.option, tx = %txn.tx, doomed = txn.doomed, "rolling back");
            self.store.rollback(txn.tx)?;
        }
        Ok(())
    }
}

/// Guard object for one transaction scope.
///
/// Call [`complete`](Self::complete) to vote commit, then
/// [`dispose`](Self::dispose) to close the scope and surface any
/// commit or rollback error. Dropping the guard without disposing
/// closes the scope too, rolling back on a best-effort basis.
#[derive(Debug)]
#[must_use = "an undisposed scope rolls back on drop"]
pub struct TransactionScope {
    ctx: AmbientContext,
    id: ScopeId,
    disposed: bool,
}

impl TransactionScope {
    /// This scope's identifier.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.ctx.scope_state(self.id)
    }

    /// Votes commit. May be called at most once per scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] on a second call or after
    /// disposal.
    pub fn complete(&mut self) -> CoreResult<()> {
        self.ctx.complete(self.id)
    }

    /// Closes the scope, applying its commit-or-rollback decision.
    ///
    /// Only the owning scope touches the store: a completed owner of an
    /// un-doomed transaction commits, everything else rolls back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] when an enclosing scope is
    /// disposed before its inner scopes, or the store's commit or
    /// rollback error. After an ordering error the scope stays open;
    /// dispose again once the inner scopes are closed (the drop safety
    /// net covers it otherwise).
    pub fn dispose(&mut self) -> CoreResult<()> {
        if self.disposed {
            return Err(CoreError::invalid_state(format!(
                "{} is already disposed",
                self.id
            )));
        }
        self.ctx.dispose(self.id)?;
        self.disposed = true;
        Ok(())
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.disposed {
            let _ = self.ctx.dispose(self.id);
        }
    }
}
