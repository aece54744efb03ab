//! Container-managed transactions
//!
//! The transaction manager itself is a black box behind
//! [`TransactionManager`]. [`demarcate`] applies a method's transaction
//! attribute around a call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use ezb_sdk::{names, Throwable, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metadata::TransactionAttribute;

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Transaction manager failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The thread already has a transaction
    #[error("Thread already associated with {0}")]
    AlreadyActive(TransactionId),

    /// The thread has no transaction
    #[error("No transaction associated with the current thread")]
    NoTransaction,

    /// Commit turned into a rollback
    #[error("Transaction {0} was marked rollback-only and has been rolled back")]
    RolledBack(TransactionId),
}

/// Transaction service consumed by the invocation pipeline
pub trait TransactionManager: Send + Sync {
    /// Transaction of the current thread
    fn current(&self) -> Option<TransactionId>;

    /// Start a transaction on the current thread
    fn begin(&self) -> Result<TransactionId, TransactionError>;

    /// Commit the current transaction
    fn commit(&self) -> Result<(), TransactionError>;

    /// Roll back the current transaction
    fn rollback(&self) -> Result<(), TransactionError>;

    /// Mark the current transaction so that it can only roll back
    fn set_rollback_only(&self) -> Result<(), TransactionError>;

    /// Detach the current transaction from the thread
    fn suspend(&self) -> Option<TransactionId>;

    /// Reattach a suspended transaction
    fn resume(&self, transaction: TransactionId) -> Result<(), TransactionError>;
}

#[derive(Debug, Clone, Copy)]
struct TxState {
    id: TransactionId,
    rollback_only: bool,
}

/// In-process transaction manager associating transactions with threads
#[derive(Default)]
pub struct LocalTransactionManager {
    next_id: AtomicU64,
    active: DashMap<ThreadId, TxState>,
    suspended: DashMap<TransactionId, TxState>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl LocalTransactionManager {
    /// Create a manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed transactions
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Number of rolled back transactions
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Whether the current transaction is marked rollback-only
    pub fn is_rollback_only(&self) -> bool {
        self.active
            .get(&thread::current().id())
            .map(|s| s.rollback_only)
            .unwrap_or(false)
    }
}

impl TransactionManager for LocalTransactionManager {
    fn current(&self) -> Option<TransactionId> {
        self.active.get(&thread::current().id()).map(|s| s.id)
    }

    fn begin(&self) -> Result<TransactionId, TransactionError> {
        let thread = thread::current().id();
        if let Some(state) = self.active.get(&thread) {
            return Err(TransactionError::AlreadyActive(state.id));
        }
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.active.insert(
            thread,
            TxState {
                id,
                rollback_only: false,
            },
        );
        debug!(transaction = %id, "Transaction started");
        Ok(id)
    }

    fn commit(&self) -> Result<(), TransactionError> {
        let (_, state) = self
            .active
            .remove(&thread::current().id())
            .ok_or(TransactionError::NoTransaction)?;
        if state.rollback_only {
            self.rolled_back.fetch_add(1, Ordering::Relaxed);
            debug!(transaction = %state.id, "Rollback-only transaction rolled back on commit");
            return Err(TransactionError::RolledBack(state.id));
        }
        self.committed.fetch_add(1, Ordering::Relaxed);
        debug!(transaction = %state.id, "Transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), TransactionError> {
        let (_, state) = self
            .active
            .remove(&thread::current().id())
            .ok_or(TransactionError::NoTransaction)?;
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        debug!(transaction = %state.id, "Transaction rolled back");
        Ok(())
    }

    fn set_rollback_only(&self) -> Result<(), TransactionError> {
        let mut state = self
            .active
            .get_mut(&thread::current().id())
            .ok_or(TransactionError::NoTransaction)?;
        state.rollback_only = true;
        Ok(())
    }

    fn suspend(&self) -> Option<TransactionId> {
        let (_, state) = self.active.remove(&thread::current().id())?;
        self.suspended.insert(state.id, state);
        Some(state.id)
    }

    fn resume(&self, transaction: TransactionId) -> Result<(), TransactionError> {
        let thread = thread::current().id();
        if let Some(state) = self.active.get(&thread) {
            return Err(TransactionError::AlreadyActive(state.id));
        }
        let (_, state) = self
            .suspended
            .remove(&transaction)
            .ok_or(TransactionError::NoTransaction)?;
        self.active.insert(thread, state);
        Ok(())
    }
}

impl fmt::Debug for LocalTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransactionManager")
            .field("active", &self.active.len())
            .field("suspended", &self.suspended.len())
            .finish()
    }
}

fn system_error(context: &str, err: TransactionError) -> Throwable {
    Throwable::ejb_exception(format!("{}: {}", context, err))
}

/// What the transaction should do with a failure of the bean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Application exception that does not require rollback
    Application,
    /// Application exception flagged for rollback
    ApplicationRollback,
    /// System exception
    System,
}

/// Run `call` under `attribute`
///
/// `classify` decides how a failure affects the transaction. A system
/// exception raised inside the caller's transaction marks it rollback-only
/// and surfaces as `EJBTransactionRolledbackException`; inside a transaction
/// started here it rolls back and propagates unchanged.
pub fn demarcate<F, C>(
    tm: &dyn TransactionManager,
    attribute: TransactionAttribute,
    classify: C,
    call: F,
) -> Result<Value, Throwable>
where
    F: FnOnce() -> Result<Value, Throwable>,
    C: Fn(&Throwable) -> FailureKind,
{
    let current = tm.current();
    match attribute {
        TransactionAttribute::Required => match current {
            Some(_) => run_joined(tm, &classify, call),
            None => run_new(tm, &classify, call),
        },
        TransactionAttribute::RequiresNew => {
            let suspended = tm.suspend();
            let result = run_new(tm, &classify, call);
            resume(tm, suspended);
            result
        }
        TransactionAttribute::Mandatory => match current {
            Some(_) => run_joined(tm, &classify, call),
            None => Err(Throwable::of(
                names::EJB_TRANSACTION_REQUIRED,
                "Method requires a transaction but the caller has none",
            )),
        },
        TransactionAttribute::Supports => match current {
            Some(_) => run_joined(tm, &classify, call),
            None => call(),
        },
        TransactionAttribute::NotSupported => {
            let suspended = tm.suspend();
            let result = call();
            resume(tm, suspended);
            result
        }
        TransactionAttribute::Never => match current {
            Some(id) => Err(Throwable::ejb_exception(format!(
                "Method must not be called within a transaction (caller has {})",
                id
            ))),
            None => call(),
        },
    }
}

fn resume(tm: &dyn TransactionManager, suspended: Option<TransactionId>) {
    if let Some(id) = suspended {
        if let Err(e) = tm.resume(id) {
            warn!(transaction = %id, error = %e, "Cannot resume suspended transaction");
        }
    }
}

fn run_joined<F, C>(tm: &dyn TransactionManager, classify: &C, call: F) -> Result<Value, Throwable>
where
    F: FnOnce() -> Result<Value, Throwable>,
    C: Fn(&Throwable) -> FailureKind,
{
    call().map_err(|t| match classify(&t) {
        FailureKind::Application => t,
        FailureKind::ApplicationRollback => {
            if let Err(e) = tm.set_rollback_only() {
                warn!(error = %e, "Cannot mark transaction rollback-only");
            }
            t
        }
        FailureKind::System => {
            if let Err(e) = tm.set_rollback_only() {
                warn!(error = %e, "Cannot mark transaction rollback-only");
            }
            let message = t.to_string();
            Throwable::of(names::EJB_TRANSACTION_ROLLEDBACK, message).with_cause(t)
        }
    })
}

fn run_new<F, C>(tm: &dyn TransactionManager, classify: &C, call: F) -> Result<Value, Throwable>
where
    F: FnOnce() -> Result<Value, Throwable>,
    C: Fn(&Throwable) -> FailureKind,
{
    tm.begin()
        .map_err(|e| system_error("Cannot start transaction", e))?;
    match call() {
        Ok(value) => match tm.commit() {
            Ok(()) => Ok(value),
            Err(TransactionError::RolledBack(id)) => Err(Throwable::of(
                names::EJB_TRANSACTION_ROLLEDBACK,
                format!("Transaction {} was rolled back", id),
            )),
            Err(e) => Err(system_error("Commit failed", e)),
        },
        Err(t) => {
            let outcome = match classify(&t) {
                FailureKind::Application => tm.commit(),
                FailureKind::ApplicationRollback | FailureKind::System => tm.rollback(),
            };
            if let Err(e) = outcome {
                debug!(error = %e, "Transaction completion after failure");
            }
            Err(t)
        }
    }
}
