//! Persistence hooks
//!
//! The container does not implement persistence. It only keeps the
//! extended persistence contexts handed out by a pluggable
//! [`PersistenceUnitManager`], one set per thread, and closes them when the
//! thread's outermost bean call returns or the container stops.

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

/// Persistence failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// No manager is configured
    #[error("No persistence unit manager is configured")]
    NoManager,

    /// The manager does not know the unit
    #[error("Unknown persistence unit {0}")]
    UnknownUnit(String),
}

/// An extended persistence context
pub trait ExtendedPersistenceContext: Send + Sync {
    /// Unit the context belongs to
    fn unit_name(&self) -> &str;

    /// Release the context
    fn close(&self);
}

/// Source of persistence contexts
pub trait PersistenceUnitManager: Send + Sync {
    /// Known unit names
    fn unit_names(&self) -> Vec<String>;

    /// Open an extended context for `unit`
    fn create_extended_context(&self, unit: &str) -> Result<Arc<dyn ExtendedPersistenceContext>, PersistenceError>;
}

type ContextMap = FxHashMap<String, Arc<dyn ExtendedPersistenceContext>>;

#[derive(Default)]
struct ThreadContexts {
    depth: usize,
    contexts: ContextMap,
}

/// Extended contexts, per thread and unit
///
/// Contexts opened during a call live until the outermost
/// [`CallScope`] of the thread ends.
#[derive(Default)]
pub struct ExtendedContexts {
    by_thread: DashMap<ThreadId, ThreadContexts>,
}

impl ExtendedContexts {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a call on the current thread
    pub fn enter(&self) -> CallScope<'_> {
        let thread = std::thread::current().id();
        self.by_thread.entry(thread).or_default().depth += 1;
        CallScope {
            contexts: self,
            thread,
        }
    }

    /// Context of `unit` for the current thread, created on first use
    pub fn get_or_create<F>(&self, unit: &str, create: F) -> Result<Arc<dyn ExtendedPersistenceContext>, PersistenceError>
    where
        F: FnOnce() -> Result<Arc<dyn ExtendedPersistenceContext>, PersistenceError>,
    {
        let thread = std::thread::current().id();
        let existing = self
            .by_thread
            .get(&thread)
            .and_then(|entry| entry.contexts.get(unit).cloned());
        if let Some(context) = existing {
            return Ok(context);
        }
        let context = create()?;
        self.by_thread
            .entry(thread)
            .or_default()
            .contexts
            .insert(unit.to_string(), context.clone());
        debug!(unit, "Opened extended persistence context");
        Ok(context)
    }

    /// Units with an open context on the current thread, sorted
    pub fn current(&self) -> Vec<String> {
        let thread = std::thread::current().id();
        let mut units: Vec<String> = self
            .by_thread
            .get(&thread)
            .map(|entry| entry.contexts.keys().cloned().collect())
            .unwrap_or_default();
        units.sort();
        units
    }

    /// Close the contexts of the current thread; returns how many were open
    pub fn release_current(&self) -> usize {
        let thread = std::thread::current().id();
        let contexts = match self.by_thread.get_mut(&thread) {
            Some(mut entry) => std::mem::take(&mut entry.contexts),
            None => return 0,
        };
        self.by_thread.remove_if(&thread, |_, entry| entry.depth == 0);
        close_all(contexts)
    }

    /// Close every context of every thread
    pub fn clear_all(&self) -> usize {
        let threads: Vec<ThreadId> = self.by_thread.iter().map(|e| *e.key()).collect();
        threads
            .into_iter()
            .filter_map(|thread| self.by_thread.remove(&thread))
            .map(|(_, entry)| close_all(entry.contexts))
            .sum()
    }

    /// Number of threads holding contexts or inside a call
    pub fn thread_count(&self) -> usize {
        self.by_thread.len()
    }

    fn leave(&self, thread: ThreadId) {
        if let Some(mut entry) = self.by_thread.get_mut(&thread) {
            entry.depth = entry.depth.saturating_sub(1);
        }
        if let Some((_, entry)) = self.by_thread.remove_if(&thread, |_, entry| entry.depth == 0) {
            let closed = close_all(entry.contexts);
            if closed > 0 {
                debug!(closed, "Closed extended persistence contexts at end of call");
            }
        }
    }
}

/// A call in progress on one thread; see [`ExtendedContexts::enter`]
#[must_use = "the scope ends when dropped"]
pub struct CallScope<'a> {
    contexts: &'a ExtendedContexts,
    thread: ThreadId,
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.contexts.leave(self.thread);
    }
}

impl fmt::Debug for CallScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallScope").field("thread", &self.thread).finish()
    }
}

fn close_all(contexts: ContextMap) -> usize {
    let count = contexts.len();
    for context in contexts.into_values() {
        context.close();
    }
    count
}

impl fmt::Debug for ExtendedContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedContexts")
            .field("threads", &self.by_thread.len())
            .finish()
    }
}
