//! Bounded instance pool
//!
//! Idle instances are reused last-in first-out. When every slot is taken an
//! acquire blocks until an instance is released or discarded, or until the
//! acquire timeout elapses. A drained pool is closed: instances released
//! into it are handed back for destruction until it is reopened.

use std::time::{Duration, Instant};

use ezb_sdk::Throwable;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::runtime::ObjectRef;

/// Pool failures
#[derive(Debug, Error)]
pub enum PoolError {
    /// No instance became available in time
    #[error("No instance available after {0:?}")]
    Timeout(Duration),

    /// Creating a new instance failed
    #[error("Instance creation failed: {0}")]
    Create(Throwable),
}

impl PoolError {
    /// Exception seen by the caller of bean `bean`
    pub fn into_throwable(self, bean: &str) -> Throwable {
        match self {
            PoolError::Timeout(waited) => Throwable::ejb_exception(format!(
                "No instance of bean {} became available within {:?}",
                bean, waited
            )),
            PoolError::Create(cause) => {
                Throwable::ejb_exception(format!("Cannot create an instance of bean {}", bean))
                    .with_cause(cause)
            }
        }
    }
}

/// Instance accounting of a factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    /// Upper bound on live instances (none for session maps)
    pub max_size: Option<usize>,
    /// Idle instances
    pub available: usize,
    /// Instances serving a call (or held by a session)
    pub in_use: usize,
    /// Instances created so far
    pub created: u64,
    /// Instances destroyed so far
    pub discarded: u64,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<ObjectRef>,
    in_use: usize,
    created: u64,
    discarded: u64,
    closed: bool,
}

/// Pool of interchangeable instances
pub struct InstancePool {
    max_size: usize,
    timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl InstancePool {
    /// Create an empty pool
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            timeout,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        }
    }

    /// Take an idle instance, or create one with `create` if a slot is free
    ///
    /// `create` runs without the pool lock held.
    pub fn acquire<F>(&self, create: F) -> Result<ObjectRef, PoolError>
    where
        F: FnOnce() -> Result<ObjectRef, Throwable>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(instance) = state.idle.pop() {
                state.in_use += 1;
                return Ok(instance);
            }
            if state.in_use < self.max_size {
                state.in_use += 1;
                drop(state);
                return match create() {
                    Ok(instance) => {
                        self.state.lock().created += 1;
                        Ok(instance)
                    }
                    Err(cause) => {
                        self.state.lock().in_use -= 1;
                        self.available.notify_one();
                        Err(PoolError::Create(cause))
                    }
                };
            }
            if self.available.wait_until(&mut state, deadline).timed_out()
                && state.idle.is_empty()
                && state.in_use >= self.max_size
            {
                return Err(PoolError::Timeout(self.timeout));
            }
        }
    }

    /// Return an instance after a successful call
    ///
    /// A closed pool does not keep it; the instance comes back and the
    /// caller destroys it.
    pub fn release(&self, instance: ObjectRef) -> Option<ObjectRef> {
        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        let rejected = if state.closed {
            state.discarded += 1;
            Some(instance)
        } else {
            state.idle.push(instance);
            None
        };
        drop(state);
        self.available.notify_one();
        rejected
    }

    /// Forget an acquired instance; the caller destroys it
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.discarded += 1;
        drop(state);
        self.available.notify_one();
    }

    /// Close the pool and return every idle instance
    pub fn drain(&self) -> Vec<ObjectRef> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = std::mem::take(&mut state.idle);
        state.discarded += drained.len() as u64;
        drained
    }

    /// Accept released instances again
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    /// Current accounting
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            max_size: Some(self.max_size),
            available: state.idle.len(),
            in_use: state.in_use,
            created: state.created,
            discarded: state.discarded,
        }
    }
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool")
            .field("max_size", &self.max_size)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
