//! Process-wide registry of embedded servers
//!
//! Servers are held weakly: an entry stops resolving as soon as the last
//! strong holder of its server is gone. Ids come from a counter and are
//! never reused, so a stale id can only resolve to nothing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::embedded::Embedded;
use super::ContainerError;

static SERVERS: LazyLock<Mutex<FxHashMap<u32, Weak<Embedded>>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Lookup of live embedded servers by id
pub struct EmbeddedManager;

impl EmbeddedManager {
    /// Reserve a fresh server id
    pub fn next_id() -> u32 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `server` under its id
    pub fn add_embedded(server: &Arc<Embedded>) -> Result<(), ContainerError> {
        let id = server.id();
        let mut servers = SERVERS.lock();
        servers.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = servers.get(&id).and_then(Weak::upgrade) {
            if Arc::ptr_eq(&existing, server) {
                return Ok(());
            }
            return Err(ContainerError::DuplicateServer(id));
        }
        servers.insert(id, Arc::downgrade(server));
        debug!(id, "Registered embedded server");
        Ok(())
    }

    /// Server `id`, while it is alive
    pub fn get_embedded(id: u32) -> Option<Arc<Embedded>> {
        SERVERS.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Forget server `id`; returns whether an entry existed
    pub fn remove_embedded(id: u32) -> bool {
        SERVERS.lock().remove(&id).is_some()
    }

    /// Ids of the live servers, sorted
    pub fn live_ids() -> Vec<u32> {
        let mut servers = SERVERS.lock();
        servers.retain(|_, weak| weak.strong_count() > 0);
        let mut ids: Vec<u32> = servers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
