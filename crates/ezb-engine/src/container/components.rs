//! Server components
//!
//! Services plugged into an embedded server (statistics, timers, ...) are
//! [`Component`]s. The [`ComponentManager`] starts them in registration
//! order and stops them in reverse order.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Component lifecycle failures
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A component failed to start or stop
    #[error("Component {component} failed: {message}")]
    Failed {
        /// Component name
        component: String,
        /// What went wrong
        message: String,
    },

    /// Another component is registered under the same name
    #[error("Component {0} is already registered")]
    Duplicate(String),
}

/// A service with a lifecycle
pub trait Component: Send + Sync {
    /// Registration name
    fn name(&self) -> &str;

    /// Prepare resources; called once before `start`
    fn init(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Start serving
    fn start(&self) -> Result<(), ComponentError>;

    /// Stop serving
    fn stop(&self) -> Result<(), ComponentError>;
}

/// Registry of the components of one server
#[derive(Default)]
pub struct ComponentManager {
    components: RwLock<Vec<Arc<dyn Component>>>,
    started: RwLock<usize>,
}

impl ComponentManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component
    pub fn register(&self, component: Arc<dyn Component>) -> Result<(), ComponentError> {
        let mut components = self.components.write();
        if components.iter().any(|c| c.name() == component.name()) {
            return Err(ComponentError::Duplicate(component.name().to_string()));
        }
        debug!(component = component.name(), "Registered component");
        components.push(component);
        Ok(())
    }

    /// Component by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Registered names in start order
    pub fn names(&self) -> Vec<String> {
        self.components
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Initialize and start every component
    ///
    /// When one fails, the ones already started are stopped again.
    pub fn start_all(&self) -> Result<(), ComponentError> {
        let components = self.components.read().clone();
        for (index, component) in components.iter().enumerate() {
            let outcome = component.init().and_then(|()| component.start());
            if let Err(e) = outcome {
                for started in components[..index].iter().rev() {
                    if let Err(stop_error) = started.stop() {
                        warn!(component = started.name(), error = %stop_error, "Cannot stop component");
                    }
                }
                *self.started.write() = 0;
                return Err(e);
            }
            info!(component = component.name(), "Component started");
        }
        *self.started.write() = components.len();
        Ok(())
    }

    /// Stop every started component, last started first
    ///
    /// Failures are logged; every component gets its stop call.
    pub fn stop_all(&self) {
        let components = self.components.read().clone();
        let mut started = self.started.write();
        for component in components[..(*started).min(components.len())].iter().rev() {
            match component.stop() {
                Ok(()) => info!(component = component.name(), "Component stopped"),
                Err(e) => warn!(component = component.name(), error = %e, "Cannot stop component"),
            }
        }
        *started = 0;
    }
}

impl std::fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentManager")
            .field("components", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Probe {
        name: &'static str,
        fail_start: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Component for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn start(&self) -> Result<(), ComponentError> {
            if self.fail_start {
                return Err(ComponentError::Failed {
                    component: self.name.to_string(),
                    message: "refused".to_string(),
                });
            }
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        fn stop(&self) -> Result<(), ComponentError> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn recording(name: &'static str, fail_start: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Component> {
        Arc::new(Probe {
            name,
            fail_start,
            log: log.clone(),
        })
    }

    #[test]
    fn test_start_and_stop_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ComponentManager::new();
        manager.register(recording("a", false, &log)).unwrap();
        manager.register(recording("b", false, &log)).unwrap();
        manager.start_all().unwrap();
        manager.stop_all();
        assert_eq!(*log.lock(), vec!["start a", "start b", "stop b", "stop a"]);
    }

    #[test]
    fn test_failed_start_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ComponentManager::new();
        manager.register(recording("a", false, &log)).unwrap();
        manager.register(recording("b", true, &log)).unwrap();
        assert!(manager.start_all().is_err());
        assert_eq!(*log.lock(), vec!["start a", "stop a"]);
        manager.stop_all();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = ComponentManager::new();
        manager.register(recording("a", false, &log)).unwrap();
        assert!(matches!(
            manager.register(recording("a", false, &log)),
            Err(ComponentError::Duplicate(_))
        ));
        assert!(manager.get("a").is_some());
        assert_eq!(manager.names(), vec!["a"]);
    }
}
