//! Embedded server
//!
//! The server owns its containers and components and the services every
//! container shares: transaction manager, permission manager, naming and
//! statistics. Building a server registers it with the
//! [`EmbeddedManager`](super::EmbeddedManager); the registry only holds it
//! weakly, so dropping the last `Arc<Embedded>` makes it unreachable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::client::{HandlerCore, LocalCallInvocationHandler, NoInterfaceView};
use crate::config::{ConfigError, ContainerConfig, EmbeddedConfig};
use crate::factory::FactoryServices;
use crate::invocation::{
    DynamicInterceptorManager, LocalTransactionManager, PermissionManager, PermitAll,
    TransactionManager,
};
use crate::statistics::StatisticComponent;

use super::components::ComponentManager;
use super::ejb_container::EzbContainer;
use super::naming::{BeanReference, InMemoryNaming, Naming, ReferenceKind};
use super::persistence::{ExtendedContexts, PersistenceUnitManager};
use super::registry::EmbeddedManager;
use super::{ContainerError, ContainerState};

/// Builder of an [`Embedded`] server
pub struct EmbeddedBuilder {
    config: EmbeddedConfig,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    permission_manager: Option<Arc<dyn PermissionManager>>,
    naming: Option<Arc<dyn Naming>>,
    persistence: Option<Arc<dyn PersistenceUnitManager>>,
}

impl EmbeddedBuilder {
    /// Start from `config`
    pub fn new(config: EmbeddedConfig) -> Self {
        Self {
            config,
            transaction_manager: None,
            permission_manager: None,
            naming: None,
            persistence: None,
        }
    }

    /// Use `manager` instead of a [`LocalTransactionManager`]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    /// Use `manager` instead of [`PermitAll`]
    pub fn permission_manager(mut self, manager: Arc<dyn PermissionManager>) -> Self {
        self.permission_manager = Some(manager);
        self
    }

    /// Use `naming` instead of an [`InMemoryNaming`]
    pub fn naming(mut self, naming: Arc<dyn Naming>) -> Self {
        self.naming = Some(naming);
        self
    }

    /// Source of extended persistence contexts
    pub fn persistence_unit_manager(mut self, manager: Arc<dyn PersistenceUnitManager>) -> Self {
        self.persistence = Some(manager);
        self
    }

    /// Validate the configuration, create the server and register it
    pub fn build(self) -> Result<Arc<Embedded>, ContainerError> {
        self.config.validate()?;

        let statistics = if self.config.server.statistics {
            let statistics = Arc::new(StatisticComponent::new(self.config.statistics.default_enabled));
            if let Err(e) = statistics.register_provider(&self.config.server.name) {
                warn!(error = %e, "Cannot register server statistic provider");
            }
            Some(statistics)
        } else {
            None
        };

        let components = ComponentManager::new();
        if let Some(statistics) = &statistics {
            components.register(statistics.clone())?;
        }

        let embedded = Arc::new(Embedded {
            id: EmbeddedManager::next_id(),
            containers: RwLock::new(BTreeMap::new()),
            components,
            statistics,
            transaction_manager: self
                .transaction_manager
                .unwrap_or_else(|| Arc::new(LocalTransactionManager::new())),
            permission_manager: self.permission_manager.unwrap_or_else(|| Arc::new(PermitAll)),
            naming: self
                .naming
                .unwrap_or_else(|| Arc::new(InMemoryNaming::new())),
            persistence: self.persistence,
            started: AtomicBool::new(false),
            config: self.config,
        });
        EmbeddedManager::add_embedded(&embedded)?;
        info!(id = embedded.id, name = %embedded.config.server.name, "Embedded server created");
        Ok(embedded)
    }
}

/// An embedded EJB server
pub struct Embedded {
    id: u32,
    config: EmbeddedConfig,
    containers: RwLock<BTreeMap<String, Arc<EzbContainer>>>,
    components: ComponentManager,
    statistics: Option<Arc<StatisticComponent>>,
    transaction_manager: Arc<dyn TransactionManager>,
    permission_manager: Arc<dyn PermissionManager>,
    naming: Arc<dyn Naming>,
    persistence: Option<Arc<dyn PersistenceUnitManager>>,
    started: AtomicBool,
}

impl Embedded {
    /// Builder with `config`
    pub fn builder(config: EmbeddedConfig) -> EmbeddedBuilder {
        EmbeddedBuilder::new(config)
    }

    /// Server with `config` and default services
    pub fn new(config: EmbeddedConfig) -> Result<Arc<Self>, ContainerError> {
        EmbeddedBuilder::new(config).build()
    }

    /// Registry id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Server name
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Configuration
    pub fn config(&self) -> &EmbeddedConfig {
        &self.config
    }

    /// Statistics component, unless statistics are off
    pub fn statistics(&self) -> Option<&Arc<StatisticComponent>> {
        self.statistics.as_ref()
    }

    /// Components
    pub fn components(&self) -> &ComponentManager {
        &self.components
    }

    /// Transaction manager shared by the containers
    pub fn transaction_manager(&self) -> &Arc<dyn TransactionManager> {
        &self.transaction_manager
    }

    /// Permission manager shared by the containers
    pub fn permission_manager(&self) -> &Arc<dyn PermissionManager> {
        &self.permission_manager
    }

    /// Naming service
    pub fn naming(&self) -> &Arc<dyn Naming> {
        &self.naming
    }

    /// Create a container with the server's container defaults
    pub fn create_container(&self, id: &str) -> Result<Arc<EzbContainer>, ContainerError> {
        self.create_container_with(id, self.config.container.clone())
    }

    /// Create a container with its own settings
    pub fn create_container_with(
        &self,
        id: &str,
        config: ContainerConfig,
    ) -> Result<Arc<EzbContainer>, ContainerError> {
        if id.is_empty() || id.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "container id '{}' must be non-empty and cannot contain '/'",
                id
            ))
            .into());
        }
        let mut containers = self.containers.write();
        if containers.contains_key(id) {
            return Err(ContainerError::DuplicateContainer(id.to_string()));
        }
        let services = FactoryServices {
            embedded_id: self.id,
            server_name: self.config.server.name.clone(),
            container_id: id.to_string(),
            config,
            transaction_manager: self.transaction_manager.clone(),
            permission_manager: self.permission_manager.clone(),
            global_interceptors: Arc::new(RwLock::new(Vec::new())),
            dynamic_interceptors: Arc::new(DynamicInterceptorManager::new()),
            statistics: self.statistics.clone(),
            extended: Arc::new(ExtendedContexts::new()),
        };
        let container = Arc::new(EzbContainer::new(
            services,
            self.naming.clone(),
            self.persistence.clone(),
        ));
        containers.insert(id.to_string(), container.clone());
        info!(server = self.id, container = id, "Container created");
        Ok(container)
    }

    /// Container `id`
    pub fn container(&self, id: &str) -> Option<Arc<EzbContainer>> {
        self.containers.read().get(id).cloned()
    }

    /// Container ids, sorted
    pub fn container_ids(&self) -> Vec<String> {
        self.containers.read().keys().cloned().collect()
    }

    /// Remove container `id`, stopping it first if needed
    ///
    /// A container that fails to stop stays registered.
    pub fn remove_container(&self, id: &str) -> Result<Arc<EzbContainer>, ContainerError> {
        let container = self
            .container(id)
            .ok_or_else(|| ContainerError::UnknownContainer(id.to_string()))?;
        if container.state() == ContainerState::Started {
            container.stop()?;
        }
        self.containers.write().remove(id);
        info!(server = self.id, container = id, "Container removed");
        Ok(container)
    }

    /// Start the components, then every resolved container
    pub fn start(&self) -> Result<(), ContainerError> {
        self.components.start_all()?;
        let containers: Vec<Arc<EzbContainer>> = self.containers.read().values().cloned().collect();
        for container in containers {
            if container.state() == ContainerState::Resolved {
                container.start()?;
            }
        }
        self.started.store(true, Ordering::SeqCst);
        info!(server = self.id, "Embedded server started");
        Ok(())
    }

    /// Stop every started container, then the components
    pub fn stop(&self) {
        let containers: Vec<Arc<EzbContainer>> = self.containers.read().values().cloned().collect();
        for container in containers.iter().rev() {
            if container.state() == ContainerState::Started {
                if let Err(e) = container.stop() {
                    warn!(container = container.id(), error = %e, "Cannot stop container");
                }
            }
        }
        self.components.stop_all();
        self.started.store(false, Ordering::SeqCst);
        info!(server = self.id, "Embedded server stopped");
    }

    /// Whether [`start`](Self::start) ran last
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Reference bound under `name`
    pub fn lookup(&self, name: &str) -> Result<BeanReference, ContainerError> {
        Ok(self.naming.lookup(name)?)
    }

    /// Instantiate the no-interface view bound under `name`
    pub fn no_interface_view(&self, name: &str) -> Result<NoInterfaceView, ContainerError> {
        let reference = self.lookup(name)?;
        let ReferenceKind::NoInterface { bean_class } = &reference.kind else {
            return Err(ContainerError::NoView(format!("{} is not a no-interface view", name)));
        };
        let container = self
            .container(&reference.container_id)
            .ok_or_else(|| ContainerError::UnknownContainer(reference.container_id.clone()))?;
        let factory = container
            .factory(&reference.factory_name)
            .ok_or_else(|| ContainerError::UnknownBean(reference.factory_name.clone()))?;
        let core = HandlerCore::new(
            reference.container_id.as_str(),
            reference.factory_name.as_str(),
            bean_class.as_str(),
            reference.stateful,
        );
        let handler = LocalCallInvocationHandler::new(self.id, core).with_factory(factory);
        NoInterfaceView::new(container.loader().clone(), bean_class, handler)
            .map_err(|cause| ContainerError::NoView(cause.to_string()))
    }
}

impl fmt::Debug for Embedded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedded")
            .field("id", &self.id)
            .field("name", &self.config.server.name)
            .field("containers", &self.container_ids())
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_registers_server() {
        let embedded = Embedded::new(EmbeddedConfig::default()).unwrap();
        let found = EmbeddedManager::get_embedded(embedded.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &embedded));
        assert_eq!(embedded.components().names(), vec!["statistics"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EmbeddedConfig::default();
        config.container.pool_size = 0;
        assert!(matches!(Embedded::new(config), Err(ContainerError::Config(_))));
    }

    #[test]
    fn test_container_ids() {
        let embedded = Embedded::new(EmbeddedConfig::default()).unwrap();
        embedded.create_container("b").unwrap();
        embedded.create_container("a").unwrap();
        assert!(matches!(
            embedded.create_container("a"),
            Err(ContainerError::DuplicateContainer(_))
        ));
        assert!(matches!(embedded.create_container("x/y"), Err(ContainerError::Config(_))));
        assert_eq!(embedded.container_ids(), vec!["a", "b"]);
        embedded.remove_container("a").unwrap();
        assert_eq!(embedded.container_ids(), vec!["b"]);
    }

    #[test]
    fn test_remove_started_container() {
        let embedded = Embedded::new(EmbeddedConfig::default()).unwrap();
        let container = embedded.create_container("shop").unwrap();
        container.resolve().unwrap();
        container.start().unwrap();

        let removed = embedded.remove_container("shop").unwrap();
        assert!(Arc::ptr_eq(&removed, &container));
        assert_eq!(removed.state(), ContainerState::Stopped);
        assert!(embedded.container("shop").is_none());
        assert!(matches!(
            embedded.remove_container("shop"),
            Err(ContainerError::UnknownContainer(_))
        ));
    }

    #[test]
    fn test_statistics_off() {
        let mut config = EmbeddedConfig::default();
        config.server.statistics = false;
        let embedded = Embedded::new(config).unwrap();
        assert!(embedded.statistics().is_none());
        assert!(embedded.components().names().is_empty());
    }
}
