//! EJB container
//!
//! Lifecycle: `Created` (deploy beans) → `Resolved` (classes enhanced and
//! loaded, factories built) → `Started` (views bound, calls served) →
//! `Stopped`. A stopped container can be started again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ezb_sdk::Throwable;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::classfile::ClassFile;
use crate::enhancer::Enhancer;
use crate::factory::{
    BeanDeployment, Factory, FactoryServices, MessageDrivenFactory, SingletonFactory,
    StatefulFactory, StatelessFactory, TimerHandle,
};
use crate::invocation::{DynamicInterceptorManager, GlobalInterceptors, Interceptor, ViewKind};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::BeanClassLoader;
use crate::statistics::container_provider;

use super::naming::{
    business_name, home_name, local_home_name, no_interface_name, BeanReference, Naming,
    ReferenceKind,
};
use super::persistence::{ExtendedContexts, ExtendedPersistenceContext, PersistenceError, PersistenceUnitManager};
use super::{ContainerError, ContainerState};

#[derive(Clone)]
enum FactoryHandle {
    Stateless(Arc<StatelessFactory>),
    Stateful(Arc<StatefulFactory>),
    Singleton(Arc<SingletonFactory>),
    MessageDriven(Arc<MessageDrivenFactory>),
}

impl FactoryHandle {
    fn factory(&self) -> Arc<dyn Factory> {
        match self {
            FactoryHandle::Stateless(f) => f.clone(),
            FactoryHandle::Stateful(f) => f.clone(),
            FactoryHandle::Singleton(f) => f.clone(),
            FactoryHandle::MessageDriven(f) => f.clone(),
        }
    }
}

/// A container of beans
pub struct EzbContainer {
    id: String,
    state: RwLock<ContainerState>,
    services: FactoryServices,
    enhancer: Enhancer,
    loader: Arc<BeanClassLoader>,
    naming: Arc<dyn Naming>,
    persistence: Option<Arc<dyn PersistenceUnitManager>>,
    pending: Mutex<Vec<BeanDeployment>>,
    factories: RwLock<BTreeMap<String, FactoryHandle>>,
    managed: RwLock<Vec<String>>,
    bound: Mutex<Vec<String>>,
    provider: String,
}

impl EzbContainer {
    pub(crate) fn new(
        services: FactoryServices,
        naming: Arc<dyn Naming>,
        persistence: Option<Arc<dyn PersistenceUnitManager>>,
    ) -> Self {
        let id = services.container_id.clone();
        let provider = container_provider(&services.server_name, &id);
        Self {
            enhancer: Enhancer::new(services.config.enhancer_options()),
            loader: Arc::new(BeanClassLoader::new(id.as_str())),
            state: RwLock::new(ContainerState::Created),
            pending: Mutex::new(Vec::new()),
            factories: RwLock::new(BTreeMap::new()),
            managed: RwLock::new(Vec::new()),
            bound: Mutex::new(Vec::new()),
            id,
            services,
            naming,
            persistence,
            provider,
        }
    }

    /// Container id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> ContainerState {
        *self.state.read()
    }

    /// Loader holding the enhanced classes
    pub fn loader(&self) -> &Arc<BeanClassLoader> {
        &self.loader
    }

    /// Statistic provider id of the container
    pub fn provider_id(&self) -> &str {
        &self.provider
    }

    fn invalid(&self, state: ContainerState, operation: &'static str) -> ContainerError {
        ContainerError::InvalidState {
            container: self.id.clone(),
            state,
            operation,
        }
    }

    /// Add a bean; only before [`resolve`](Self::resolve)
    pub fn deploy(&self, deployment: BeanDeployment) -> Result<(), ContainerError> {
        let state = self.state.read();
        if *state != ContainerState::Created {
            return Err(self.invalid(*state, "deploy into"));
        }
        let mut pending = self.pending.lock();
        let name = &deployment.metadata.ejb_name;
        if pending.iter().any(|d| &d.metadata.ejb_name == name) {
            return Err(ContainerError::DuplicateBean(name.clone()));
        }
        debug!(container = %self.id, bean = %name, "Deployed bean");
        pending.push(deployment);
        Ok(())
    }

    /// Enhance and load every deployed bean and build its factory
    pub fn resolve(&self) -> Result<(), ContainerError> {
        let mut state = self.state.write();
        if *state != ContainerState::Created {
            return Err(self.invalid(*state, "resolve"));
        }
        let deployments = std::mem::take(&mut *self.pending.lock());
        let mut factories = BTreeMap::new();
        let mut managed = Vec::new();

        for deployment in deployments {
            let bean = deployment.metadata.ejb_name.clone();
            let original = ClassFile::decode(&deployment.class_bytes).map_err(|source| {
                ContainerError::Decode {
                    bean: bean.clone(),
                    source,
                }
            })?;
            let enhanced = self
                .enhancer
                .enhance(&deployment.class_bytes, &deployment.metadata)
                .map_err(|source| ContainerError::Enhance {
                    bean: bean.clone(),
                    source,
                })?;
            for class in enhanced.classes() {
                self.loader
                    .define(class)
                    .map_err(|source| ContainerError::Load {
                        bean: bean.clone(),
                        source,
                    })?;
            }

            let loader = self.loader.clone();
            let services = self.services.clone();
            let handle = match deployment.metadata.kind {
                BeanKind::Stateless => FactoryHandle::Stateless(StatelessFactory::new(
                    deployment, &original, loader, services,
                )),
                BeanKind::Stateful => FactoryHandle::Stateful(StatefulFactory::new(
                    deployment, &original, loader, services,
                )),
                BeanKind::Singleton => FactoryHandle::Singleton(SingletonFactory::new(
                    deployment, &original, loader, services,
                )),
                BeanKind::MessageDriven => FactoryHandle::MessageDriven(MessageDrivenFactory::new(
                    deployment, &original, loader, services,
                )),
                BeanKind::Managed | BeanKind::Plain => {
                    debug!(container = %self.id, bean = %bean, "Enhanced class without factory");
                    managed.push(bean);
                    continue;
                }
            };
            handle
                .factory()
                .init()
                .map_err(|source| ContainerError::Factory {
                    bean: bean.clone(),
                    source,
                })?;
            factories.insert(bean, handle);
        }

        info!(
            container = %self.id,
            factories = factories.len(),
            classes = self.loader.len(),
            "Container resolved"
        );
        *self.factories.write() = factories;
        *self.managed.write() = managed;
        *state = ContainerState::Resolved;
        Ok(())
    }

    /// Start every factory and bind the client views
    ///
    /// If a factory fails to start, it and the ones already started are
    /// stopped and unregistered again, and the container stays in its
    /// previous state.
    pub fn start(&self) -> Result<(), ContainerError> {
        let mut state = self.state.write();
        if !matches!(*state, ContainerState::Resolved | ContainerState::Stopped) {
            return Err(self.invalid(*state, "start"));
        }

        if let Some(statistics) = &self.services.statistics {
            if let Err(e) = statistics.register_provider(&self.provider) {
                warn!(provider = %self.provider, error = %e, "Cannot register statistic provider");
            }
        }

        let factories = self.factories.read();
        let mut started: Vec<Arc<dyn Factory>> = Vec::new();
        for (name, handle) in factories.iter() {
            let factory = handle.factory();
            self.services.permission_manager.register_bean(factory.metadata());
            if let Err(source) = factory.start() {
                factory.stop();
                self.services.permission_manager.unregister_bean(factory.name());
                self.rollback(&started);
                return Err(ContainerError::Factory {
                    bean: name.clone(),
                    source,
                });
            }
            started.push(factory);
        }

        for factory in &started {
            if let Err(e) = self.bind_views(factory.metadata()) {
                self.unbind_all();
                self.rollback(&started);
                return Err(e);
            }
        }

        *state = ContainerState::Started;
        info!(container = %self.id, beans = started.len(), "Container started");
        Ok(())
    }

    fn rollback(&self, started: &[Arc<dyn Factory>]) {
        for factory in started.iter().rev() {
            factory.stop();
            self.services.permission_manager.unregister_bean(factory.name());
        }
        if let Some(statistics) = &self.services.statistics {
            if let Err(e) = statistics.unregister_provider(&self.provider) {
                warn!(provider = %self.provider, error = %e, "Cannot unregister statistic provider");
            }
        }
    }

    fn bind_views(&self, metadata: &BeanClassMetadata) -> Result<(), ContainerError> {
        if !metadata.kind.is_session() {
            return Ok(());
        }
        let stateful = metadata.kind == BeanKind::Stateful;
        let reference = |interface: &ezb_sdk::InterfaceDescriptor, kind: ReferenceKind| BeanReference {
            embedded_id: self.services.embedded_id,
            container_id: self.id.clone(),
            factory_name: metadata.ejb_name.clone(),
            interface: interface.clone(),
            kind,
            stateful,
        };

        let mut views = Vec::new();
        for interface in &metadata.local_interfaces {
            views.push((
                business_name(&metadata.ejb_name, &interface.name, ViewKind::Local),
                reference(interface, ReferenceKind::Local),
            ));
        }
        for interface in &metadata.remote_interfaces {
            views.push((
                business_name(&metadata.ejb_name, &interface.name, ViewKind::Remote),
                reference(interface, ReferenceKind::Remote),
            ));
        }
        if let Some(home) = &metadata.home {
            views.push((
                home_name(&metadata.ejb_name),
                reference(
                    &home.home,
                    ReferenceKind::Home {
                        component: home.component.clone(),
                    },
                ),
            ));
        }
        if let Some(home) = &metadata.local_home {
            views.push((
                local_home_name(&metadata.ejb_name),
                reference(
                    &home.home,
                    ReferenceKind::LocalHome {
                        component: home.component.clone(),
                    },
                ),
            ));
        }
        if metadata.no_interface_view && self.services.config.no_interface_view {
            let interface = ezb_sdk::InterfaceDescriptor::new(metadata.class_name.as_str());
            views.push((
                no_interface_name(&metadata.ejb_name),
                reference(
                    &interface,
                    ReferenceKind::NoInterface {
                        bean_class: metadata.class_name.clone(),
                    },
                ),
            ));
        }

        let mut bound = self.bound.lock();
        for (name, reference) in views {
            self.naming.bind(&name, reference)?;
            bound.push(name);
        }
        Ok(())
    }

    fn unbind_all(&self) {
        for name in self.bound.lock().drain(..) {
            if let Err(e) = self.naming.unbind(&name) {
                debug!(name = %name, error = %e, "Binding already gone");
            }
        }
    }

    /// Unbind the views, stop every factory and close extended contexts
    pub fn stop(&self) -> Result<(), ContainerError> {
        let mut state = self.state.write();
        if *state != ContainerState::Started {
            return Err(self.invalid(*state, "stop"));
        }
        self.unbind_all();
        let started: Vec<Arc<dyn Factory>> =
            self.factories.read().values().map(FactoryHandle::factory).collect();
        self.rollback(&started);
        let closed = self.services.extended.clear_all();
        *state = ContainerState::Stopped;
        info!(container = %self.id, closed_contexts = closed, "Container stopped");
        Ok(())
    }

    /// Factory of bean `name`
    pub fn factory(&self, name: &str) -> Option<Arc<dyn Factory>> {
        self.factories.read().get(name).map(FactoryHandle::factory)
    }

    /// Factory of stateful bean `name`
    pub fn stateful(&self, name: &str) -> Option<Arc<StatefulFactory>> {
        match self.factories.read().get(name) {
            Some(FactoryHandle::Stateful(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// Factory of message-driven bean `name`
    pub fn message_driven(&self, name: &str) -> Option<Arc<MessageDrivenFactory>> {
        match self.factories.read().get(name) {
            Some(FactoryHandle::MessageDriven(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// Names of the beans with a factory, sorted
    pub fn factory_names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Names of the enhanced beans without a factory
    pub fn managed_beans(&self) -> Vec<String> {
        self.managed.read().clone()
    }

    /// Names bound by this container
    pub fn bound_names(&self) -> Vec<String> {
        self.bound.lock().clone()
    }

    /// Deliver `message` to message-driven bean `name`
    pub fn deliver(&self, name: &str, message: ezb_sdk::Value) -> Result<ezb_sdk::Value, Throwable> {
        let factory = self.message_driven(name).ok_or_else(|| {
            Throwable::illegal_state(format!(
                "No message-driven bean {} in container {}",
                name, self.id
            ))
        })?;
        factory.deliver(message)
    }

    /// Run the timeout callback of bean `name`
    pub fn notify_timeout(&self, name: &str, timer: &TimerHandle) -> Result<(), ContainerError> {
        let factory = self
            .factory(name)
            .ok_or_else(|| ContainerError::UnknownBean(name.to_string()))?;
        factory
            .notify_timeout(timer)
            .map_err(|source| ContainerError::Factory {
                bean: name.to_string(),
                source,
            })
    }

    /// Remove stateful sessions idle for longer than the configured timeout
    pub fn evict_expired(&self, now: Instant) -> usize {
        let stateful: Vec<Arc<StatefulFactory>> = self
            .factories
            .read()
            .values()
            .filter_map(|h| match h {
                FactoryHandle::Stateful(f) => Some(f.clone()),
                _ => None,
            })
            .collect();
        stateful.iter().map(|f| f.evict_expired(now)).sum()
    }

    /// Add an interceptor run before every bean's own interceptors
    pub fn add_global_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.services.global_interceptors.write().push(interceptor);
    }

    /// Remove global interceptors called `name`; returns how many were removed
    pub fn remove_global_interceptor(&self, name: &str) -> usize {
        let mut interceptors = self.services.global_interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|i| i.name() != name);
        before - interceptors.len()
    }

    /// Container-wide interceptors
    pub fn global_interceptors(&self) -> GlobalInterceptors {
        self.services.global_interceptors.clone()
    }

    /// Interceptors added at runtime, run after the bean's own
    pub fn dynamic_interceptors(&self) -> &Arc<DynamicInterceptorManager> {
        &self.services.dynamic_interceptors
    }

    /// Extended persistence context of `unit` for the current thread
    pub fn extended_context(&self, unit: &str) -> Result<Arc<dyn ExtendedPersistenceContext>, ContainerError> {
        let manager = self
            .persistence
            .as_ref()
            .ok_or(PersistenceError::NoManager)?;
        Ok(self
            .services
            .extended
            .get_or_create(unit, || manager.create_extended_context(unit))?)
    }

    /// Close the extended contexts of the current thread
    pub fn release_extended_contexts(&self) -> usize {
        self.services.extended.release_current()
    }

    /// Extended contexts of all threads
    pub fn extended_contexts(&self) -> &ExtendedContexts {
        &self.services.extended
    }
}

impl fmt::Debug for EzbContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EzbContainer")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("factories", &self.factory_names())
            .finish()
    }
}
