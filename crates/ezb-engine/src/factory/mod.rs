//! Bean factories
//!
//! A factory serves one bean of one container. It owns the bean's method
//! table and instances, and runs every incoming call through the invocation
//! pipeline:
//!
//! 1. look up the method by its wire hash
//! 2. get an instance (pool, session map or singleton)
//! 3. check permissions
//! 4. demarcate the transaction
//! 5. run the interceptor chain and the bean method
//! 6. classify the outcome and build the response
//!
//! Four variants exist, one per session/message bean kind.

mod pipeline;
pub mod message_driven;
pub mod pool;
pub mod singleton;
pub mod stateful;
pub mod stateless;
pub mod table;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::{Arc, Weak};

use ezb_sdk::{EjbRequest, EjbResponse, ObjectValue, Throwable, Value};
use thiserror::Error;

use crate::config::ContainerConfig;
use crate::container::persistence::ExtendedContexts;
use crate::enhancer::names::TIMER_CLASS;
use crate::invocation::{
    DynamicInterceptorManager, GlobalInterceptors, Interceptor, PermissionManager,
    TransactionManager,
};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::BeanBody;
use crate::statistics::StatisticComponent;

pub use pipeline::BeanContext;
pub use message_driven::MessageDrivenFactory;
pub use pool::{InstancePool, PoolError, PoolSnapshot};
pub use singleton::SingletonFactory;
pub use stateful::StatefulFactory;
pub use stateless::StatelessFactory;
pub use table::{MethodEntry, MethodTable};

/// Factory failures
#[derive(Debug, Error)]
pub enum FactoryError {
    /// Operation needs a started factory
    #[error("Factory {0} is not started")]
    NotStarted(String),

    /// Bean class missing from the container's loader
    #[error("Class {class} of bean {bean} is not defined")]
    ClassNotFound {
        /// Bean name
        bean: String,
        /// Class name
        class: String,
    },

    /// Creating an instance failed
    #[error("Cannot create an instance of {bean}: {cause}")]
    Instantiation {
        /// Bean name
        bean: String,
        /// What the bean raised
        cause: Throwable,
    },

    /// Getting a pooled instance failed
    #[error("Pool of {bean}: {source}")]
    Pool {
        /// Bean name
        bean: String,
        /// Pool failure
        source: PoolError,
    },

    /// Operation not available for this kind of bean
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Timeout callback raised an exception
    #[error("Timeout callback failed: {0}")]
    Timeout(Throwable),
}

/// Timer handed to a timeout callback
#[derive(Debug, Clone, PartialEq)]
pub struct TimerHandle {
    /// Timer id
    pub id: u64,
    /// Info attached when the timer was created
    pub info: Value,
}

impl TimerHandle {
    /// Create a timer handle
    pub fn new(id: u64, info: Value) -> Self {
        Self { id, info }
    }

    /// Value passed to the bean's timeout method
    pub fn to_value(&self) -> Value {
        Value::Object(
            ObjectValue::new(TIMER_CLASS)
                .with_field("id", self.id as i64)
                .with_field("info", self.info.clone()),
        )
    }
}

/// Dispatcher serving one bean
pub trait Factory: Send + Sync {
    /// Bean name
    fn name(&self) -> &str;

    /// Bean class name
    fn class_name(&self) -> &str;

    /// Id of the owning container
    fn container_id(&self) -> &str;

    /// Bean kind
    fn kind(&self) -> BeanKind;

    /// Static description of the bean
    fn metadata(&self) -> &BeanClassMetadata;

    /// Check the bean class and prepare the method table
    fn init(&self) -> Result<(), FactoryError>;

    /// Start serving calls
    fn start(&self) -> Result<(), FactoryError>;

    /// Stop serving calls and destroy every instance
    fn stop(&self);

    /// Whether calls are served
    fn is_started(&self) -> bool;

    /// Serve a call coming through a remote view
    fn rpc_invoke(&self, request: &EjbRequest) -> EjbResponse;

    /// Serve a call coming through a local view
    fn local_call(&self, request: &EjbRequest) -> EjbResponse;

    /// Run the bean's timeout callback
    fn notify_timeout(&self, timer: &TimerHandle) -> Result<(), FactoryError>;

    /// Instance accounting
    fn pool(&self) -> PoolSnapshot;
}

impl fmt::Debug for dyn Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.name())
            .field("container", &self.container_id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Reference to its factory injected into every bean instance
#[derive(Clone)]
pub struct FactoryReference {
    name: String,
    container_id: String,
    factory: Weak<dyn Factory>,
}

impl FactoryReference {
    pub(crate) fn new(name: &str, container_id: &str, factory: Weak<dyn Factory>) -> Self {
        Self {
            name: name.to_string(),
            container_id: container_id.to_string(),
            factory,
        }
    }

    /// Bean name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container id
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// The factory, while it exists
    pub fn upgrade(&self) -> Option<Arc<dyn Factory>> {
        self.factory.upgrade()
    }
}

impl fmt::Debug for FactoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryReference")
            .field("name", &self.name)
            .field("container", &self.container_id)
            .finish()
    }
}

/// Produces the body of each new instance
pub type BodyFactory = Arc<dyn Fn() -> Arc<dyn BeanBody> + Send + Sync>;

/// Everything needed to deploy one bean
#[derive(Clone)]
pub struct BeanDeployment {
    /// Static description
    pub metadata: BeanClassMetadata,
    /// Encoded, not yet enhanced, bean class
    pub class_bytes: Vec<u8>,
    /// Business logic of new instances
    pub body: BodyFactory,
    /// Bean-level interceptors, outermost first
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

impl BeanDeployment {
    /// Deploy `class_bytes` with a body shared by all instances
    pub fn new<B>(metadata: BeanClassMetadata, class_bytes: Vec<u8>, body: B) -> Self
    where
        B: BeanBody + 'static,
    {
        let body: Arc<dyn BeanBody> = Arc::new(body);
        Self {
            metadata,
            class_bytes,
            body: Arc::new(move || body.clone()),
            interceptors: Vec::new(),
        }
    }

    /// Deploy `class_bytes` with one fresh body per instance
    pub fn with_body_factory<F>(metadata: BeanClassMetadata, class_bytes: Vec<u8>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn BeanBody> + Send + Sync + 'static,
    {
        Self {
            metadata,
            class_bytes,
            body: Arc::new(factory),
            interceptors: Vec::new(),
        }
    }

    /// Add a bean-level interceptor
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

impl fmt::Debug for BeanDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDeployment")
            .field("bean", &self.metadata.ejb_name)
            .field("class", &self.metadata.class_name)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Container services shared by the factories of a container
#[derive(Clone)]
pub struct FactoryServices {
    /// Owning server id
    pub embedded_id: u32,
    /// Owning server name
    pub server_name: String,
    /// Owning container id
    pub container_id: String,
    /// Container settings
    pub config: ContainerConfig,
    /// Transaction demarcation
    pub transaction_manager: Arc<dyn TransactionManager>,
    /// Permission checks
    pub permission_manager: Arc<dyn PermissionManager>,
    /// Container-wide interceptors
    pub global_interceptors: GlobalInterceptors,
    /// Interceptors added at runtime
    pub dynamic_interceptors: Arc<DynamicInterceptorManager>,
    /// Call statistics, when enabled
    pub statistics: Option<Arc<StatisticComponent>>,
    /// Extended persistence contexts of the container
    pub extended: Arc<ExtendedContexts>,
}

impl fmt::Debug for FactoryServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryServices")
            .field("server", &self.server_name)
            .field("container", &self.container_id)
            .field("statistics", &self.statistics.is_some())
            .finish()
    }
}
