//! Containers and embedded servers
//!
//! An [`Embedded`] server owns components (statistics) and containers. An
//! [`EzbContainer`] takes bean deployments, enhances and loads their
//! classes, builds one factory per bean and binds the client views in the
//! naming service. Servers are found by id through the [`EmbeddedManager`].

pub mod components;
pub mod ejb_container;
pub mod embedded;
pub mod naming;
pub mod persistence;
pub mod registry;
pub mod rpc;

use std::fmt;

use thiserror::Error;

use crate::classfile::ClassFileError;
use crate::config::ConfigError;
use crate::enhancer::EnhanceError;
use crate::factory::FactoryError;
use crate::runtime::LoadError;

pub use components::{Component, ComponentError, ComponentManager};
pub use ejb_container::EzbContainer;
pub use embedded::{Embedded, EmbeddedBuilder};
pub use naming::{BeanReference, InMemoryNaming, Naming, NamingError, ReferenceKind};
pub use persistence::{
    CallScope, ExtendedContexts, ExtendedPersistenceContext, PersistenceError, PersistenceUnitManager,
};
pub use registry::EmbeddedManager;
pub use rpc::RpcDispatcher;

/// Lifecycle state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Accepting deployments
    Created,
    /// Classes enhanced and factories built
    Resolved,
    /// Serving calls
    Started,
    /// Stopped; can be started again
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContainerState::Created => "created",
            ContainerState::Resolved => "resolved",
            ContainerState::Started => "started",
            ContainerState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Container and server failures
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Operation not allowed in the current state
    #[error("Cannot {operation} container {container} in state {state}")]
    InvalidState {
        /// Container id
        container: String,
        /// Current state
        state: ContainerState,
        /// Attempted operation
        operation: &'static str,
    },

    /// Bean class could not be decoded
    #[error("Cannot decode class of bean {bean}: {source}")]
    Decode {
        /// Bean name
        bean: String,
        /// Decoding failure
        source: ClassFileError,
    },

    /// Bean class could not be enhanced
    #[error("Cannot enhance bean {bean}: {source}")]
    Enhance {
        /// Bean name
        bean: String,
        /// Enhancement failure
        source: EnhanceError,
    },

    /// Enhanced class could not be loaded
    #[error("Cannot load classes of bean {bean}: {source}")]
    Load {
        /// Bean name
        bean: String,
        /// Loading failure
        source: LoadError,
    },

    /// A factory failed
    #[error("Factory of bean {bean} failed: {source}")]
    Factory {
        /// Bean name
        bean: String,
        /// Factory failure
        source: FactoryError,
    },

    /// Two deployments with the same bean name
    #[error("Bean {0} is already deployed")]
    DuplicateBean(String),

    /// No such bean
    #[error("Unknown bean {0}")]
    UnknownBean(String),

    /// Two containers with the same id
    #[error("Container {0} already exists")]
    DuplicateContainer(String),

    /// No such container
    #[error("Unknown container {0}")]
    UnknownContainer(String),

    /// A live server is registered under the id
    #[error("Embedded server {0} is already registered")]
    DuplicateServer(u32),

    /// The view cannot be built
    #[error("No view: {0}")]
    NoView(String),

    /// Naming failure
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// Component failure
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persistence failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
