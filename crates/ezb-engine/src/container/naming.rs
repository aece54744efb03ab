//! Naming
//!
//! Containers bind one [`BeanReference`] per client view when they start.
//! Names follow the layout used by the in-memory naming strategy:
//!
//! | view           | name                            |
//! |----------------|---------------------------------|
//! | business local | `<ejb>@<interface>@Local`       |
//! | business remote| `<ejb>@<interface>@Remote`      |
//! | remote home    | `<ejb>@Home`                    |
//! | local home     | `<ejb>@LocalHome`               |
//! | no-interface   | `<ejb>@NoInterface`             |

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ezb_sdk::{names, CallerIdentity, InterfaceDescriptor, Throwable};
use thiserror::Error;
use tracing::debug;

use crate::client::{
    ClientRpc, ClientRpcInvocationHandler, HandlerCore, HomeInvocationHandler, HomeTransport,
    LocalCallInvocationHandler, Proxy,
};
use crate::invocation::ViewKind;

/// Naming failures
#[derive(Debug, Error)]
pub enum NamingError {
    /// Name taken
    #[error("Name {0} is already bound")]
    AlreadyBound(String),

    /// Nothing bound under the name
    #[error("Name {0} is not bound")]
    NotFound(String),
}

/// Name of a business view
pub fn business_name(ejb_name: &str, interface: &str, view: ViewKind) -> String {
    format!("{}@{}@{}", ejb_name, interface, view.label())
}

/// Name of a remote home
pub fn home_name(ejb_name: &str) -> String {
    format!("{}@Home", ejb_name)
}

/// Name of a local home
pub fn local_home_name(ejb_name: &str) -> String {
    format!("{}@LocalHome", ejb_name)
}

/// Name of a no-interface view
pub fn no_interface_name(ejb_name: &str) -> String {
    format!("{}@NoInterface", ejb_name)
}

/// What a reference designates
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceKind {
    /// Local business interface
    Local,
    /// Remote business interface
    Remote,
    /// Remote home creating components of `component`
    Home {
        /// Component interface
        component: InterfaceDescriptor,
    },
    /// Local home creating components of `component`
    LocalHome {
        /// Component interface
        component: InterfaceDescriptor,
    },
    /// No-interface view of `bean_class`
    NoInterface {
        /// Bean class name
        bean_class: String,
    },
}

/// A bound bean view, turned into a proxy by the client
#[derive(Debug, Clone, PartialEq)]
pub struct BeanReference {
    /// Server id
    pub embedded_id: u32,
    /// Container id
    pub container_id: String,
    /// Bean name
    pub factory_name: String,
    /// Interface of the view (the home interface for homes)
    pub interface: InterfaceDescriptor,
    /// View kind
    pub kind: ReferenceKind,
    /// Whether the bean is stateful
    pub stateful: bool,
}

impl BeanReference {
    fn core(&self, interface: &str, caller: Option<CallerIdentity>) -> HandlerCore {
        HandlerCore::new(
            self.container_id.as_str(),
            self.factory_name.as_str(),
            interface,
            self.stateful,
        )
        .with_caller(caller)
    }

    fn wrong_kind(&self, wanted: &str) -> Throwable {
        Throwable::runtime(
            names::ILLEGAL_ARGUMENT,
            format!(
                "Reference to {} ({:?}) is not a {} view",
                self.factory_name, self.kind, wanted
            ),
        )
    }

    /// In-process proxy of a business view
    pub fn local_proxy(&self, caller: Option<CallerIdentity>) -> Result<Proxy<LocalCallInvocationHandler>, Throwable> {
        match self.kind {
            ReferenceKind::Local | ReferenceKind::Remote => {
                let core = self.core(&self.interface.name, caller);
                Ok(Proxy::new(
                    self.interface.clone(),
                    LocalCallInvocationHandler::new(self.embedded_id, core),
                ))
            }
            _ => Err(self.wrong_kind("business")),
        }
    }

    /// Proxy of a remote business view sending over `rpc`
    pub fn remote_proxy(
        &self,
        rpc: Arc<dyn ClientRpc>,
        caller: Option<CallerIdentity>,
    ) -> Result<Proxy<ClientRpcInvocationHandler>, Throwable> {
        match self.kind {
            ReferenceKind::Remote => {
                let core = self.core(&self.interface.name, caller);
                Ok(Proxy::new(
                    self.interface.clone(),
                    ClientRpcInvocationHandler::new(core, rpc),
                ))
            }
            _ => Err(self.wrong_kind("remote")),
        }
    }

    /// Proxy of a home; remote homes need `rpc`
    pub fn home_proxy(
        &self,
        rpc: Option<Arc<dyn ClientRpc>>,
        caller: Option<CallerIdentity>,
    ) -> Result<Proxy<HomeInvocationHandler>, Throwable> {
        let (component, transport) = match &self.kind {
            ReferenceKind::Home { component } => (component, HomeTransport::Remote { rpc }),
            ReferenceKind::LocalHome { component } => (
                component,
                HomeTransport::Local {
                    embedded_id: self.embedded_id,
                },
            ),
            _ => return Err(self.wrong_kind("home")),
        };
        let mut core = self.core(&self.interface.name, caller);
        core.use_id = false;
        Ok(Proxy::new(
            self.interface.clone(),
            HomeInvocationHandler::new(core, component.clone(), !self.stateful, transport),
        ))
    }
}

/// Name service
pub trait Naming: Send + Sync {
    /// Bind `reference` under `name`
    fn bind(&self, name: &str, reference: BeanReference) -> Result<(), NamingError>;

    /// Remove the binding of `name`
    fn unbind(&self, name: &str) -> Result<BeanReference, NamingError>;

    /// Reference bound under `name`
    fn lookup(&self, name: &str) -> Result<BeanReference, NamingError>;

    /// Bound names, sorted
    fn names(&self) -> Vec<String>;
}

/// Process-local naming
#[derive(Debug, Default)]
pub struct InMemoryNaming {
    bindings: DashMap<String, BeanReference>,
}

impl InMemoryNaming {
    /// Create an empty name space
    pub fn new() -> Self {
        Self::default()
    }
}

impl Naming for InMemoryNaming {
    fn bind(&self, name: &str, reference: BeanReference) -> Result<(), NamingError> {
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(_) => Err(NamingError::AlreadyBound(name.to_string())),
            Entry::Vacant(slot) => {
                debug!(name, bean = %reference.factory_name, "Bound");
                slot.insert(reference);
                Ok(())
            }
        }
    }

    fn unbind(&self, name: &str) -> Result<BeanReference, NamingError> {
        self.bindings
            .remove(name)
            .map(|(_, reference)| reference)
            .ok_or_else(|| NamingError::NotFound(name.to_string()))
    }

    fn lookup(&self, name: &str) -> Result<BeanReference, NamingError> {
        self.bindings
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| NamingError::NotFound(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
