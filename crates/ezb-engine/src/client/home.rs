//! EJB 2.1 home handler
//!
//! A home creates component proxies. `create*` methods return the handle of
//! a new component; `remove(Handle)` removes the bean a handle designates;
//! `getEJBMetaData` describes the bean.

use std::fmt;
use std::sync::Arc;

use ezb_sdk::identity::HANDLE_CLASS;
use ezb_sdk::{
    names, EjbMetaData, InterfaceDescriptor, MethodDescriptor, ProxyIdentity, Throwable, TypeDesc,
    Value,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::handler::HandlerCore;
use super::local::LocalCallInvocationHandler;
use super::proxy::{InvocationHandler, Proxy};
use super::remote::{ClientRpc, ClientRpcInvocationHandler};

/// Handler of a component proxy created by a home
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ComponentHandler {
    /// Local component
    Local(LocalCallInvocationHandler),
    /// Remote component
    Remote(ClientRpcInvocationHandler),
}

impl ComponentHandler {
    /// Target and session state
    pub fn core(&self) -> &HandlerCore {
        match self {
            ComponentHandler::Local(handler) => handler.core(),
            ComponentHandler::Remote(handler) => handler.core(),
        }
    }
}

impl InvocationHandler for ComponentHandler {
    fn invoke(&mut self, method: &MethodDescriptor, args: Vec<Value>) -> Result<Value, Throwable> {
        match self {
            ComponentHandler::Local(handler) => handler.invoke(method, args),
            ComponentHandler::Remote(handler) => handler.invoke(method, args),
        }
    }

    fn identity(&self) -> ProxyIdentity {
        match self {
            ComponentHandler::Local(handler) => handler.identity(),
            ComponentHandler::Remote(handler) => handler.identity(),
        }
    }
}

/// How components created by a home are reached
#[derive(Clone, Serialize, Deserialize)]
pub enum HomeTransport {
    /// In-process server
    Local {
        /// Server id
        embedded_id: u32,
    },
    /// Through a client transport
    Remote {
        /// Transport, bound after deserialization
        #[serde(skip)]
        rpc: Option<Arc<dyn ClientRpc>>,
    },
}

impl fmt::Debug for HomeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomeTransport::Local { embedded_id } => f
                .debug_struct("Local")
                .field("embedded_id", embedded_id)
                .finish(),
            HomeTransport::Remote { rpc } => f
                .debug_struct("Remote")
                .field("bound", &rpc.is_some())
                .finish(),
        }
    }
}

/// Handler of a home proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeInvocationHandler {
    home: HandlerCore,
    component: InterfaceDescriptor,
    stateless: bool,
    transport: HomeTransport,
}

impl HomeInvocationHandler {
    /// Create a home handler
    ///
    /// `home` targets the bean with the home interface name; components are
    /// proxies of `component`.
    pub fn new(
        home: HandlerCore,
        component: InterfaceDescriptor,
        stateless: bool,
        transport: HomeTransport,
    ) -> Self {
        Self {
            home,
            component,
            stateless,
            transport,
        }
    }

    /// Attach a transport to a remote home
    pub fn bind(&mut self, rpc: Arc<dyn ClientRpc>) {
        if let HomeTransport::Remote { rpc: slot } = &mut self.transport {
            *slot = Some(rpc);
        }
    }

    /// Interface of the created components
    pub fn component_interface(&self) -> &InterfaceDescriptor {
        &self.component
    }

    /// `getEJBMetaData` result
    pub fn metadata(&self) -> EjbMetaData {
        EjbMetaData::new(
            self.home.interface_name.as_str(),
            self.component.name.as_str(),
            self.stateless,
        )
    }

    fn component_handler(&self, identity: &ProxyIdentity) -> Result<ComponentHandler, Throwable> {
        let core = HandlerCore::new(
            identity.container_id.as_str(),
            identity.factory_name.as_str(),
            self.component.name.as_str(),
            !self.stateless,
        )
        .with_bean_id(identity.bean_id)
        .with_caller(self.home.caller.clone());
        match &self.transport {
            HomeTransport::Local { embedded_id } => Ok(ComponentHandler::Local(
                LocalCallInvocationHandler::new(*embedded_id, core),
            )),
            HomeTransport::Remote { rpc: Some(rpc) } => Ok(ComponentHandler::Remote(
                ClientRpcInvocationHandler::new(core, rpc.clone()),
            )),
            HomeTransport::Remote { rpc: None } => {
                Err(Throwable::illegal_state("Remote home has no transport"))
            }
        }
    }

    /// Run `create*` and return the handler of the new component
    ///
    /// The component's identity is fetched from the server first, which
    /// creates the session of a stateful bean. A matching `ejbCreate*`
    /// method of the component interface is then called with `args`.
    pub fn create_component(
        &mut self,
        method: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<ComponentHandler, Throwable> {
        let mut component = self.component_handler(&self.home.identity())?;
        component.invoke(&MethodDescriptor::object_to_string(), Vec::new())?;

        let suffix = method.name.strip_prefix("create").unwrap_or_default();
        let init_name = format!("ejbCreate{}", suffix);
        let init = self
            .component
            .methods
            .iter()
            .find(|m| m.name == init_name && m.params == method.params)
            .cloned();
        match init {
            Some(init) => {
                component.invoke(&init, args)?;
            }
            None => debug!(method = %init_name, "No init method on component interface"),
        }
        Ok(component)
    }

    fn remove(&mut self, method: &MethodDescriptor, args: &[Value]) -> Result<Value, Throwable> {
        let by_handle = method.params.first() == Some(&TypeDesc::object(HANDLE_CLASS));
        if !by_handle {
            return Err(Throwable::checked(
                names::REMOVE_EXCEPTION,
                "Session beans have no primary key",
            ));
        }
        let identity = args
            .first()
            .and_then(ProxyIdentity::from_value)
            .ok_or_else(|| Throwable::checked(names::REMOVE_EXCEPTION, "Argument is not a handle"))?;
        let mut component = self.component_handler(&identity)?;
        let remove = MethodDescriptor::new(self.component.name.as_str(), "remove")
            .throws(names::REMOVE_EXCEPTION);
        component.invoke(&remove, Vec::new())?;
        Ok(Value::Null)
    }
}

impl InvocationHandler for HomeInvocationHandler {
    fn invoke(&mut self, method: &MethodDescriptor, args: Vec<Value>) -> Result<Value, Throwable> {
        if method.is_object_method() {
            return Ok(self.home.object_method(method, &args));
        }
        match method.name.as_str() {
            name if name.starts_with("create") => {
                let component = self.create_component(method, args)?;
                Ok(component.identity().to_value())
            }
            "remove" if method.params.len() == 1 => self.remove(method, &args),
            "getEJBMetaData" => Ok(self.metadata().to_value()),
            "getHomeHandle" => Ok(self.home.identity().to_value()),
            other => Err(Throwable::runtime(
                names::UNSUPPORTED_OPERATION,
                format!("Home {} has no method {}", self.home.interface_name, other),
            )),
        }
    }

    fn identity(&self) -> ProxyIdentity {
        self.home.identity()
    }
}

impl Proxy<HomeInvocationHandler> {
    /// Call the `create*` method `name` and return a proxy of the component
    pub fn create(&mut self, name: &str, args: Vec<Value>) -> Result<Proxy<ComponentHandler>, Throwable> {
        let method = self
            .interface()
            .find(name, args.len())
            .cloned()
            .ok_or_else(|| {
                Throwable::runtime(
                    names::ILLEGAL_ARGUMENT,
                    format!("Home {} has no method {}", self.interface().name, name),
                )
            })?;
        let handler = self.handler_mut().create_component(&method, args)?;
        let component = self.handler().component_interface().clone();
        Ok(Proxy::new(component, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> HomeInvocationHandler {
        HomeInvocationHandler::new(
            HandlerCore::new("c1", "Cart", "org.acme.CartHome", false),
            InterfaceDescriptor::new("org.acme.CartRemote"),
            false,
            HomeTransport::Remote { rpc: None },
        )
    }

    #[test]
    fn test_metadata() {
        let mut home = home();
        let method = MethodDescriptor::new("org.acme.CartHome", "getEJBMetaData");
        let value = home.invoke(&method, vec![]).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.field("homeInterface"), Some(&Value::Str("org.acme.CartHome".into())));
        assert!(!home.metadata().stateless);
    }

    #[test]
    fn test_remove_by_primary_key_fails() {
        let mut home = home();
        let method = MethodDescriptor::new("org.acme.CartHome", "remove")
            .with_params(vec![TypeDesc::object(ezb_sdk::descriptor::OBJECT_CLASS)]);
        let err = home.invoke(&method, vec![Value::Long(1)]).unwrap_err();
        assert!(err.is_instance_of(names::REMOVE_EXCEPTION));
    }

    #[test]
    fn test_remove_rejects_non_handles() {
        let mut home = home();
        let method = MethodDescriptor::new("org.acme.CartHome", "remove")
            .with_params(vec![TypeDesc::object(HANDLE_CLASS)]);
        let err = home.invoke(&method, vec![Value::Str("nope".into())]).unwrap_err();
        assert!(err.is_instance_of(names::REMOVE_EXCEPTION));
    }

    #[test]
    fn test_unbound_remote_home_cannot_create() {
        let mut home = home();
        let method = MethodDescriptor::new("org.acme.CartHome", "create");
        let err = home.invoke(&method, vec![]).unwrap_err();
        assert!(err.is_instance_of(names::ILLEGAL_STATE));
    }
}
