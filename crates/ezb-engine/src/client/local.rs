//! In-process invocation handler

use std::fmt;
use std::sync::Arc;

use ezb_sdk::{MethodDescriptor, ProxyIdentity, Throwable, Value};
use serde::{Deserialize, Serialize};

use crate::container::EmbeddedManager;
use crate::factory::Factory;
use crate::invocation::ViewKind;

use super::handler::HandlerCore;
use super::proxy::InvocationHandler;

/// Calls the factory of an embedded server directly
///
/// The factory is resolved through the server registry on first use, so a
/// handler that was serialized and read back finds its server again while
/// that server is alive.
#[derive(Serialize, Deserialize)]
pub struct LocalCallInvocationHandler {
    core: HandlerCore,
    embedded_id: u32,
    #[serde(skip)]
    factory: Option<Arc<dyn Factory>>,
}

impl LocalCallInvocationHandler {
    /// Create a handler for server `embedded_id`
    pub fn new(embedded_id: u32, core: HandlerCore) -> Self {
        Self {
            core,
            embedded_id,
            factory: None,
        }
    }

    /// Skip the registry lookup
    pub(crate) fn with_factory(mut self, factory: Arc<dyn Factory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Id of the target server
    pub fn embedded_id(&self) -> u32 {
        self.embedded_id
    }

    /// Target and session state
    pub fn core(&self) -> &HandlerCore {
        &self.core
    }

    /// Target and session state, mutably
    pub fn core_mut(&mut self) -> &mut HandlerCore {
        &mut self.core
    }

    fn resolve(embedded_id: u32, container_id: &str, factory_name: &str) -> Result<Arc<dyn Factory>, Throwable> {
        let embedded = EmbeddedManager::get_embedded(embedded_id).ok_or_else(|| {
            Throwable::illegal_state(format!("No embedded server with id {}", embedded_id))
        })?;
        let container = embedded.container(container_id).ok_or_else(|| {
            Throwable::illegal_state(format!(
                "No container {} in embedded server {}",
                container_id, embedded_id
            ))
        })?;
        container.factory(factory_name).ok_or_else(|| {
            Throwable::illegal_state(format!(
                "No bean {} in container {}",
                factory_name, container_id
            ))
        })
    }
}

impl InvocationHandler for LocalCallInvocationHandler {
    fn invoke(&mut self, method: &MethodDescriptor, args: Vec<Value>) -> Result<Value, Throwable> {
        let embedded_id = self.embedded_id;
        let cached = &mut self.factory;
        self.core.invoke_with(method, args, ViewKind::Local, |request| {
            let factory = match cached.clone() {
                Some(factory) => factory,
                None => {
                    let factory = Self::resolve(embedded_id, &request.container_id, &request.factory_name)?;
                    *cached = Some(factory.clone());
                    factory
                }
            };
            Ok(factory.local_call(&request))
        })
    }

    fn identity(&self) -> ProxyIdentity {
        self.core.identity()
    }
}

impl Clone for LocalCallInvocationHandler {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            embedded_id: self.embedded_id,
            factory: self.factory.clone(),
        }
    }
}

impl fmt::Debug for LocalCallInvocationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCallInvocationHandler")
            .field("embedded_id", &self.embedded_id)
            .field("core", &self.core)
            .field("resolved", &self.factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezb_sdk::{names, TypeDesc};

    #[test]
    fn test_missing_server_is_illegal_state() {
        let core = HandlerCore::new("c1", "Counter", "org.acme.Counter", false);
        let mut handler = LocalCallInvocationHandler::new(u32::MAX, core);
        let method = MethodDescriptor::new("org.acme.Counter", "next").returns(TypeDesc::Int);
        let err = handler.invoke(&method, vec![]).unwrap_err();
        assert!(err.is_instance_of(names::ILLEGAL_STATE));
    }

    #[test]
    fn test_serialized_handler_forgets_factory() {
        let core = HandlerCore::new("c1", "Counter", "org.acme.Counter", false);
        let handler = LocalCallInvocationHandler::new(4, core);
        let json = serde_json::to_string(&handler).unwrap();
        let back: LocalCallInvocationHandler = serde_json::from_str(&json).unwrap();
        assert_eq!(back.embedded_id(), 4);
        assert!(back.factory.is_none());
        assert_eq!(back.identity(), handler.identity());
    }
}
