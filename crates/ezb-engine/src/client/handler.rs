//! State shared by the business-interface handlers

use ezb_sdk::{
    CallerIdentity, EjbRequest, EjbResponse, MethodDescriptor, ProxyIdentity, Throwable, Value,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::invocation::{remap, ViewKind};

/// Target, session and lifecycle state of a client handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerCore {
    /// Container id
    pub container_id: String,
    /// Factory (bean) name
    pub factory_name: String,
    /// Interface the proxy implements
    pub interface_name: String,
    /// Session id, set by the server for stateful beans
    pub bean_id: Option<i64>,
    /// Whether the identity includes the session id
    pub use_id: bool,
    /// Set once the server reported the bean removed
    pub removed: bool,
    /// Identity sent with every call
    #[serde(default)]
    pub caller: Option<CallerIdentity>,
    #[serde(skip)]
    hashes: FxHashMap<String, i64>,
}

impl HandlerCore {
    /// Create a handler state; `use_id` is set for stateful beans
    pub fn new(
        container_id: impl Into<String>,
        factory_name: impl Into<String>,
        interface_name: impl Into<String>,
        use_id: bool,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            factory_name: factory_name.into(),
            interface_name: interface_name.into(),
            bean_id: None,
            use_id,
            removed: false,
            caller: None,
            hashes: FxHashMap::default(),
        }
    }

    /// Target an existing session
    pub fn with_bean_id(mut self, bean_id: Option<i64>) -> Self {
        self.bean_id = bean_id;
        self
    }

    /// Call as `caller`
    pub fn with_caller(mut self, caller: Option<CallerIdentity>) -> Self {
        self.caller = caller;
        self
    }

    /// Current identity
    pub fn identity(&self) -> ProxyIdentity {
        ProxyIdentity::new(
            self.container_id.as_str(),
            self.factory_name.as_str(),
            self.interface_name.as_str(),
        )
        .with_bean_id(if self.use_id { self.bean_id } else { None })
    }

    /// Wire hash of `method`, computed once per signature
    pub fn hash_of(&mut self, method: &MethodDescriptor) -> i64 {
        let key = format!("{}{}", method.name, method.descriptor());
        *self.hashes.entry(key).or_insert_with(|| method.hash())
    }

    /// Number of memoized hashes
    pub fn cached_hashes(&self) -> usize {
        self.hashes.len()
    }

    /// Answer `toString`, `hashCode` or `equals` from the identity
    pub(crate) fn object_method(&self, method: &MethodDescriptor, args: &[Value]) -> Value {
        let identity = self.identity();
        match method.name.as_str() {
            "toString" => Value::Str(identity.identity_string()),
            "hashCode" => Value::Int(identity.identity_hash()),
            _ => Value::Bool(
                args.first()
                    .and_then(ProxyIdentity::from_value)
                    .map(|other| identity.is_identical(&other, self.use_id))
                    .unwrap_or(false),
            ),
        }
    }

    /// Run one call through `send`
    ///
    /// `Object` methods are answered locally, except `toString` on a
    /// stateful proxy without a session yet: that one goes to the server so
    /// the session gets created and its id shows in the string. Once the
    /// bean is removed every call fails, that `toString` excepted. Failures
    /// are remapped for `view`.
    pub fn invoke_with<S>(
        &mut self,
        method: &MethodDescriptor,
        args: Vec<Value>,
        view: ViewKind,
        send: S,
    ) -> Result<Value, Throwable>
    where
        S: FnOnce(EjbRequest) -> Result<EjbResponse, Throwable>,
    {
        let lazy_identity = method.is_object_method()
            && method.name == "toString"
            && self.use_id
            && self.bean_id.is_none();
        if self.removed && !lazy_identity {
            let thrown = Throwable::no_such_ejb(format!(
                "Bean {} with id {:?} has been removed",
                self.factory_name, self.bean_id
            ));
            return Err(remap(thrown, &method.exceptions, false, view).throwable);
        }
        if method.is_object_method() && !lazy_identity {
            return Ok(self.object_method(method, &args));
        }

        let hash = self.hash_of(method);
        let request = EjbRequest::new(hash, args)
            .for_factory(
                self.container_id.as_str(),
                self.factory_name.as_str(),
                self.interface_name.as_str(),
            )
            .with_bean_id(self.bean_id)
            .with_caller(self.caller.clone());
        trace!(bean = %self.factory_name, method = %method.name, hash, "Sending call");

        let response = send(request)?;
        if response.bean_id.is_some() {
            self.bean_id = response.bean_id;
        }
        if response.removed {
            self.removed = true;
        }
        match response.rpc_exception {
            Some(exception) => Err(remap(exception.cause, &method.exceptions, exception.application, view).throwable),
            None => Ok(response.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezb_sdk::{names, TypeDesc};

    fn business() -> MethodDescriptor {
        MethodDescriptor::new("org.acme.Cart", "add").with_params(vec![TypeDesc::Int])
    }

    #[test]
    fn test_hash_memoized() {
        let mut core = HandlerCore::new("c1", "Cart", "org.acme.Cart", true);
        let first = core.hash_of(&business());
        let second = core.hash_of(&business());
        assert_eq!(first, second);
        assert_eq!(first, business().hash());
        assert_eq!(core.cached_hashes(), 1);
    }

    #[test]
    fn test_object_methods_answered_locally() {
        let mut core = HandlerCore::new("c1", "Counter", "org.acme.Counter", false);
        let value = core
            .invoke_with(&MethodDescriptor::object_to_string(), vec![], ViewKind::Local, |_| {
                panic!("must not be sent")
            })
            .unwrap();
        assert_eq!(value, Value::Str("Counter_org.acme.Counter/c1".into()));
    }

    #[test]
    fn test_lazy_to_string_goes_to_server() {
        let mut core = HandlerCore::new("c1", "Cart", "org.acme.Cart", true);
        let value = core
            .invoke_with(&MethodDescriptor::object_to_string(), vec![], ViewKind::Local, |request| {
                assert_eq!(request.bean_id, None);
                Ok(EjbResponse::value(Value::Str("Cart_org.acme.Cart/c1@3".into())).with_bean_id(Some(3)))
            })
            .unwrap();
        assert_eq!(value, Value::Str("Cart_org.acme.Cart/c1@3".into()));
        assert_eq!(core.bean_id, Some(3));

        // Later identity calls stay local.
        let again = core
            .invoke_with(&MethodDescriptor::object_to_string(), vec![], ViewKind::Local, |_| {
                panic!("must not be sent")
            })
            .unwrap();
        assert_eq!(again, value);
    }

    #[test]
    fn test_removed_rejects_business_calls() {
        let mut core = HandlerCore::new("c1", "Cart", "org.acme.Cart", true).with_bean_id(Some(1));
        let err = core
            .invoke_with(&business(), vec![Value::Int(1)], ViewKind::Local, |_| {
                Ok(EjbResponse::exception(Throwable::no_such_ejb("gone"), false).removed())
            })
            .unwrap_err();
        assert!(err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));
        assert!(core.removed);

        let err = core
            .invoke_with(&business(), vec![Value::Int(1)], ViewKind::Local, |_| {
                panic!("must not be sent")
            })
            .unwrap_err();
        assert!(err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));

        let err = core
            .invoke_with(&MethodDescriptor::object_hash_code(), vec![], ViewKind::Local, |_| {
                panic!("must not be sent")
            })
            .unwrap_err();
        assert!(err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));
    }

    #[test]
    fn test_serde_skips_hash_cache() {
        let mut core = HandlerCore::new("c1", "Cart", "org.acme.Cart", true).with_bean_id(Some(9));
        core.hash_of(&business());
        let json = serde_json::to_string(&core).unwrap();
        let back: HandlerCore = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bean_id, Some(9));
        assert_eq!(back.cached_hashes(), 0);
    }
}
