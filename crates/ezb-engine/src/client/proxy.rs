//! Interface proxies

use ezb_sdk::{names, InterfaceDescriptor, MethodDescriptor, ProxyIdentity, Throwable, Value};

/// Receives every call made on a [`Proxy`]
pub trait InvocationHandler {
    /// Handle a call of `method` with `args`
    fn invoke(&mut self, method: &MethodDescriptor, args: Vec<Value>) -> Result<Value, Throwable>;

    /// Identity of the bean behind the handler
    fn identity(&self) -> ProxyIdentity;
}

/// A client-side view of one bean interface
#[derive(Debug, Clone)]
pub struct Proxy<H> {
    interface: InterfaceDescriptor,
    handler: H,
}

impl<H: InvocationHandler> Proxy<H> {
    /// Create a proxy of `interface` driven by `handler`
    pub fn new(interface: InterfaceDescriptor, handler: H) -> Self {
        Self { interface, handler }
    }

    /// Implemented interface
    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Call the first interface method named `name` taking `args.len()`
    /// arguments
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Throwable> {
        let method = self
            .interface
            .find(name, args.len())
            .cloned()
            .ok_or_else(|| {
                Throwable::runtime(
                    names::ILLEGAL_ARGUMENT,
                    format!(
                        "Interface {} has no method {} taking {} arguments",
                        self.interface.name,
                        name,
                        args.len()
                    ),
                )
            })?;
        self.handler.invoke(&method, args)
    }

    /// Call `method` as given
    pub fn call_method(&mut self, method: &MethodDescriptor, args: Vec<Value>) -> Result<Value, Throwable> {
        self.handler.invoke(method, args)
    }

    /// `toString()` of the proxy
    pub fn object_to_string(&mut self) -> Result<String, Throwable> {
        let value = self
            .handler
            .invoke(&MethodDescriptor::object_to_string(), Vec::new())?;
        Ok(value.as_str().map(str::to_string).unwrap_or_default())
    }

    /// `hashCode()` of the proxy
    pub fn object_hash_code(&mut self) -> Result<i32, Throwable> {
        let value = self
            .handler
            .invoke(&MethodDescriptor::object_hash_code(), Vec::new())?;
        Ok(value.as_i32().unwrap_or_default())
    }

    /// `equals(other)`, `other` being a proxy handle value
    pub fn object_equals(&mut self, other: &Value) -> Result<bool, Throwable> {
        let value = self
            .handler
            .invoke(&MethodDescriptor::object_equals(), vec![other.clone()])?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Handle value designating the bean
    pub fn to_value(&self) -> Value {
        self.handler.identity().to_value()
    }

    /// The handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The handler, mutably
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Split into interface and handler
    pub fn into_parts(self) -> (InterfaceDescriptor, H) {
        (self.interface, self.handler)
    }
}
