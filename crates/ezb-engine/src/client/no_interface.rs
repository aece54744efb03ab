//! No-interface view of a bean
//!
//! The enhancer generates a subclass of the bean class whose public methods
//! forward to an invocation handler field. The view instantiates that class
//! with a [`LocalCallInvocationHandler`] in the field, so calling a method
//! of the view runs the full container pipeline on a pooled bean instance.

use std::fmt;
use std::sync::Arc;

use ezb_sdk::descriptor::method_descriptor;
use ezb_sdk::{names, MethodDescriptor, ProxyIdentity, Throwable, TypeDesc, Value};
use parking_lot::Mutex;

use crate::enhancer::names::{
    accessor_names, no_interface_view_name, FIELD_INVOCATION_HANDLER, INVOCATION_HANDLER_CLASS,
};
use crate::runtime::{BeanClassLoader, Host, Interpreter, ObjectRef, Slot};

use super::local::LocalCallInvocationHandler;
use super::proxy::InvocationHandler;

type SharedHandler = Mutex<LocalCallInvocationHandler>;

/// Client side of the view: forwards to the handler stored in the view
struct ClientHost;

impl Host for ClientHost {
    fn construct(&self, _class: &str) -> Result<Slot, Throwable> {
        Ok(Slot::Null)
    }

    fn invoke_static(
        &self,
        _interpreter: &Interpreter<'_>,
        owner: &str,
        name: &str,
        _descriptor: &str,
        _args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        Err(Throwable::runtime(
            names::UNSUPPORTED_OPERATION,
            format!("Static call {}.{} outside the container", owner, name),
        ))
    }

    fn invoke_handler(
        &self,
        receiver: &ObjectRef,
        method: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<Value, Throwable> {
        let handler = receiver
            .field(FIELD_INVOCATION_HANDLER)
            .downcast::<SharedHandler>()
            .ok_or_else(|| Throwable::illegal_state("No-interface view has no invocation handler"))?;
        let mut handler = handler.lock();
        handler.invoke(method, args)
    }
}

/// An instance of the generated view class
pub struct NoInterfaceView {
    loader: Arc<BeanClassLoader>,
    view: ObjectRef,
    handler: Arc<SharedHandler>,
}

impl NoInterfaceView {
    /// Instantiate the view of `bean_class` defined in `loader`
    pub fn new(
        loader: Arc<BeanClassLoader>,
        bean_class: &str,
        handler: LocalCallInvocationHandler,
    ) -> Result<Self, Throwable> {
        let handler = Arc::new(Mutex::new(handler));
        let host = ClientHost;
        let interpreter = Interpreter::new(&loader, &host);
        let view = interpreter.instantiate(&no_interface_view_name(bean_class), None)?;
        let (_, setter) = accessor_names(FIELD_INVOCATION_HANDLER);
        let descriptor = method_descriptor(&[TypeDesc::object(INVOCATION_HANDLER_CLASS)], &TypeDesc::Void);
        interpreter.invoke(&view, &setter, &descriptor, vec![Slot::native(handler.clone())])?;
        Ok(Self {
            loader,
            view,
            handler,
        })
    }

    /// Name of the generated view class
    pub fn class_name(&self) -> &str {
        self.view.class_name()
    }

    /// Identity of the bean behind the view
    pub fn identity(&self) -> ProxyIdentity {
        self.handler.lock().identity()
    }

    /// Call `name` with an explicit descriptor
    pub fn call_exact(&self, name: &str, descriptor: &str, args: Vec<Value>) -> Result<Value, Throwable> {
        let host = ClientHost;
        let interpreter = Interpreter::new(&self.loader, &host);
        interpreter.invoke_values(&self.view, name, descriptor, args)
    }

    /// Call the first public method of the view named `name` taking
    /// `args.len()` arguments
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, Throwable> {
        let descriptor = self
            .loader
            .class(self.view.class_name())
            .and_then(|class| {
                class
                    .file()
                    .methods
                    .iter()
                    .find(|m| m.name == name && m.params.len() == args.len() && m.access.is_public())
                    .map(|m| m.descriptor())
            })
            .ok_or_else(|| {
                Throwable::runtime(
                    names::ILLEGAL_ARGUMENT,
                    format!("View {} has no method {}", self.view.class_name(), name),
                )
            })?;
        self.call_exact(name, &descriptor, args)
    }
}

impl fmt::Debug for NoInterfaceView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoInterfaceView")
            .field("class", &self.view.class_name())
            .finish()
    }
}
