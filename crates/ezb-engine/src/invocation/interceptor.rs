//! Interceptor chains
//!
//! A business call runs through the container's global interceptors, then
//! the bean's own interceptors, then the dynamically registered ones, and
//! finally reaches the bean method. Each interceptor decides whether and how
//! to [`proceed`](InvocationContext::proceed).

use std::fmt;
use std::sync::Arc;

use ezb_sdk::{names, CallerIdentity, Throwable, Value};
use parking_lot::RwLock;

use super::context::{CallState, ContextData, OperationState};

/// An around-invoke interceptor
pub trait Interceptor: Send + Sync {
    /// Name used for registration and removal
    fn name(&self) -> &str;

    /// Intercept a call; call `ctx.proceed()` to continue down the chain
    fn around_invoke(&self, ctx: &mut InvocationContext<'_>) -> Result<Value, Throwable>;
}

/// Final step of a chain: the bean method itself
pub type InvocationTarget<'a> =
    dyn FnMut(Vec<Value>, &mut CallState) -> Result<Value, Throwable> + 'a;

/// Context handed to interceptors
pub struct InvocationContext<'a> {
    bean_name: &'a str,
    method: &'a str,
    descriptor: &'a str,
    parameters: Vec<Value>,
    call: &'a mut CallState,
    chain: &'a [Arc<dyn Interceptor>],
    position: usize,
    target: &'a mut InvocationTarget<'a>,
}

impl<'a> InvocationContext<'a> {
    /// Create a context positioned before the first interceptor
    pub fn new(
        bean_name: &'a str,
        method: &'a str,
        descriptor: &'a str,
        parameters: Vec<Value>,
        call: &'a mut CallState,
        chain: &'a [Arc<dyn Interceptor>],
        target: &'a mut InvocationTarget<'a>,
    ) -> Self {
        Self {
            bean_name,
            method,
            descriptor,
            parameters,
            call,
            chain,
            position: 0,
            target,
        }
    }

    /// Run the next interceptor, or the bean method at the end of the chain
    pub fn proceed(&mut self) -> Result<Value, Throwable> {
        let chain = self.chain;
        match chain.get(self.position) {
            Some(interceptor) => {
                self.position += 1;
                let result = interceptor.around_invoke(self);
                self.position -= 1;
                result
            }
            None => (self.target)(self.parameters.clone(), self.call),
        }
    }

    /// Bean (ejb) name
    pub fn bean_name(&self) -> &str {
        self.bean_name
    }

    /// Called method name
    pub fn method_name(&self) -> &str {
        self.method
    }

    /// Called method descriptor
    pub fn descriptor(&self) -> &str {
        self.descriptor
    }

    /// Current parameters
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Replace the parameters; the count must not change
    pub fn set_parameters(&mut self, parameters: Vec<Value>) -> Result<(), Throwable> {
        if parameters.len() != self.parameters.len() {
            return Err(Throwable::of(
                names::ILLEGAL_ARGUMENT,
                format!(
                    "{} expects {} parameters, got {}",
                    self.method,
                    self.parameters.len(),
                    parameters.len()
                ),
            ));
        }
        self.parameters = parameters;
        Ok(())
    }

    /// Context data shared along the chain
    pub fn context_data(&self) -> &ContextData {
        &self.call.context_data
    }

    /// Mutable context data
    pub fn context_data_mut(&mut self) -> &mut ContextData {
        &mut self.call.context_data
    }

    /// Authenticated caller
    pub fn caller(&self) -> Option<&CallerIdentity> {
        self.call.caller.as_ref()
    }

    /// Current operation
    pub fn operation(&self) -> OperationState {
        self.call.operation
    }

    /// Call state
    pub fn call_state(&self) -> &CallState {
        self.call
    }

    /// Number of interceptors already entered
    pub fn position(&self) -> usize {
        self.position
    }
}

impl fmt::Debug for InvocationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("bean", &self.bean_name)
            .field("method", &self.method)
            .field("descriptor", &self.descriptor)
            .field("position", &self.position)
            .field("chain", &self.chain.len())
            .finish()
    }
}

/// Interceptors of one bean instance
///
/// Created by the patched constructor of every enhanced bean.
#[derive(Clone, Default)]
pub struct InterceptorManager {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorManager {
    /// Create a manager holding `interceptors`
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Bean interceptors in order
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }
}

impl fmt::Debug for InterceptorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("InterceptorManager").field("interceptors", &names).finish()
    }
}

/// Interceptors added and removed at runtime
#[derive(Default)]
pub struct DynamicInterceptorManager {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl DynamicInterceptorManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Remove every interceptor called `name`; returns how many were removed
    pub fn remove(&self, name: &str) -> usize {
        let mut interceptors = self.interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|i| i.name() != name);
        before - interceptors.len()
    }

    /// Current interceptors
    pub fn snapshot(&self) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors.read().clone()
    }

    /// Number of interceptors
    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    /// No interceptors?
    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }
}

impl fmt::Debug for DynamicInterceptorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicInterceptorManager")
            .field("interceptors", &self.len())
            .finish()
    }
}

/// Shared list of container-wide interceptors
pub type GlobalInterceptors = Arc<RwLock<Vec<Arc<dyn Interceptor>>>>;

/// Builds the interceptor chain of a bean
pub struct InvocationContextFactory {
    bean_name: String,
    global: GlobalInterceptors,
    dynamic: Arc<DynamicInterceptorManager>,
}

impl InvocationContextFactory {
    /// Create a factory for `bean_name`
    pub fn new(
        bean_name: impl Into<String>,
        global: GlobalInterceptors,
        dynamic: Arc<DynamicInterceptorManager>,
    ) -> Self {
        Self {
            bean_name: bean_name.into(),
            global,
            dynamic,
        }
    }

    /// Bean name
    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }

    /// Global, bean and dynamic interceptors, in that order
    pub fn chain(&self, bean: Option<&InterceptorManager>) -> Vec<Arc<dyn Interceptor>> {
        let mut chain = self.global.read().clone();
        if let Some(bean) = bean {
            chain.extend(bean.interceptors().iter().cloned());
        }
        chain.extend(self.dynamic.snapshot());
        chain
    }
}

impl fmt::Debug for InvocationContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContextFactory")
            .field("bean", &self.bean_name)
            .finish()
    }
}
