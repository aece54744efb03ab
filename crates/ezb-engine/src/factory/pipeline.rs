//! Shared factory machinery
//!
//! Instance creation and destruction, the host serving generated code, and
//! the business call pipeline common to every factory kind.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ezb_sdk::descriptor::method_descriptor;
use ezb_sdk::{names, CallerIdentity, EjbResponse, ProxyIdentity, Throwable, TypeDesc, Value};
use tracing::{debug, warn};

use crate::classfile::ClassFile;
use crate::enhancer::ejb21::{HELPER_GET_HANDLE_DESC, HELPER_IS_IDENTICAL_DESC, HELPER_REMOVE_DESC};
use crate::enhancer::fields::{common_fields, kind_fields};
use crate::enhancer::names::{
    accessor_names, CLEANUP_METHOD, EJB21_HELPER_CLASS, FIELD_CONTEXT, FIELD_DYNAMIC_INTERCEPTOR_MANAGER,
    FIELD_FACTORY, FIELD_INTERCEPTOR_MANAGER, FIELD_INVOCATION_CONTEXT_FACTORY, FIELD_STATEFUL_ID,
    FIELD_STATEFUL_TIMEOUT, INTERCEPTOR_MANAGER_CLASS,
};
use crate::invocation::{
    demarcate, CallState, FailureKind, Interceptor, InterceptorManager, InvocationContext,
    InvocationContextFactory, OperationState, PermissionManager, TransactionManager,
};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::{BeanClassLoader, Host, Instance, Interpreter, ObjectRef, Slot};
use crate::statistics::factory_provider;

use super::table::{MethodEntry, MethodTable};
use super::{BeanDeployment, BodyFactory, FactoryError, FactoryReference, FactoryServices};

/// `EJBContext` of a bean, injected into every instance
pub struct BeanContext {
    ejb_name: String,
    run_as: bool,
    permission_manager: Arc<dyn PermissionManager>,
    transaction_manager: Arc<dyn TransactionManager>,
    factory: FactoryReference,
}

impl BeanContext {
    /// Context injected into `instance`, if it is an enhanced bean
    pub fn of(instance: &Instance) -> Option<Arc<BeanContext>> {
        instance.field(FIELD_CONTEXT).downcast::<BeanContext>()
    }

    /// Bean name
    pub fn ejb_name(&self) -> &str {
        &self.ejb_name
    }

    /// Whether `caller` holds `role`; a run-as bean also holds its run-as role
    pub fn is_caller_in_role(&self, caller: Option<&CallerIdentity>, role: &str) -> bool {
        self.permission_manager
            .is_caller_in_role(caller, &self.ejb_name, role, self.run_as)
    }

    /// Mark the current transaction rollback-only
    pub fn set_rollback_only(&self) -> Result<(), Throwable> {
        self.transaction_manager
            .set_rollback_only()
            .map_err(|e| Throwable::illegal_state(e.to_string()))
    }

    /// Factory serving the bean
    pub fn factory(&self) -> &FactoryReference {
        &self.factory
    }
}

impl std::fmt::Debug for BeanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanContext")
            .field("ejb_name", &self.ejb_name)
            .field("run_as", &self.run_as)
            .finish()
    }
}

/// A failed call and how the client should see it
#[derive(Debug)]
pub(crate) struct Failure {
    pub(crate) throwable: Throwable,
    pub(crate) application: bool,
}

impl Failure {
    pub(crate) fn system(throwable: Throwable) -> Self {
        Self {
            throwable,
            application: false,
        }
    }
}

/// State shared by the four factory kinds
pub(crate) struct FactoryCore {
    pub(crate) metadata: Arc<BeanClassMetadata>,
    pub(crate) loader: Arc<BeanClassLoader>,
    pub(crate) table: MethodTable,
    pub(crate) services: FactoryServices,
    pub(crate) reference: FactoryReference,
    body: BodyFactory,
    interceptors: Vec<Arc<dyn Interceptor>>,
    icf: Arc<InvocationContextFactory>,
    context: Arc<BeanContext>,
    provider: String,
    started: AtomicBool,
}

impl FactoryCore {
    pub(crate) fn new(
        deployment: BeanDeployment,
        bean_class: &ClassFile,
        loader: Arc<BeanClassLoader>,
        services: FactoryServices,
        reference: FactoryReference,
    ) -> Self {
        let metadata = Arc::new(deployment.metadata);
        let table = MethodTable::build(&metadata, bean_class);
        let icf = Arc::new(InvocationContextFactory::new(
            metadata.ejb_name.clone(),
            services.global_interceptors.clone(),
            services.dynamic_interceptors.clone(),
        ));
        let context = Arc::new(BeanContext {
            ejb_name: metadata.ejb_name.clone(),
            run_as: metadata.run_as.is_some(),
            permission_manager: services.permission_manager.clone(),
            transaction_manager: services.transaction_manager.clone(),
            factory: reference.clone(),
        });
        let provider = factory_provider(&services.server_name, &services.container_id, &metadata.ejb_name);
        Self {
            metadata,
            loader,
            table,
            services,
            reference,
            body: deployment.body,
            interceptors: deployment.interceptors,
            icf,
            context,
            provider,
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.metadata.ejb_name
    }

    /// Check that the enhanced bean class is loadable
    pub(crate) fn init(&self) -> Result<(), FactoryError> {
        if !self.loader.contains(&self.metadata.class_name) {
            return Err(FactoryError::ClassNotFound {
                bean: self.metadata.ejb_name.clone(),
                class: self.metadata.class_name.clone(),
            });
        }
        debug!(
            bean = %self.metadata.ejb_name,
            kind = self.metadata.kind.label(),
            methods = self.table.len(),
            "Factory initialized"
        );
        Ok(())
    }

    pub(crate) fn mark_started(&self) {
        if let Some(statistics) = &self.services.statistics {
            if let Err(e) = statistics.register_provider(&self.provider) {
                warn!(provider = %self.provider, error = %e, "Cannot register statistic provider");
            }
        }
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_stopped(&self) -> bool {
        let was_started = self.started.swap(false, Ordering::SeqCst);
        if was_started {
            if let Some(statistics) = &self.services.statistics {
                if let Err(e) = statistics.unregister_provider(&self.provider) {
                    debug!(provider = %self.provider, error = %e, "Statistic provider already gone");
                }
            }
        }
        was_started
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Business interface exposed through the EJB 2.1 surface
    fn component_interface(&self) -> &str {
        self.metadata
            .home
            .as_ref()
            .or(self.metadata.local_home.as_ref())
            .map(|home| home.component.name.as_str())
            .or_else(|| self.metadata.client_interfaces().next().map(|i| i.name.as_str()))
            .unwrap_or(self.metadata.class_name.as_str())
    }

    /// Identity of the bean as seen through `interface`
    pub(crate) fn identity(&self, interface: &str, bean_id: Option<i64>) -> ProxyIdentity {
        ProxyIdentity::new(&self.services.container_id, &self.metadata.ejb_name, interface)
            .with_bean_id(bean_id)
    }

    /// Create, inject and post-construct a new instance
    pub(crate) fn create_instance(&self, bean_id: Option<i64>) -> Result<ObjectRef, Throwable> {
        let host = BeanHost::new(self, bean_id);
        let interpreter = Interpreter::new(&self.loader, &host);
        let instance = interpreter.instantiate(&self.metadata.class_name, Some((self.body)()))?;

        let timeout_ms = self
            .services
            .config
            .stateful_timeout()
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        for (field, ty) in common_fields().into_iter().chain(kind_fields(self.metadata.kind)) {
            let slot = match field {
                FIELD_FACTORY => Slot::native(Arc::new(self.reference.clone())),
                FIELD_INVOCATION_CONTEXT_FACTORY => Slot::native(self.icf.clone()),
                FIELD_DYNAMIC_INTERCEPTOR_MANAGER => {
                    Slot::native(self.services.dynamic_interceptors.clone())
                }
                FIELD_CONTEXT => Slot::native(self.context.clone()),
                FIELD_STATEFUL_ID => bean_id.map(|id| Slot::Value(Value::Long(id))).unwrap_or_default(),
                FIELD_STATEFUL_TIMEOUT => Slot::Value(Value::Long(timeout_ms)),
                _ => continue,
            };
            let (_, setter) = accessor_names(field);
            let descriptor = method_descriptor(&[ty], &TypeDesc::Void);
            interpreter.invoke(&instance, &setter, &descriptor, vec![slot])?;
        }

        for method in self.metadata.post_construct_methods() {
            interpreter.invoke(&instance, &method.name, &method.descriptor, Vec::new())?;
        }

        debug!(bean = %self.metadata.ejb_name, bean_id = ?bean_id, "Created instance");
        Ok(instance)
    }

    /// Run the pre-destroy callbacks and clear the injected fields
    pub(crate) fn destroy(&self, instance: &ObjectRef) {
        let host = BeanHost::new(self, None);
        let interpreter = Interpreter::new(&self.loader, &host);
        for method in self.metadata.pre_destroy_methods() {
            if let Err(e) = interpreter.invoke(instance, &method.name, &method.descriptor, Vec::new()) {
                warn!(
                    bean = %self.metadata.ejb_name,
                    method = %method.name,
                    error = %e,
                    "PreDestroy callback failed"
                );
            }
        }
        if let Err(e) = interpreter.invoke(instance, CLEANUP_METHOD, "()V", Vec::new()) {
            warn!(bean = %self.metadata.ejb_name, error = %e, "Cleanup failed");
        }
    }

    /// How a failure of `entry` affects the transaction and the client
    fn classify(&self, thrown: &Throwable, declared: &[String]) -> FailureKind {
        if let Some(application) = self.metadata.application_exception(thrown) {
            return if application.rollback {
                FailureKind::ApplicationRollback
            } else {
                FailureKind::Application
            };
        }
        let declared_checked = thrown.is_checked()
            && !thrown.is_instance_of(names::REMOTE_EXCEPTION)
            && declared.iter().any(|d| thrown.is_instance_of(d));
        if declared_checked {
            FailureKind::Application
        } else {
            FailureKind::System
        }
    }

    /// Run `entry` on `instance` through security, transaction and interceptors
    pub(crate) fn invoke(
        &self,
        instance: &ObjectRef,
        entry: &MethodEntry,
        args: Vec<Value>,
        state: &mut CallState,
    ) -> Result<Value, Failure> {
        let _scope = self.services.extended.enter();
        let started = Instant::now();
        let host = BeanHost::new(self, state.bean_id);
        let caller = state.caller.clone();
        let interpreter = Interpreter::new(&self.loader, &host).with_caller(caller.as_ref());

        let manager = instance
            .field(FIELD_INTERCEPTOR_MANAGER)
            .downcast::<InterceptorManager>();
        let chain = self.icf.chain(manager.as_deref());
        let operation = state.operation;
        let run_as = self.metadata.run_as.is_some();
        let name = entry.name.as_str();
        let descriptor = entry.descriptor.as_str();

        let mut target = |params: Vec<Value>, _: &mut CallState| {
            interpreter.invoke_values(instance, name, descriptor, params)
        };
        let classify = |t: &Throwable| self.classify(t, &entry.exceptions);

        let result = {
            let mut ctx = InvocationContext::new(
                &self.metadata.ejb_name,
                name,
                descriptor,
                args,
                state,
                &chain,
                &mut target,
            );
            if operation == OperationState::BusinessMethod
                && !self.services.permission_manager.check_security(&ctx, run_as)
            {
                Err(Throwable::of(
                    names::EJB_ACCESS,
                    format!(
                        "Caller is not allowed to call {}{} on bean {}",
                        name, descriptor, self.metadata.ejb_name
                    ),
                ))
            } else {
                demarcate(
                    self.services.transaction_manager.as_ref(),
                    entry.metadata.transaction,
                    classify,
                    || ctx.proceed(),
                )
            }
        };

        if host.remove_requested.get() {
            state.remove_requested = true;
        }

        let elapsed = started.elapsed();
        if let Some(statistics) = &self.services.statistics {
            statistics.record_call(&self.provider, elapsed, result.is_err());
        }

        match result {
            Ok(value) => {
                debug!(
                    bean = %self.metadata.ejb_name,
                    method = name,
                    elapsed_us = elapsed.as_micros() as u64,
                    "Call completed"
                );
                Ok(value)
            }
            Err(throwable) => {
                let application = !matches!(
                    self.classify(&throwable, &entry.exceptions),
                    FailureKind::System
                );
                debug!(
                    bean = %self.metadata.ejb_name,
                    method = name,
                    exception = %throwable.class_name,
                    application,
                    "Call failed"
                );
                Err(Failure {
                    throwable,
                    application,
                })
            }
        }
    }

    /// Answer `equals`, `hashCode` or `toString` for the bean identity
    pub(crate) fn object_method(&self, entry: &MethodEntry, args: &[Value], identity: &ProxyIdentity) -> Value {
        let stateful = self.metadata.kind == BeanKind::Stateful;
        match entry.name.as_str() {
            "toString" => Value::Str(identity.identity_string()),
            "hashCode" => Value::Int(identity.identity_hash()),
            _ => {
                let equal = args
                    .first()
                    .and_then(ProxyIdentity::from_value)
                    .map(|other| identity.is_identical(&other, stateful))
                    .unwrap_or(false);
                Value::Bool(equal)
            }
        }
    }

    /// Look up the method of `request`
    pub(crate) fn entry(&self, method_hash: i64) -> Result<Arc<MethodEntry>, Failure> {
        self.table.get(method_hash).ok_or_else(|| {
            Failure::system(Throwable::ejb_exception(format!(
                "Cannot find method with hash {} on bean {}",
                method_hash, self.metadata.ejb_name
            )))
        })
    }

    /// Fail unless started
    pub(crate) fn ensure_started(&self) -> Result<(), Failure> {
        if self.is_started() {
            Ok(())
        } else {
            Err(Failure::system(Throwable::illegal_state(format!(
                "Factory {} is not started",
                self.metadata.ejb_name
            ))))
        }
    }
}

/// Build a response from a call outcome
pub(crate) fn response(result: Result<Value, Failure>) -> EjbResponse {
    match result {
        Ok(value) => EjbResponse::value(value),
        Err(failure) => EjbResponse::exception(failure.throwable, failure.application),
    }
}

/// Host serving the code of bean instances
struct BeanHost<'a> {
    core: &'a FactoryCore,
    bean_id: Option<i64>,
    remove_requested: Cell<bool>,
}

impl<'a> BeanHost<'a> {
    fn new(core: &'a FactoryCore, bean_id: Option<i64>) -> Self {
        Self {
            core,
            bean_id,
            remove_requested: Cell::new(false),
        }
    }

    /// Session id of the instance passed to a helper
    fn bean_id_of(&self, this: Option<&Slot>) -> Option<i64> {
        this.and_then(Slot::as_object)
            .and_then(|instance| instance.field(FIELD_STATEFUL_ID).as_value().and_then(Value::as_i64))
            .or(self.bean_id)
    }
}

impl Host for BeanHost<'_> {
    fn construct(&self, class: &str) -> Result<Slot, Throwable> {
        if class == INTERCEPTOR_MANAGER_CLASS {
            return Ok(Slot::native(Arc::new(InterceptorManager::new(
                self.core.interceptors.clone(),
            ))));
        }
        Err(Throwable::of(
            names::LINKAGE_ERROR,
            format!("Container cannot construct {}", class),
        ))
    }

    fn invoke_static(
        &self,
        _interpreter: &Interpreter<'_>,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Slot>,
    ) -> Result<Slot, Throwable> {
        let unknown = || {
            Throwable::of(
                names::LINKAGE_ERROR,
                format!("No static method {}.{}{}", owner, name, descriptor),
            )
        };
        if owner != EJB21_HELPER_CLASS {
            return Err(unknown());
        }

        let stateful = self.core.metadata.kind == BeanKind::Stateful;
        match (name, descriptor) {
            ("remove", HELPER_REMOVE_DESC) => {
                self.remove_requested.set(true);
                Ok(Slot::Null)
            }
            ("isIdentical", HELPER_IS_IDENTICAL_DESC) => {
                let interface = self.core.component_interface();
                let this = self.core.identity(interface, self.bean_id_of(args.first()));
                let identical = args
                    .get(1)
                    .and_then(Slot::as_value)
                    .and_then(ProxyIdentity::from_value)
                    .map(|other| this.is_identical(&other, stateful))
                    .unwrap_or(false);
                Ok(Slot::Value(Value::Bool(identical)))
            }
            ("getHandle", HELPER_GET_HANDLE_DESC) => {
                let interface = self.core.component_interface();
                let bean_id = if stateful { self.bean_id_of(args.first()) } else { None };
                Ok(Slot::from_value(self.core.identity(interface, bean_id).to_value()))
            }
            _ => Err(unknown()),
        }
    }

    fn invoke_handler(
        &self,
        receiver: &ObjectRef,
        method: &ezb_sdk::MethodDescriptor,
        _args: Vec<Value>,
    ) -> Result<Value, Throwable> {
        Err(Throwable::ejb_exception(format!(
            "Instance of {} has no invocation handler for {}",
            receiver.class_name(),
            method.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::enhancer::Enhancer;
    use crate::invocation::{
        DynamicInterceptorManager, LocalTransactionManager, PermitAll, ViewKind,
    };
    use crate::metadata::MethodMetadata;
    use crate::runtime::BodyCall;
    use crate::classfile::MethodDef;
    use crate::container::persistence::ExtendedContexts;
    use parking_lot::RwLock;
    use std::sync::Weak;

    fn services() -> FactoryServices {
        FactoryServices {
            embedded_id: 0,
            server_name: "ezb".into(),
            container_id: "c1".into(),
            config: ContainerConfig::default(),
            transaction_manager: Arc::new(LocalTransactionManager::new()),
            permission_manager: Arc::new(PermitAll),
            global_interceptors: Arc::new(RwLock::new(Vec::new())),
            dynamic_interceptors: Arc::new(DynamicInterceptorManager::new()),
            statistics: None,
            extended: Arc::new(ExtendedContexts::new()),
        }
    }

    fn core(metadata: BeanClassMetadata) -> FactoryCore {
        let mut class = ClassFile::new(metadata.class_name.clone());
        class
            .methods
            .push(MethodDef::default_constructor("java.lang.Object"));
        class
            .methods
            .push(MethodDef::new("greet", vec![TypeDesc::string()], TypeDesc::string()));

        let enhanced = Enhancer::default().enhance(&class.encode(), &metadata).unwrap();
        let loader = Arc::new(BeanClassLoader::new("c1"));
        for defined in enhanced.classes() {
            loader.define(defined).unwrap();
        }
        let body = |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
            match call.method {
                "greet" => Ok(Value::Str(format!("hello {}", call.arg(0).as_str().unwrap_or("?")))),
                "fail" => Err(Throwable::checked("org.acme.BadInput", "bad")),
                _ => Ok(Value::Null),
            }
        };
        let deployment = BeanDeployment::new(metadata, class.encode(), body);
        let reference = FactoryReference::new("Greeter", "c1", Weak::<crate::factory::StatelessFactory>::new());
        FactoryCore::new(deployment, &class, loader, services(), reference)
    }

    fn greeter() -> BeanClassMetadata {
        BeanClassMetadata::new("Greeter", "org.acme.GreeterBean", BeanKind::Stateless).with_local(
            ezb_sdk::InterfaceDescriptor::new("org.acme.Greeter").with_method(
                ezb_sdk::MethodDescriptor::new("", "greet")
                    .with_params(vec![TypeDesc::string()])
                    .returns(TypeDesc::string()),
            ),
        )
    }

    #[test]
    fn test_created_instance_is_injected() {
        let core = core(greeter());
        let instance = core.create_instance(None).unwrap();
        let context = BeanContext::of(&instance).unwrap();
        assert_eq!(context.ejb_name(), "Greeter");
        assert!(instance
            .field(FIELD_INTERCEPTOR_MANAGER)
            .downcast::<InterceptorManager>()
            .is_some());
        assert!(instance
            .field(FIELD_FACTORY)
            .downcast::<FactoryReference>()
            .is_some());
    }

    #[test]
    fn test_invoke_runs_body() {
        let core = core(greeter());
        let instance = core.create_instance(None).unwrap();
        let entry = core
            .entry(ezb_sdk::method_hash("greet", "(Ljava/lang/String;)Ljava/lang/String;"))
            .unwrap();
        let mut state = CallState::business(None, Some(ViewKind::Local));
        let value = core
            .invoke(&instance, &entry, vec![Value::Str("ann".into())], &mut state)
            .unwrap();
        assert_eq!(value, Value::Str("hello ann".into()));
    }

    #[test]
    fn test_unknown_hash_is_system_failure() {
        let core = core(greeter());
        let failure = core.entry(42).unwrap_err();
        assert!(!failure.application);
        assert!(failure.throwable.is_instance_of(names::EJB_EXCEPTION));
    }

    #[test]
    fn test_classify_application_exceptions() {
        let core = core(
            greeter()
                .with_application_exception("org.acme.Overdraft", true)
                .with_method(MethodMetadata::new("fail", "()V")),
        );
        let declared = vec!["org.acme.BadInput".to_string()];
        let overdraft = Throwable::runtime("org.acme.Overdraft", "no funds");
        assert_eq!(core.classify(&overdraft, &[]), FailureKind::ApplicationRollback);
        let bad = Throwable::checked("org.acme.BadInput", "bad");
        assert_eq!(core.classify(&bad, &declared), FailureKind::Application);
        assert_eq!(core.classify(&bad, &[]), FailureKind::System);
        let remote = Throwable::of(names::REMOTE_EXCEPTION, "down");
        assert_eq!(
            core.classify(&remote, &[names::REMOTE_EXCEPTION.to_string()]),
            FailureKind::System
        );
    }

    #[test]
    fn test_object_methods_answered_from_identity() {
        let core = core(greeter());
        let identity = core.identity("org.acme.Greeter", None);
        let to_string = core.table.get(ezb_sdk::MethodDescriptor::object_to_string().hash()).unwrap();
        assert_eq!(
            core.object_method(&to_string, &[], &identity),
            Value::Str(identity.identity_string())
        );
        let equals = core.table.get(ezb_sdk::MethodDescriptor::object_equals().hash()).unwrap();
        assert_eq!(
            core.object_method(&equals, &[identity.to_value()], &identity),
            Value::Bool(true)
        );
        assert_eq!(core.object_method(&equals, &[Value::Int(1)], &identity), Value::Bool(false));
    }
}
