//! Stateless session bean factory
//!
//! Calls are served by pooled, interchangeable instances. An instance whose
//! call ends in a system exception is discarded.

use std::sync::{Arc, Weak};

use ezb_sdk::{EjbRequest, EjbResponse, Value};
use tracing::{debug, info};

use crate::classfile::ClassFile;
use crate::invocation::{CallState, OperationState, ViewKind};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::BeanClassLoader;

use super::pipeline::{response, Failure, FactoryCore};
use super::pool::{InstancePool, PoolSnapshot};
use super::table::MethodEntry;
use super::{BeanDeployment, Factory, FactoryError, FactoryReference, FactoryServices, TimerHandle};

/// Factory of a stateless session bean
pub struct StatelessFactory {
    core: FactoryCore,
    pool: InstancePool,
    timeout_entry: MethodEntry,
}

impl StatelessFactory {
    /// Create the factory; `bean_class` is the bean class before enhancement
    pub fn new(
        deployment: BeanDeployment,
        bean_class: &ClassFile,
        loader: Arc<BeanClassLoader>,
        services: FactoryServices,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let reference = FactoryReference::new(
                &deployment.metadata.ejb_name,
                &services.container_id,
                weak.clone(),
            );
            let pool = InstancePool::new(
                services.config.pool_size,
                services.config.pool_acquire_timeout(),
            );
            let core = FactoryCore::new(deployment, bean_class, loader, services, reference);
            let timeout_entry = MethodEntry::timeout(&core.metadata);
            Self {
                core,
                pool,
                timeout_entry,
            }
        })
    }

    fn serve(&self, request: &EjbRequest, view: ViewKind) -> Result<Value, Failure> {
        self.core.ensure_started()?;
        let entry = self.core.entry(request.method_hash)?;
        if entry.object_method {
            let identity = self.core.identity(&request.interface_name, None);
            return Ok(self.core.object_method(&entry, &request.args, &identity));
        }
        let mut state = CallState::business(request.caller.clone(), Some(view));
        self.run(&entry, request.args.clone(), &mut state)
    }

    fn run(&self, entry: &MethodEntry, args: Vec<Value>, state: &mut CallState) -> Result<Value, Failure> {
        let instance = self
            .pool
            .acquire(|| self.core.create_instance(None))
            .map_err(|e| Failure::system(e.into_throwable(self.core.name())))?;

        let result = self.core.invoke(&instance, entry, args, state);
        match &result {
            Err(failure) if !failure.application => {
                self.pool.discard();
                self.core.destroy(&instance);
            }
            _ => {
                if let Some(stale) = self.pool.release(instance) {
                    debug!(bean = %self.core.name(), "Destroying instance released after stop");
                    self.core.destroy(&stale);
                }
            }
        }
        result
    }
}

impl Factory for StatelessFactory {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn class_name(&self) -> &str {
        &self.core.metadata.class_name
    }

    fn container_id(&self) -> &str {
        &self.core.services.container_id
    }

    fn kind(&self) -> BeanKind {
        BeanKind::Stateless
    }

    fn metadata(&self) -> &BeanClassMetadata {
        &self.core.metadata
    }

    fn init(&self) -> Result<(), FactoryError> {
        self.core.init()
    }

    fn start(&self) -> Result<(), FactoryError> {
        self.pool.reopen();
        self.core.mark_started();
        info!(bean = %self.core.name(), "Stateless factory started");
        Ok(())
    }

    fn stop(&self) {
        if self.core.mark_stopped() {
            for instance in self.pool.drain() {
                self.core.destroy(&instance);
            }
            info!(bean = %self.core.name(), "Stateless factory stopped");
        }
    }

    fn is_started(&self) -> bool {
        self.core.is_started()
    }

    fn rpc_invoke(&self, request: &EjbRequest) -> EjbResponse {
        response(self.serve(request, ViewKind::Remote))
    }

    fn local_call(&self, request: &EjbRequest) -> EjbResponse {
        response(self.serve(request, ViewKind::Local))
    }

    fn notify_timeout(&self, timer: &TimerHandle) -> Result<(), FactoryError> {
        if !self.core.is_started() {
            return Err(FactoryError::NotStarted(self.core.name().to_string()));
        }
        let mut state = CallState::container(OperationState::Timeout);
        self.run(&self.timeout_entry, vec![timer.to_value()], &mut state)
            .map(|_| ())
            .map_err(|failure| FactoryError::Timeout(failure.throwable))
    }

    fn pool(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }
}

impl std::fmt::Debug for StatelessFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessFactory")
            .field("bean", &self.core.name())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::testing::{bean_class, load, services};
    use crate::metadata::MethodMetadata;
    use crate::runtime::BodyCall;
    use ezb_sdk::{method_hash, names, InterfaceDescriptor, MethodDescriptor, Throwable, TypeDesc};
    use crate::container::persistence::ExtendedPersistenceContext;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn counter() -> BeanClassMetadata {
        BeanClassMetadata::new("Counter", "org.acme.CounterBean", BeanKind::Stateless)
            .with_local(
                InterfaceDescriptor::new("org.acme.Counter")
                    .with_method(MethodDescriptor::new("", "next").returns(TypeDesc::Int))
                    .with_method(MethodDescriptor::new("", "crash")),
            )
            .with_method(MethodMetadata::new("tick", "(Ljavax/ejb/Timer;)V").timeout())
    }

    fn factory(ticks: Arc<Mutex<Vec<Value>>>) -> Arc<StatelessFactory> {
        let metadata = counter();
        let class = bean_class(
            "org.acme.CounterBean",
            &[("next", "()I"), ("crash", "()V"), ("tick", "(Ljavax/ejb/Timer;)V")],
        );
        let loader = load(&metadata, &class);
        let body = move |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
            match call.method {
                "next" => Ok(Value::Int(1)),
                "crash" => Err(Throwable::runtime("java.lang.ArithmeticException", "boom")),
                "tick" => {
                    ticks.lock().push(call.arg(0).clone());
                    Ok(Value::Null)
                }
                _ => Ok(Value::Null),
            }
        };
        let factory = StatelessFactory::new(
            BeanDeployment::new(metadata, class.encode(), body),
            &class,
            loader,
            services(),
        );
        factory.init().unwrap();
        factory.start().unwrap();
        factory
    }

    fn request(name: &str, descriptor: &str) -> EjbRequest {
        EjbRequest::new(method_hash(name, descriptor), vec![]).for_factory(
            "c1",
            "Counter",
            "org.acme.Counter",
        )
    }

    #[test]
    fn test_call_reuses_pooled_instance() {
        let factory = factory(Arc::default());
        for _ in 0..3 {
            let response = factory.local_call(&request("next", "()I"));
            assert_eq!(response.value, Value::Int(1));
        }
        let pool = factory.pool();
        assert_eq!(pool.created, 1);
        assert_eq!(pool.available, 1);
    }

    #[test]
    fn test_system_exception_discards_instance() {
        let factory = factory(Arc::default());
        let response = factory.local_call(&request("crash", "()V"));
        let exception = response.rpc_exception.unwrap();
        assert!(!exception.application);
        let pool = factory.pool();
        assert_eq!(pool.discarded, 1);
        assert_eq!(pool.available, 0);
    }

    #[test]
    fn test_unknown_method_hash() {
        let factory = factory(Arc::default());
        let response = factory.rpc_invoke(&request("missing", "()V"));
        let exception = response.rpc_exception.unwrap();
        assert!(exception.cause.is_instance_of(names::EJB_EXCEPTION));
    }

    #[test]
    fn test_stopped_factory_rejects_calls() {
        let factory = factory(Arc::default());
        factory.stop();
        let response = factory.local_call(&request("next", "()I"));
        assert!(response.is_error());
        assert!(matches!(
            factory.notify_timeout(&TimerHandle::new(1, Value::Null)),
            Err(FactoryError::NotStarted(_))
        ));
    }

    #[test]
    fn test_instance_released_after_stop_is_destroyed() {
        let metadata = BeanClassMetadata::new("Slow", "org.acme.SlowBean", BeanKind::Stateless)
            .with_local(
                InterfaceDescriptor::new("org.acme.Slow")
                    .with_method(MethodDescriptor::new("", "work").returns(TypeDesc::Int)),
            )
            .with_method(MethodMetadata::new("close", "()V").pre_destroy());
        let class = bean_class("org.acme.SlowBean", &[("work", "()I"), ("close", "()V")]);
        let loader = load(&metadata, &class);
        let gate = Arc::new(Barrier::new(2));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let body = {
            let gate = gate.clone();
            let destroyed = destroyed.clone();
            move |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
                match call.method {
                    "work" => {
                        gate.wait();
                        gate.wait();
                        Ok(Value::Int(1))
                    }
                    "close" => {
                        destroyed.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                    _ => Ok(Value::Null),
                }
            }
        };
        let factory = StatelessFactory::new(
            BeanDeployment::new(metadata, class.encode(), body),
            &class,
            loader,
            services(),
        );
        factory.init().unwrap();
        factory.start().unwrap();

        let request = EjbRequest::new(method_hash("work", "()I"), vec![]).for_factory(
            "c1",
            "Slow",
            "org.acme.Slow",
        );
        std::thread::scope(|s| {
            let call = s.spawn(|| factory.local_call(&request));
            gate.wait();
            factory.stop();
            assert_eq!(destroyed.load(Ordering::SeqCst), 0);
            gate.wait();
            assert_eq!(call.join().unwrap().value, Value::Int(1));
        });

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        let pool = factory.pool();
        assert_eq!(pool.available, 0);
        assert_eq!(pool.in_use, 0);
        assert_eq!(pool.discarded, 1);

        factory.start().unwrap();
        let thread = std::thread::spawn({
            let gate = gate.clone();
            move || {
                gate.wait();
                gate.wait();
            }
        });
        assert_eq!(factory.local_call(&request).value, Value::Int(1));
        thread.join().unwrap();
        assert_eq!(factory.pool().available, 1);
    }

    struct Context(Arc<AtomicUsize>);

    impl ExtendedPersistenceContext for Context {
        fn unit_name(&self) -> &str {
            "orders"
        }

        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_extended_contexts_released_after_each_call() {
        let services = services();
        let extended = services.extended.clone();
        let closed = Arc::new(AtomicUsize::new(0));
        let metadata = counter();
        let class = bean_class("org.acme.CounterBean", &[("next", "()I")]);
        let loader = load(&metadata, &class);
        let body = {
            let extended = extended.clone();
            let closed = closed.clone();
            move |_call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
                extended
                    .get_or_create("orders", || Ok(Arc::new(Context(closed.clone()))))
                    .map_err(|e| Throwable::illegal_state(e.to_string()))?;
                Ok(Value::Int(1))
            }
        };
        let factory = StatelessFactory::new(
            BeanDeployment::new(metadata, class.encode(), body),
            &class,
            loader,
            services,
        );
        factory.init().unwrap();
        factory.start().unwrap();

        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    let response = factory.local_call(&request("next", "()I"));
                    assert_eq!(response.value, Value::Int(1));
                });
            }
        });
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert_eq!(extended.thread_count(), 0);
    }

    #[test]
    fn test_timeout_reaches_timeout_method() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(ticks.clone());
        let timer = TimerHandle::new(7, Value::Str("nightly".into()));
        factory.notify_timeout(&timer).unwrap();
        assert_eq!(*ticks.lock(), vec![timer.to_value()]);
    }
}
