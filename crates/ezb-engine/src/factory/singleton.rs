//! Singleton session bean factory
//!
//! One instance, created when the factory starts and destroyed when it
//! stops. Calls are serialized on the instance. A system exception does not
//! discard the singleton.

use std::sync::{Arc, Weak};

use ezb_sdk::{EjbRequest, EjbResponse, Throwable, Value};
use parking_lot::Mutex;
use tracing::info;

use crate::classfile::ClassFile;
use crate::invocation::{CallState, OperationState, ViewKind};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::{BeanClassLoader, ObjectRef};

use super::pipeline::{response, Failure, FactoryCore};
use super::pool::PoolSnapshot;
use super::table::MethodEntry;
use super::{BeanDeployment, Factory, FactoryError, FactoryReference, FactoryServices, TimerHandle};

/// Factory of a singleton session bean
pub struct SingletonFactory {
    core: FactoryCore,
    instance: Mutex<Option<ObjectRef>>,
    timeout_entry: MethodEntry,
}

impl SingletonFactory {
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
            let core = FactoryCore::new(deployment, bean_class, loader, services, reference);
            let timeout_entry = MethodEntry::timeout(&core.metadata);
            Self {
                core,
                instance: Mutex::new(None),
                timeout_entry,
            }
        })
    }

    fn run(&self, entry: &MethodEntry, args: Vec<Value>, state: &mut CallState) -> Result<Value, Failure> {
        let guard = self.instance.lock();
        let instance = guard.as_ref().ok_or_else(|| {
            Failure::system(Throwable::illegal_state(format!(
                "Singleton {} has no instance",
                self.core.name()
            )))
        })?;
        self.core.invoke(instance, entry, args, state)
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
}

impl Factory for SingletonFactory {
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
        BeanKind::Singleton
    }

    fn metadata(&self) -> &BeanClassMetadata {
        &self.core.metadata
    }

    fn init(&self) -> Result<(), FactoryError> {
        self.core.init()
    }

    fn start(&self) -> Result<(), FactoryError> {
        let instance = self
            .core
            .create_instance(None)
            .map_err(|cause| FactoryError::Instantiation {
                bean: self.core.name().to_string(),
                cause,
            })?;
        *self.instance.lock() = Some(instance);
        self.core.mark_started();
        info!(bean = %self.core.name(), "Singleton factory started");
        Ok(())
    }

    fn stop(&self) {
        if self.core.mark_stopped() {
            if let Some(instance) = self.instance.lock().take() {
                self.core.destroy(&instance);
            }
            info!(bean = %self.core.name(), "Singleton factory stopped");
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
        let live = usize::from(self.instance.lock().is_some());
        PoolSnapshot {
            max_size: Some(1),
            available: live,
            in_use: 0,
            created: live as u64,
            discarded: 0,
        }
    }
}

impl std::fmt::Debug for SingletonFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonFactory")
            .field("bean", &self.core.name())
            .field("started", &self.core.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::testing::{bean_class, load, services};
    use crate::metadata::MethodMetadata;
    use crate::runtime::{BodyCall, Slot};
    use ezb_sdk::{method_hash, InterfaceDescriptor, MethodDescriptor, TypeDesc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn factory(destroyed: Arc<AtomicUsize>) -> Arc<SingletonFactory> {
        let metadata = BeanClassMetadata::new("Config", "org.acme.ConfigBean", BeanKind::Singleton)
            .with_local(
                InterfaceDescriptor::new("org.acme.Config")
                    .with_method(MethodDescriptor::new("", "hits").returns(TypeDesc::Int))
                    .with_method(MethodDescriptor::new("", "crash")),
            )
            .with_method(MethodMetadata::new("close", "()V").pre_destroy());
        let class = bean_class(
            "org.acme.ConfigBean",
            &[("hits", "()I"), ("crash", "()V"), ("close", "()V")],
        );
        let loader = load(&metadata, &class);
        let body = move |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
            match call.method {
                "hits" => {
                    let hits = call.instance.field("hits").as_value().and_then(Value::as_i64).unwrap_or(0) + 1;
                    call.instance.set_field("hits", Slot::Value(Value::Long(hits)));
                    Ok(Value::Int(hits as i32))
                }
                "crash" => Err(Throwable::runtime("java.lang.IllegalStateException", "broken")),
                "close" => {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
                _ => Ok(Value::Null),
            }
        };
        let factory = SingletonFactory::new(
            BeanDeployment::new(metadata, class.encode(), body),
            &class,
            loader,
            services(),
        );
        factory.init().unwrap();
        factory.start().unwrap();
        factory
    }

    fn call(factory: &SingletonFactory, name: &str, desc: &str) -> EjbResponse {
        factory.local_call(
            &EjbRequest::new(method_hash(name, desc), vec![]).for_factory("c1", "Config", "org.acme.Config"),
        )
    }

    #[test]
    fn test_single_instance_survives_system_exception() {
        let factory = factory(Arc::default());
        assert_eq!(call(&factory, "hits", "()I").value, Value::Int(1));
        assert!(call(&factory, "crash", "()V").is_error());
        assert_eq!(call(&factory, "hits", "()I").value, Value::Int(2));
    }

    #[test]
    fn test_stop_runs_pre_destroy() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let factory = factory(destroyed.clone());
        factory.stop();
        factory.stop();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.pool().available, 0);
    }
}
