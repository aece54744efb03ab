//! Message-driven bean factory
//!
//! Messages are delivered to pooled instances through the bean's message
//! listener method. Message-driven beans have no client view, so direct
//! calls are refused.

use std::sync::{Arc, Weak};

use ezb_sdk::{names, EjbRequest, EjbResponse, Throwable, Value};
use tracing::{debug, info};

use crate::classfile::ClassFile;
use crate::invocation::{CallState, OperationState};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::BeanClassLoader;

use super::pipeline::{Failure, FactoryCore};
use super::pool::{InstancePool, PoolSnapshot};
use super::table::MethodEntry;
use super::{BeanDeployment, Factory, FactoryError, FactoryReference, FactoryServices, TimerHandle};

/// Factory of a message-driven bean
pub struct MessageDrivenFactory {
    core: FactoryCore,
    pool: InstancePool,
    listener: Option<MethodEntry>,
    timeout_entry: MethodEntry,
}

impl MessageDrivenFactory {
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
            let listener = core
                .metadata
                .message_listener
                .as_ref()
                .and_then(|listener| listener.methods.first())
                .map(|method| MethodEntry::listener(method, &core.metadata));
            let timeout_entry = MethodEntry::timeout(&core.metadata);
            Self {
                core,
                pool,
                listener,
                timeout_entry,
            }
        })
    }

    /// Deliver `message` to the listener method of a pooled instance
    pub fn deliver(&self, message: Value) -> Result<Value, Throwable> {
        self.core.ensure_started().map_err(|f| f.throwable)?;
        let listener = self.listener.as_ref().ok_or_else(|| {
            Throwable::illegal_state(format!(
                "Message-driven bean {} has no message listener method",
                self.core.name()
            ))
        })?;
        let mut state = CallState::container(OperationState::MessageDelivery);
        self.run(listener, vec![message], &mut state)
            .map_err(|failure| failure.throwable)
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

    fn refuse(&self) -> EjbResponse {
        EjbResponse::exception(
            Throwable::of(
                names::UNSUPPORTED_OPERATION,
                format!("Message-driven bean {} has no client view", self.core.name()),
            ),
            false,
        )
    }
}

impl Factory for MessageDrivenFactory {
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
        BeanKind::MessageDriven
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
        info!(bean = %self.core.name(), "Message-driven factory started");
        Ok(())
    }

    fn stop(&self) {
        if self.core.mark_stopped() {
            for instance in self.pool.drain() {
                self.core.destroy(&instance);
            }
            info!(bean = %self.core.name(), "Message-driven factory stopped");
        }
    }

    fn is_started(&self) -> bool {
        self.core.is_started()
    }

    fn rpc_invoke(&self, _request: &EjbRequest) -> EjbResponse {
        self.refuse()
    }

    fn local_call(&self, _request: &EjbRequest) -> EjbResponse {
        self.refuse()
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

impl std::fmt::Debug for MessageDrivenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDrivenFactory")
            .field("bean", &self.core.name())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::testing::{bean_class, load, services};
    use crate::runtime::BodyCall;
    use ezb_sdk::{method_hash, InterfaceDescriptor, MethodDescriptor, TypeDesc};
    use parking_lot::Mutex;

    fn factory(received: Arc<Mutex<Vec<Value>>>) -> Arc<MessageDrivenFactory> {
        let metadata = BeanClassMetadata::new("Audit", "org.acme.AuditMdb", BeanKind::MessageDriven)
            .with_message_listener(
                InterfaceDescriptor::new("javax.jms.MessageListener").with_method(
                    MethodDescriptor::new("", "onMessage")
                        .with_params(vec![TypeDesc::object("javax.jms.Message")]),
                ),
            );
        let class = bean_class("org.acme.AuditMdb", &[("onMessage", "(Ljavax/jms/Message;)V")]);
        let loader = load(&metadata, &class);
        let body = move |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
            received.lock().push(call.arg(0).clone());
            Ok(Value::Null)
        };
        let factory = MessageDrivenFactory::new(
            BeanDeployment::new(metadata, class.encode(), body),
            &class,
            loader,
            services(),
        );
        factory.init().unwrap();
        factory.start().unwrap();
        factory
    }

    #[test]
    fn test_deliver_reaches_listener() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(received.clone());
        factory.deliver(Value::Str("audit me".into())).unwrap();
        factory.deliver(Value::Str("again".into())).unwrap();
        assert_eq!(received.lock().len(), 2);
        assert_eq!(factory.pool().created, 1);
    }

    #[test]
    fn test_client_calls_refused() {
        let factory = factory(Arc::default());
        let response = factory.local_call(&EjbRequest::new(method_hash("onMessage", "()V"), vec![]));
        let exception = response.rpc_exception.unwrap();
        assert!(exception.cause.is_instance_of(names::UNSUPPORTED_OPERATION));
    }
}
