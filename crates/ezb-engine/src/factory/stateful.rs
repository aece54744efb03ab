//! Stateful session bean factory
//!
//! Each client session owns one instance, keyed by a session id handed back
//! in the first response. Calls on one session are serialized. A session
//! ends when a remove method completes, when the EJB 2.1 `remove()` runs,
//! when a call fails with a system exception, or when it stays idle past the
//! configured timeout.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use ezb_sdk::{EjbRequest, EjbResponse, Throwable};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::classfile::ClassFile;
use crate::invocation::{CallState, ViewKind};
use crate::metadata::{BeanClassMetadata, BeanKind};
use crate::runtime::{BeanClassLoader, ObjectRef};

use super::pipeline::{response, Failure, FactoryCore};
use super::pool::PoolSnapshot;
use super::{BeanDeployment, Factory, FactoryError, FactoryReference, FactoryServices, TimerHandle};

struct Session {
    instance: ObjectRef,
    last_used: Mutex<Instant>,
    busy: Mutex<()>,
}

/// Factory of a stateful session bean
pub struct StatefulFactory {
    core: FactoryCore,
    sessions: DashMap<i64, Arc<Session>>,
    next_id: AtomicI64,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl StatefulFactory {
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
            Self {
                core: FactoryCore::new(deployment, bean_class, loader, services, reference),
                sessions: DashMap::new(),
                next_id: AtomicI64::new(1),
                created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }
        })
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether session `bean_id` is live
    pub fn has_session(&self, bean_id: i64) -> bool {
        self.sessions.contains_key(&bean_id)
    }

    /// Remove the sessions idle for longer than the stateful timeout
    ///
    /// Sessions serving a call are skipped. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let Some(timeout) = self.core.services.config.stateful_timeout() else {
            return 0;
        };
        let expired: Vec<(i64, Arc<Session>)> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.last_used.lock()) >= timeout)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut evicted = 0;
        for (bean_id, session) in expired {
            if let Some(_busy) = session.busy.try_lock() {
                if self.remove_session(bean_id) {
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            debug!(bean = %self.core.name(), evicted, "Evicted idle sessions");
        }
        evicted
    }

    fn create_session(&self) -> Result<(i64, Arc<Session>), Failure> {
        let bean_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = self.core.create_instance(Some(bean_id)).map_err(|cause| {
            Failure::system(
                Throwable::ejb_exception(format!(
                    "Cannot create an instance of bean {}",
                    self.core.name()
                ))
                .with_cause(cause),
            )
        })?;
        let session = Arc::new(Session {
            instance,
            last_used: Mutex::new(Instant::now()),
            busy: Mutex::new(()),
        });
        self.sessions.insert(bean_id, session.clone());
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok((bean_id, session))
    }

    fn remove_session(&self, bean_id: i64) -> bool {
        match self.sessions.remove(&bean_id) {
            Some((_, session)) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                self.core.destroy(&session.instance);
                debug!(bean = %self.core.name(), bean_id, "Removed session");
                true
            }
            None => false,
        }
    }

    fn removed(&self, bean_id: i64) -> EjbResponse {
        EjbResponse::exception(
            Throwable::no_such_ejb(format!(
                "Stateful bean {} with id {} has been removed",
                self.core.name(),
                bean_id
            )),
            false,
        )
        .with_bean_id(Some(bean_id))
        .removed()
    }

    fn serve(&self, request: &EjbRequest, view: ViewKind) -> EjbResponse {
        let entry = match self
            .core
            .ensure_started()
            .and_then(|_| self.core.entry(request.method_hash))
        {
            Ok(entry) => entry,
            Err(failure) => return response(Err(failure)).with_bean_id(request.bean_id),
        };

        let (bean_id, session) = match request.bean_id {
            Some(bean_id) => match self.sessions.get(&bean_id).map(|s| s.value().clone()) {
                Some(session) => (bean_id, session),
                None => return self.removed(bean_id),
            },
            None => match self.create_session() {
                Ok(created) => created,
                Err(failure) => return response(Err(failure)),
            },
        };

        if entry.object_method {
            *session.last_used.lock() = Instant::now();
            let identity = self.core.identity(&request.interface_name, Some(bean_id));
            let value = self.core.object_method(&entry, &request.args, &identity);
            return EjbResponse::value(value).with_bean_id(Some(bean_id));
        }

        let busy = session.busy.lock();
        if !self.sessions.contains_key(&bean_id) {
            return self.removed(bean_id);
        }
        *session.last_used.lock() = Instant::now();

        let mut state =
            CallState::business(request.caller.clone(), Some(view)).with_bean_id(Some(bean_id));
        let result = self
            .core
            .invoke(&session.instance, &entry, request.args.clone(), &mut state);

        let remove = match &result {
            Ok(_) => entry.metadata.remove || state.remove_requested,
            Err(failure) if !failure.application => true,
            Err(_) => {
                state.remove_requested
                    || (entry.metadata.remove && !entry.metadata.retain_if_exception)
            }
        };

        let reply = response(result).with_bean_id(Some(bean_id));
        if remove {
            self.remove_session(bean_id);
            drop(busy);
            return reply.removed();
        }
        reply
    }
}

impl Factory for StatefulFactory {
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
        BeanKind::Stateful
    }

    fn metadata(&self) -> &BeanClassMetadata {
        &self.core.metadata
    }

    fn init(&self) -> Result<(), FactoryError> {
        self.core.init()
    }

    fn start(&self) -> Result<(), FactoryError> {
        self.core.mark_started();
        info!(bean = %self.core.name(), "Stateful factory started");
        Ok(())
    }

    fn stop(&self) {
        if self.core.mark_stopped() {
            let ids: Vec<i64> = self.sessions.iter().map(|entry| *entry.key()).collect();
            for bean_id in ids {
                self.remove_session(bean_id);
            }
            info!(bean = %self.core.name(), "Stateful factory stopped");
        }
    }

    fn is_started(&self) -> bool {
        self.core.is_started()
    }

    fn rpc_invoke(&self, request: &EjbRequest) -> EjbResponse {
        self.serve(request, ViewKind::Remote)
    }

    fn local_call(&self, request: &EjbRequest) -> EjbResponse {
        self.serve(request, ViewKind::Local)
    }

    fn notify_timeout(&self, _timer: &TimerHandle) -> Result<(), FactoryError> {
        Err(FactoryError::UnsupportedOperation(format!(
            "Stateful bean {} cannot receive timer callbacks",
            self.core.name()
        )))
    }

    fn pool(&self) -> PoolSnapshot {
        PoolSnapshot {
            max_size: None,
            available: 0,
            in_use: self.sessions.len(),
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for StatefulFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulFactory")
            .field("bean", &self.core.name())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::testing::{bean_class, load, services};
    use crate::metadata::MethodMetadata;
    use crate::runtime::BodyCall;
    use ezb_sdk::{method_hash, names, InterfaceDescriptor, MethodDescriptor, TypeDesc, Value};
    use std::time::Duration;

    const CART: &str = "org.acme.Cart";

    fn cart() -> BeanClassMetadata {
        BeanClassMetadata::new("Cart", "org.acme.CartBean", BeanKind::Stateful)
            .with_local(
                InterfaceDescriptor::new(CART)
                    .with_method(MethodDescriptor::new("", "add").with_params(vec![TypeDesc::Int]))
                    .with_method(MethodDescriptor::new("", "total").returns(TypeDesc::Int))
                    .with_method(MethodDescriptor::new("", "checkout").throws("org.acme.Empty"))
                    .with_method(MethodDescriptor::new("", "crash")),
            )
            .with_method(MethodMetadata::new("checkout", "()V").remove(true))
    }

    fn factory() -> Arc<StatefulFactory> {
        let metadata = cart();
        let class = bean_class(
            "org.acme.CartBean",
            &[("add", "(I)V"), ("total", "()I"), ("checkout", "()V"), ("crash", "()V")],
        );
        let loader = load(&metadata, &class);
        let body = |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
            let total = call.instance.field("total").as_value().and_then(Value::as_i64).unwrap_or(0);
            match call.method {
                "add" => {
                    let amount = call.arg(0).as_i64().unwrap_or(0);
                    call.instance
                        .set_field("total", crate::runtime::Slot::Value(Value::Long(total + amount)));
                    Ok(Value::Null)
                }
                "total" => Ok(Value::Int(total as i32)),
                "checkout" if total == 0 => Err(Throwable::checked("org.acme.Empty", "empty cart")),
                "crash" => Err(Throwable::runtime("java.lang.IllegalStateException", "broken")),
                _ => Ok(Value::Null),
            }
        };
        let factory = StatefulFactory::new(
            BeanDeployment::new(metadata, class.encode(), body),
            &class,
            loader,
            services(),
        );
        factory.init().unwrap();
        factory.start().unwrap();
        factory
    }

    fn call(factory: &StatefulFactory, name: &str, desc: &str, args: Vec<Value>, id: Option<i64>) -> EjbResponse {
        let request = EjbRequest::new(method_hash(name, desc), args)
            .for_factory("c1", "Cart", CART)
            .with_bean_id(id);
        factory.local_call(&request)
    }

    #[test]
    fn test_first_call_creates_session() {
        let factory = factory();
        let first = call(&factory, "add", "(I)V", vec![Value::Int(3)], None);
        let id = first.bean_id.unwrap();
        call(&factory, "add", "(I)V", vec![Value::Int(4)], Some(id));
        let total = call(&factory, "total", "()I", vec![], Some(id));
        assert_eq!(total.value, Value::Int(7));
        assert_eq!(factory.session_count(), 1);
    }

    #[test]
    fn test_remove_method_ends_session() {
        let factory = factory();
        let id = call(&factory, "add", "(I)V", vec![Value::Int(1)], None).bean_id.unwrap();
        let done = call(&factory, "checkout", "()V", vec![], Some(id));
        assert!(done.removed);
        assert!(!done.is_error());

        let after = call(&factory, "total", "()I", vec![], Some(id));
        assert!(after.removed);
        let exception = after.rpc_exception.unwrap();
        assert!(exception.cause.is_instance_of(names::NO_SUCH_EJB));
    }

    #[test]
    fn test_retained_on_application_exception() {
        let factory = factory();
        let id = call(&factory, "total", "()I", vec![], None).bean_id.unwrap();
        let failed = call(&factory, "checkout", "()V", vec![], Some(id));
        assert!(failed.rpc_exception.as_ref().unwrap().application);
        assert!(!failed.removed);
        assert!(factory.has_session(id));
    }

    #[test]
    fn test_system_exception_ends_session() {
        let factory = factory();
        let id = call(&factory, "total", "()I", vec![], None).bean_id.unwrap();
        let failed = call(&factory, "crash", "()V", vec![], Some(id));
        assert!(failed.removed);
        assert!(!factory.has_session(id));
        assert_eq!(factory.pool().discarded, 1);
    }

    #[test]
    fn test_to_string_assigns_id() {
        let factory = factory();
        let response = call(
            &factory,
            "toString",
            "()Ljava/lang/String;",
            vec![],
            None,
        );
        let id = response.bean_id.unwrap();
        assert_eq!(response.value, Value::Str(format!("Cart_{}/c1@{}", CART, id)));
    }

    #[test]
    fn test_evict_idle_sessions() {
        let factory = factory();
        call(&factory, "total", "()I", vec![], None);
        assert_eq!(factory.evict_expired(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(601);
        assert_eq!(factory.evict_expired(later), 1);
        assert_eq!(factory.session_count(), 0);
    }

    #[test]
    fn test_timeout_unsupported() {
        let factory = factory();
        assert!(matches!(
            factory.notify_timeout(&TimerHandle::new(1, Value::Null)),
            Err(FactoryError::UnsupportedOperation(_))
        ));
    }
}
