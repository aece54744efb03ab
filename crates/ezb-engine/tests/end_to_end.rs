//! End-to-end tests: deploy beans into an embedded server and call them
//! through client proxies

use std::sync::Arc;

use ezb_engine::classfile::{ClassFile, MethodDef};
use ezb_engine::client::{
    ClientRpcInvocationHandler, HandlerCore, InvocationHandler, LocalCallInvocationHandler,
    LoopbackRpc, Proxy,
};
use ezb_engine::container::{Embedded, EzbContainer};
use ezb_engine::invocation::{Interceptor, InvocationContext, RoleBasedPermissionManager};
use ezb_engine::metadata::MethodSecurity;
use ezb_engine::statistics::FACTORY_CALL_COUNT;
use ezb_engine::{BeanClassMetadata, BeanDeployment, BeanKind, BodyCall, EmbeddedConfig, MethodMetadata};
use ezb_sdk::identity::HANDLE_CLASS;
use ezb_sdk::{names, CallerIdentity, InterfaceDescriptor, MethodDescriptor, Throwable, TypeDesc, Value};
use parking_lot::Mutex;

const LIMIT_EXCEPTION: &str = "org.acme.LimitException";

fn bean_class(name: &str, methods: &[(&str, &str)]) -> ClassFile {
    let mut class = ClassFile::new(name);
    class
        .methods
        .push(MethodDef::default_constructor("java.lang.Object"));
    for (method, descriptor) in methods {
        class
            .methods
            .push(MethodDef::from_descriptor(*method, descriptor).unwrap());
    }
    class
}

fn int_field(call: &BodyCall<'_>, name: &str) -> i64 {
    call.instance
        .field(name)
        .as_value()
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn set_int_field(call: &BodyCall<'_>, name: &str, value: i64) {
    call.instance
        .set_field(name, ezb_engine::runtime::Slot::Value(Value::Long(value)));
}

fn cart() -> BeanDeployment {
    let interface = |name: &str| {
        InterfaceDescriptor::new(name)
            .with_method(MethodDescriptor::new("", "add").with_params(vec![TypeDesc::Int]))
            .with_method(MethodDescriptor::new("", "total").returns(TypeDesc::Int))
            .with_method(MethodDescriptor::new("", "checkout").returns(TypeDesc::Int))
    };
    let metadata = BeanClassMetadata::new("Cart", "org.acme.CartBean", BeanKind::Stateful)
        .with_local(interface("org.acme.Cart"))
        .with_remote(interface("org.acme.CartRemote"))
        .with_method(MethodMetadata::new("checkout", "()I").remove(false));
    let class = bean_class(
        "org.acme.CartBean",
        &[("add", "(I)V"), ("total", "()I"), ("checkout", "()I")],
    );
    let body = |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
        match call.method {
            "add" => {
                let amount = call.arg(0).as_i64().unwrap_or(0);
                let total = int_field(call, "total") + amount;
                set_int_field(call, "total", total);
                Ok(Value::Null)
            }
            _ => Ok(Value::Int(int_field(call, "total") as i32)),
        }
    };
    BeanDeployment::new(metadata, class.encode(), body)
}

fn counter(calls: Arc<Mutex<Vec<String>>>) -> BeanDeployment {
    let interface = |name: &str| {
        InterfaceDescriptor::new(name)
            .with_method(MethodDescriptor::new("", "next").returns(TypeDesc::Int))
            .with_method(
                MethodDescriptor::new("", "limit")
                    .with_params(vec![TypeDesc::Int])
                    .throws(LIMIT_EXCEPTION),
            )
            .with_method(MethodDescriptor::new("", "crash"))
            .with_method(MethodDescriptor::new("", "reset"))
    };
    let metadata = BeanClassMetadata::new("Counter", "org.acme.CounterBean", BeanKind::Stateless)
        .with_local(interface("org.acme.Counter"))
        .with_remote(interface("org.acme.CounterRemote"))
        .with_method(
            MethodMetadata::new("reset", "()V")
                .security(MethodSecurity::RolesAllowed(vec!["admin".into()])),
        );
    let class = bean_class(
        "org.acme.CounterBean",
        &[("next", "()I"), ("limit", "(I)V"), ("crash", "()V"), ("reset", "()V")],
    );
    let body = move |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
        calls.lock().push(call.method.to_string());
        match call.method {
            "next" => {
                let next = int_field(call, "count") + 1;
                set_int_field(call, "count", next);
                Ok(Value::Int(next as i32))
            }
            "limit" => Err(Throwable::checked(LIMIT_EXCEPTION, "over the limit")),
            "crash" => Err(Throwable::runtime("java.lang.ArithmeticException", "/ by zero")),
            _ => {
                set_int_field(call, "count", 0);
                Ok(Value::Null)
            }
        }
    };
    BeanDeployment::new(metadata, class.encode(), body)
}

fn wallet() -> BeanDeployment {
    let home = InterfaceDescriptor::new("org.acme.WalletHome")
        .with_method(MethodDescriptor::new("", "create").returns(TypeDesc::object("org.acme.Wallet")))
        .with_method(
            MethodDescriptor::new("", "remove")
                .with_params(vec![TypeDesc::object(HANDLE_CLASS)])
                .throws(names::REMOVE_EXCEPTION),
        );
    let component = InterfaceDescriptor::new("org.acme.Wallet")
        .with_method(MethodDescriptor::new("", "deposit").with_params(vec![TypeDesc::Int]))
        .with_method(MethodDescriptor::new("", "balance").returns(TypeDesc::Int));
    let metadata = BeanClassMetadata::new("Wallet", "org.acme.WalletBean", BeanKind::Stateful)
        .with_local_home(home, component);
    let class = bean_class("org.acme.WalletBean", &[("deposit", "(I)V"), ("balance", "()I")]);
    let body = |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
        match call.method {
            "deposit" => {
                let balance = int_field(call, "balance") + call.arg(0).as_i64().unwrap_or(0);
                set_int_field(call, "balance", balance);
                Ok(Value::Null)
            }
            _ => Ok(Value::Int(int_field(call, "balance") as i32)),
        }
    };
    BeanDeployment::new(metadata, class.encode(), body)
}

fn greeter() -> BeanDeployment {
    let metadata = BeanClassMetadata::new("Greeter", "org.acme.GreeterBean", BeanKind::Stateless)
        .with_no_interface_view();
    let class = bean_class(
        "org.acme.GreeterBean",
        &[("greet", "(Ljava/lang/String;)Ljava/lang/String;")],
    );
    let body = |call: &mut BodyCall<'_>| -> Result<Value, Throwable> {
        let name = call.arg(0).as_str().unwrap_or("nobody");
        Ok(Value::Str(format!("Hello, {}", name)))
    };
    BeanDeployment::new(metadata, class.encode(), body)
}

struct Server {
    embedded: Arc<Embedded>,
    container: Arc<EzbContainer>,
    calls: Arc<Mutex<Vec<String>>>,
}

fn server() -> Server {
    let permissions = Arc::new(RoleBasedPermissionManager::new());
    let embedded = Embedded::builder(EmbeddedConfig::default())
        .permission_manager(permissions)
        .build()
        .unwrap();
    let container = embedded.create_container("shop").unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    container.deploy(cart()).unwrap();
    container.deploy(counter(calls.clone())).unwrap();
    container.deploy(wallet()).unwrap();
    container.deploy(greeter()).unwrap();
    container.resolve().unwrap();
    embedded.start().unwrap();
    Server {
        embedded,
        container,
        calls,
    }
}

fn local(server: &Server, name: &str) -> Proxy<LocalCallInvocationHandler> {
    server
        .embedded
        .lookup(name)
        .unwrap()
        .local_proxy(None)
        .unwrap()
}

#[test]
fn test_stateful_session_lifecycle() {
    let server = server();
    let mut cart = local(&server, "Cart@org.acme.Cart@Local");
    assert_eq!(cart.handler().core().bean_id, None);

    // The first identity call creates the session on the server.
    let text = cart.object_to_string().unwrap();
    let id = cart.handler().core().bean_id.unwrap();
    assert_eq!(text, format!("Cart_org.acme.Cart/shop@{}", id));
    assert!(server.container.stateful("Cart").unwrap().has_session(id));

    cart.call("add", vec![Value::Int(3)]).unwrap();
    cart.call("add", vec![Value::Int(4)]).unwrap();
    assert_eq!(cart.handler().core().bean_id, Some(id));
    assert_eq!(cart.call("total", vec![]).unwrap(), Value::Int(7));

    assert_eq!(cart.call("checkout", vec![]).unwrap(), Value::Int(7));
    assert!(cart.handler().core().removed);
    assert!(!server.container.stateful("Cart").unwrap().has_session(id));

    let err = cart.call("total", vec![]).unwrap_err();
    assert!(err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));
    let err = cart.object_to_string().unwrap_err();
    assert!(err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));
}

#[test]
fn test_sessions_are_isolated() {
    let server = server();
    let mut first = local(&server, "Cart@org.acme.Cart@Local");
    let mut second = local(&server, "Cart@org.acme.Cart@Local");
    first.call("add", vec![Value::Int(10)]).unwrap();
    second.call("add", vec![Value::Int(1)]).unwrap();
    assert_eq!(first.call("total", vec![]).unwrap(), Value::Int(10));
    assert_eq!(second.call("total", vec![]).unwrap(), Value::Int(1));

    let first_handle = first.to_value();
    assert!(!second.object_equals(&first_handle).unwrap());
    assert!(first.object_equals(&first_handle).unwrap());
}

#[test]
fn test_stateless_exceptions() {
    let server = server();
    let mut counter = local(&server, "Counter@org.acme.Counter@Local");
    assert_eq!(counter.call("next", vec![]).unwrap(), Value::Int(1));

    let err = counter.call("limit", vec![Value::Int(5)]).unwrap_err();
    assert!(err.is_instance_of(LIMIT_EXCEPTION));
    let factory = server.container.factory("Counter").unwrap();
    assert_eq!(factory.pool().discarded, 0);

    let err = counter.call("crash", vec![]).unwrap_err();
    assert!(err.is_instance_of(names::EJB_EXCEPTION));
    assert_eq!(factory.pool().discarded, 1);

    // The discarded instance took its count with it.
    assert_eq!(counter.call("next", vec![]).unwrap(), Value::Int(1));
}

#[test]
fn test_permissions() {
    let server = server();
    let mut anonymous = local(&server, "Counter@org.acme.Counter@Local");
    let err = anonymous.call("reset", vec![]).unwrap_err();
    assert!(err.is_instance_of(names::EJB_ACCESS));
    assert!(!server.calls.lock().contains(&"reset".to_string()));

    let admin = CallerIdentity::new("root", &["admin"]);
    let mut privileged = server
        .embedded
        .lookup("Counter@org.acme.Counter@Local")
        .unwrap()
        .local_proxy(Some(admin))
        .unwrap();
    privileged.call("reset", vec![]).unwrap();
    assert!(server.calls.lock().contains(&"reset".to_string()));
}

#[test]
fn test_remote_view_over_loopback() {
    let server = server();
    let reference = server.embedded.lookup("Counter@org.acme.CounterRemote@Remote").unwrap();
    let mut counter = reference
        .remote_proxy(Arc::new(LoopbackRpc::new(server.embedded.id())), None)
        .unwrap();
    assert_eq!(counter.call("next", vec![]).unwrap(), Value::Int(1));
    let err = counter.call("limit", vec![Value::Int(1)]).unwrap_err();
    assert!(err.is_instance_of(LIMIT_EXCEPTION));
    assert_eq!(
        counter.object_to_string().unwrap(),
        "Counter_org.acme.CounterRemote/shop"
    );
}

#[test]
fn test_removed_stateful_bean_over_loopback() {
    let server = server();
    let rpc = Arc::new(LoopbackRpc::new(server.embedded.id()));
    let reference = server.embedded.lookup("Cart@org.acme.CartRemote@Remote").unwrap();
    let mut cart = reference.remote_proxy(rpc.clone(), None).unwrap();
    cart.call("add", vec![Value::Int(2)]).unwrap();
    let id = cart.handler().core().bean_id.unwrap();
    assert_eq!(cart.call("checkout", vec![]).unwrap(), Value::Int(2));
    assert!(cart.handler().core().removed);
    assert!(!server.container.stateful("Cart").unwrap().has_session(id));

    let err = cart.call("total", vec![]).unwrap_err();
    assert!(err.is_instance_of(names::NO_SUCH_OBJECT));

    // A second proxy on the same session still reaches the server.
    let core = HandlerCore::new("shop", "Cart", "org.acme.CartRemote", true).with_bean_id(Some(id));
    let mut stale = Proxy::new(
        reference.interface.clone(),
        ClientRpcInvocationHandler::new(core, rpc),
    );
    let err = stale.call("add", vec![Value::Int(1)]).unwrap_err();
    assert!(err.is_instance_of(names::NO_SUCH_OBJECT));
    assert!(!err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));
}

#[test]
fn test_local_home_creates_and_removes() {
    let server = server();
    let mut home = server
        .embedded
        .lookup("Wallet@LocalHome")
        .unwrap()
        .home_proxy(None, None)
        .unwrap();
    let mut wallet = home.create("create", vec![]).unwrap();
    let id = wallet.handler().core().bean_id.unwrap();
    wallet.call("deposit", vec![Value::Int(5)]).unwrap();
    assert_eq!(wallet.call("balance", vec![]).unwrap(), Value::Int(5));

    home.call("remove", vec![wallet.to_value()]).unwrap();
    assert!(!server.container.stateful("Wallet").unwrap().has_session(id));
    let err = wallet.call("balance", vec![]).unwrap_err();
    assert!(err.is_instance_of(names::NO_SUCH_OBJECT_LOCAL));
}

#[test]
fn test_no_interface_view() {
    let server = server();
    let view = server.embedded.no_interface_view("Greeter@NoInterface").unwrap();
    assert_eq!(
        view.call("greet", vec![Value::Str("Ada".into())]).unwrap(),
        Value::Str("Hello, Ada".into())
    );
    assert_eq!(view.identity().factory_name, "Greeter");
}

#[test]
fn test_serialized_handler_reattaches() {
    let server = server();
    let counter = local(&server, "Counter@org.acme.Counter@Local");
    let (interface, handler) = counter.into_parts();
    let json = serde_json::to_string(&handler).unwrap();

    let restored: LocalCallInvocationHandler = serde_json::from_str(&json).unwrap();
    let mut restored = Proxy::new(interface.clone(), restored);
    assert_eq!(restored.call("next", vec![]).unwrap(), Value::Int(1));

    let Server { embedded, container, .. } = server;
    embedded.stop();
    drop(container);
    drop(embedded);

    let orphan: LocalCallInvocationHandler = serde_json::from_str(&json).unwrap();
    let mut orphan = Proxy::new(interface, orphan);
    let err = orphan.call("next", vec![]).unwrap_err();
    assert!(err.is_instance_of(names::ILLEGAL_STATE));
}

#[test]
fn test_handler_rebuilt_from_parts() {
    let server = server();
    let core = HandlerCore::new("shop", "Counter", "org.acme.Counter", false);
    let mut handler = LocalCallInvocationHandler::new(server.embedded.id(), core);
    let next = MethodDescriptor::new("org.acme.Counter", "next").returns(TypeDesc::Int);
    assert_eq!(handler.invoke(&next, vec![]).unwrap(), Value::Int(1));
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Interceptor for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn around_invoke(&self, ctx: &mut InvocationContext<'_>) -> Result<Value, Throwable> {
        self.log.lock().push(self.name);
        ctx.proceed()
    }
}

#[test]
fn test_interceptor_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = |name| {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    };

    let embedded = Embedded::new(EmbeddedConfig::default()).unwrap();
    let container = embedded.create_container("shop").unwrap();
    container
        .deploy(counter(Arc::default()).with_interceptor(recorder("bean")))
        .unwrap();
    container.resolve().unwrap();
    container.add_global_interceptor(recorder("global"));
    container.dynamic_interceptors().add(recorder("dynamic"));
    embedded.start().unwrap();

    let mut counter = embedded
        .lookup("Counter@org.acme.Counter@Local")
        .unwrap()
        .local_proxy(None)
        .unwrap();
    counter.call("next", vec![]).unwrap();
    assert_eq!(*log.lock(), vec!["global", "bean", "dynamic"]);

    assert_eq!(container.remove_global_interceptor("global"), 1);
    log.lock().clear();
    counter.call("next", vec![]).unwrap();
    assert_eq!(*log.lock(), vec!["bean", "dynamic"]);
}

#[test]
fn test_calls_are_counted() {
    let server = server();
    let mut counter = local(&server, "Counter@org.acme.Counter@Local");
    counter.call("next", vec![]).unwrap();
    counter.call("next", vec![]).unwrap();
    let _ = counter.call("crash", vec![]);

    let statistics = server.embedded.statistics().unwrap();
    let bean = statistics.statistic(FACTORY_CALL_COUNT, "ezb/shop/Counter").unwrap();
    assert_eq!(bean.value.as_u64(), 3);
    let container = statistics.statistic(FACTORY_CALL_COUNT, "ezb/shop").unwrap();
    assert_eq!(container.value.as_u64(), 3);
}

#[test]
fn test_stop_unbinds_views() {
    let server = server();
    assert!(server.embedded.lookup("Cart@org.acme.Cart@Local").is_ok());
    server.embedded.stop();
    assert!(server.embedded.lookup("Cart@org.acme.Cart@Local").is_err());
    assert!(server.embedded.naming().names().is_empty());
}
