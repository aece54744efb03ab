//! Names of everything the enhancer adds to a class

/// Marker of stateless session beans
pub const MARKER_STATELESS: &str = "org.ow2.easybeans.api.bean.EasyBeansSLSB";
/// Marker of stateful session beans
pub const MARKER_STATEFUL: &str = "org.ow2.easybeans.api.bean.EasyBeansSFSB";
/// Marker of singleton session beans
pub const MARKER_SINGLETON: &str = "org.ow2.easybeans.api.bean.EasyBeansSingletonSB";
/// Marker of message-driven beans
pub const MARKER_MDB: &str = "org.ow2.easybeans.api.bean.EasyBeansMDB";
/// Marker of managed beans
pub const MARKER_MANAGED: &str = "org.ow2.easybeans.api.bean.EasyBeansManagedBean";
/// Marker of other enhanced classes
pub const MARKER_BEAN: &str = "org.ow2.easybeans.api.bean.EasyBeansBean";
/// Marker of generated no-interface views
pub const MARKER_NO_INTERFACE: &str = "org.ow2.easybeans.api.bean.proxy.EasyBeansNoInterfaceProxyBean";

/// All bean markers
pub const MARKERS: [&str; 6] = [
    MARKER_STATELESS,
    MARKER_STATEFUL,
    MARKER_SINGLETON,
    MARKER_MDB,
    MARKER_MANAGED,
    MARKER_BEAN,
];

/// Factory reference
pub const FIELD_FACTORY: &str = "easyBeansFactory";
/// Interceptor manager reference
pub const FIELD_INTERCEPTOR_MANAGER: &str = "easyBeansInterceptorManager";
/// Invocation context factory reference
pub const FIELD_INVOCATION_CONTEXT_FACTORY: &str = "easyBeansInvocationContextFactory";
/// Dynamic interceptor manager reference
pub const FIELD_DYNAMIC_INTERCEPTOR_MANAGER: &str = "easyBeansDynamicInterceptorManager";
/// EJB context reference
pub const FIELD_CONTEXT: &str = "easyBeansContext";
/// Stateful session id
pub const FIELD_STATEFUL_ID: &str = "easyBeansStatefulID";
/// Stateful in-transaction flag
pub const FIELD_STATEFUL_IN_TRANSACTION: &str = "easyBeansStatefulInTransaction";
/// Stateful session timeout
pub const FIELD_STATEFUL_TIMEOUT: &str = "easyBeansStatefulTimeout";
/// Message-driven XA resource
pub const FIELD_XA_RESOURCE: &str = "easyBeansXAResource";
/// Handler of a no-interface view
pub const FIELD_INVOCATION_HANDLER: &str = "easyBeansInvocationHandler";

/// Type of the factory field
pub const FACTORY_CLASS: &str = "org.ow2.easybeans.api.Factory";
/// Class constructed by the constructor patch
pub const INTERCEPTOR_MANAGER_CLASS: &str = "org.ow2.easybeans.api.interceptor.EZBInterceptorManager";
/// Type of the invocation context factory field
pub const INVOCATION_CONTEXT_FACTORY_CLASS: &str = "org.ow2.easybeans.api.interceptor.EZBInvocationContextFactory";
/// Type of the dynamic interceptor manager field
pub const DYNAMIC_INTERCEPTOR_MANAGER_CLASS: &str = "org.ow2.easybeans.api.interceptor.EZBDynamicInterceptorManager";
/// Type of the context field
pub const CONTEXT_CLASS: &str = "javax.ejb.EJBContext";
/// Type of the XA resource field
pub const XA_RESOURCE_CLASS: &str = "javax.transaction.xa.XAResource";
/// Type of the handler field
pub const INVOCATION_HANDLER_CLASS: &str = "java.lang.reflect.InvocationHandler";
/// Boxed long (nullable session id)
pub const LONG_CLASS: &str = "java.lang.Long";
/// Timer passed to timeout methods
pub const TIMER_CLASS: &str = "javax.ejb.Timer";

/// Generated timeout dispatcher
pub const TIMEOUT_METHOD: &str = "timeoutCallByEasyBeans";
/// Descriptor of the timeout dispatcher
pub const TIMEOUT_DESCRIPTOR: &str = "(Ljavax/ejb/Timer;)V";
/// Generated cleanup method
pub const CLEANUP_METHOD: &str = "easyBeansCleanup";

/// Helper class servicing the EJB 2.1 surface
pub const EJB21_HELPER_CLASS: &str = "org.ow2.easybeans.container.session.EJB21Helper";
/// EJB 2.1 remote component interface
pub const EJB_OBJECT_CLASS: &str = "javax.ejb.EJBObject";
/// EJB 2.1 local component interface
pub const EJB_LOCAL_OBJECT_CLASS: &str = "javax.ejb.EJBLocalObject";

/// Suffix of generated no-interface view classes
pub const NO_INTERFACE_SUFFIX: &str = "$EasyBeansNoInterfaceView";

/// Getter and setter names for `field`
pub fn accessor_names(field: &str) -> (String, String) {
    let mut chars = field.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    (format!("get{}", capitalized), format!("set{}", capitalized))
}

/// Name of the no-interface view generated for `bean_class`
pub fn no_interface_view_name(bean_class: &str) -> String {
    format!("{}{}", bean_class, NO_INTERFACE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_names() {
        assert_eq!(
            accessor_names(FIELD_FACTORY),
            (
                "getEasyBeansFactory".to_string(),
                "setEasyBeansFactory".to_string()
            )
        );
    }

    #[test]
    fn test_view_name() {
        assert_eq!(
            no_interface_view_name("org.acme.CartBean"),
            "org.acme.CartBean$EasyBeansNoInterfaceView"
        );
    }
}
