//! Bean class metadata
//!
//! Static description of a bean produced by deployment-time scanning and
//! consumed by the enhancer and the factories. Read-only once built.

use ezb_sdk::descriptor::parse_method_descriptor;
use ezb_sdk::{InterfaceDescriptor, Throwable};

use crate::enhancer::names;

/// Kind of bean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeanKind {
    /// Stateless session bean
    Stateless,
    /// Stateful session bean
    Stateful,
    /// Singleton session bean
    Singleton,
    /// Message-driven bean
    MessageDriven,
    /// Managed bean
    Managed,
    /// Any other enhanced class
    Plain,
}

impl BeanKind {
    /// Marker interface added by the enhancer
    pub fn marker_interface(self) -> &'static str {
        match self {
            BeanKind::Stateless => names::MARKER_STATELESS,
            BeanKind::Stateful => names::MARKER_STATEFUL,
            BeanKind::Singleton => names::MARKER_SINGLETON,
            BeanKind::MessageDriven => names::MARKER_MDB,
            BeanKind::Managed => names::MARKER_MANAGED,
            BeanKind::Plain => names::MARKER_BEAN,
        }
    }

    /// Stateless, stateful or singleton
    pub fn is_session(self) -> bool {
        matches!(
            self,
            BeanKind::Stateless | BeanKind::Stateful | BeanKind::Singleton
        )
    }

    /// Whether a factory can serve this kind
    pub fn has_factory(self) -> bool {
        !matches!(self, BeanKind::Managed | BeanKind::Plain)
    }

    /// Short label for logs and statistics
    pub fn label(self) -> &'static str {
        match self {
            BeanKind::Stateless => "stateless",
            BeanKind::Stateful => "stateful",
            BeanKind::Singleton => "singleton",
            BeanKind::MessageDriven => "message-driven",
            BeanKind::Managed => "managed",
            BeanKind::Plain => "plain",
        }
    }
}

/// Container-managed transaction attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionAttribute {
    /// Join the caller's transaction or start one
    #[default]
    Required,
    /// Always start a new transaction, suspending the caller's
    RequiresNew,
    /// Fail unless the caller has a transaction
    Mandatory,
    /// Run in the caller's transaction if any
    Supports,
    /// Suspend the caller's transaction
    NotSupported,
    /// Fail if the caller has a transaction
    Never,
}

/// Method-level security constraint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodSecurity {
    /// Anyone may call
    #[default]
    PermitAll,
    /// Nobody may call
    DenyAll,
    /// Callers holding one of the roles may call
    RolesAllowed(Vec<String>),
}

/// Per-method metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodMetadata {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// `@Timeout`
    pub timeout: bool,
    /// `@Remove`
    pub remove: bool,
    /// `@Remove(retainIfException = true)`
    pub retain_if_exception: bool,
    /// `@PostConstruct`
    pub post_construct: bool,
    /// `@PreDestroy`
    pub pre_destroy: bool,
    /// Transaction attribute
    pub transaction: TransactionAttribute,
    /// Security constraint
    pub security: MethodSecurity,
}

impl MethodMetadata {
    /// Metadata with defaults
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            ..Self::default()
        }
    }

    /// Flag as timeout method
    pub fn timeout(mut self) -> Self {
        self.timeout = true;
        self
    }

    /// Flag as remove method
    pub fn remove(mut self, retain_if_exception: bool) -> Self {
        self.remove = true;
        self.retain_if_exception = retain_if_exception;
        self
    }

    /// Flag as post-construct callback
    pub fn post_construct(mut self) -> Self {
        self.post_construct = true;
        self
    }

    /// Flag as pre-destroy callback
    pub fn pre_destroy(mut self) -> Self {
        self.pre_destroy = true;
        self
    }

    /// Set the transaction attribute
    pub fn transaction(mut self, attribute: TransactionAttribute) -> Self {
        self.transaction = attribute;
        self
    }

    /// Set the security constraint
    pub fn security(mut self, security: MethodSecurity) -> Self {
        self.security = security;
        self
    }

    /// Whether the method takes exactly one `javax.ejb.Timer`
    pub fn accepts_timer(&self) -> bool {
        match parse_method_descriptor(&self.descriptor) {
            Ok((params, _)) => {
                params.len() == 1 && params[0].class_name() == Some(names::TIMER_CLASS)
            }
            Err(_) => false,
        }
    }
}

/// Exception class flagged `@ApplicationException`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationExceptionMetadata {
    /// Exception class
    pub class_name: String,
    /// Whether throwing it marks the transaction for rollback
    pub rollback: bool,
}

/// EJB 2.1 home description
#[derive(Debug, Clone, PartialEq)]
pub struct HomeMetadata {
    /// Home interface
    pub home: InterfaceDescriptor,
    /// Component interface returned by `create*`
    pub component: InterfaceDescriptor,
}

/// Static description of a bean
#[derive(Debug, Clone, PartialEq)]
pub struct BeanClassMetadata {
    /// Bean name (factory name)
    pub ejb_name: String,
    /// Bean class name
    pub class_name: String,
    /// Kind
    pub kind: BeanKind,
    /// Superclasses, nearest first
    pub superclasses: Vec<String>,
    /// Local business interfaces
    pub local_interfaces: Vec<InterfaceDescriptor>,
    /// Remote business interfaces
    pub remote_interfaces: Vec<InterfaceDescriptor>,
    /// EJB 2.1 remote home
    pub home: Option<HomeMetadata>,
    /// EJB 2.1 local home
    pub local_home: Option<HomeMetadata>,
    /// Message listener interface (message-driven beans)
    pub message_listener: Option<InterfaceDescriptor>,
    /// Whether a no-interface view is exposed
    pub no_interface_view: bool,
    /// Run-as role
    pub run_as: Option<String>,
    /// Per-method metadata
    pub methods: Vec<MethodMetadata>,
    /// Application exceptions
    pub application_exceptions: Vec<ApplicationExceptionMetadata>,
}

impl BeanClassMetadata {
    /// Create metadata without interfaces or methods
    pub fn new(ejb_name: impl Into<String>, class_name: impl Into<String>, kind: BeanKind) -> Self {
        Self {
            ejb_name: ejb_name.into(),
            class_name: class_name.into(),
            kind,
            superclasses: vec![ezb_sdk::descriptor::OBJECT_CLASS.to_string()],
            local_interfaces: Vec::new(),
            remote_interfaces: Vec::new(),
            home: None,
            local_home: None,
            message_listener: None,
            no_interface_view: false,
            run_as: None,
            methods: Vec::new(),
            application_exceptions: Vec::new(),
        }
    }

    /// Add a local business interface
    pub fn with_local(mut self, interface: InterfaceDescriptor) -> Self {
        self.local_interfaces.push(interface);
        self
    }

    /// Add a remote business interface
    pub fn with_remote(mut self, interface: InterfaceDescriptor) -> Self {
        self.remote_interfaces.push(interface);
        self
    }

    /// Set the remote home
    pub fn with_home(mut self, home: InterfaceDescriptor, component: InterfaceDescriptor) -> Self {
        self.home = Some(HomeMetadata { home, component });
        self
    }

    /// Set the local home
    pub fn with_local_home(
        mut self,
        home: InterfaceDescriptor,
        component: InterfaceDescriptor,
    ) -> Self {
        self.local_home = Some(HomeMetadata { home, component });
        self
    }

    /// Set the message listener interface
    pub fn with_message_listener(mut self, interface: InterfaceDescriptor) -> Self {
        self.message_listener = Some(interface);
        self
    }

    /// Expose a no-interface view
    pub fn with_no_interface_view(mut self) -> Self {
        self.no_interface_view = true;
        self
    }

    /// Set the run-as role
    pub fn with_run_as(mut self, role: impl Into<String>) -> Self {
        self.run_as = Some(role.into());
        self
    }

    /// Add method metadata
    pub fn with_method(mut self, method: MethodMetadata) -> Self {
        self.methods.push(method);
        self
    }

    /// Add an application exception
    pub fn with_application_exception(mut self, class_name: impl Into<String>, rollback: bool) -> Self {
        self.application_exceptions.push(ApplicationExceptionMetadata {
            class_name: class_name.into(),
            rollback,
        });
        self
    }

    /// Method metadata by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodMetadata> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// First method flagged as timeout
    ///
    /// Several flagged methods are not rejected; the first one wins.
    pub fn timeout_method(&self) -> Option<&MethodMetadata> {
        self.methods.iter().find(|m| m.timeout)
    }

    /// Post-construct callbacks in declaration order
    pub fn post_construct_methods(&self) -> impl Iterator<Item = &MethodMetadata> {
        self.methods.iter().filter(|m| m.post_construct)
    }

    /// Pre-destroy callbacks in declaration order
    pub fn pre_destroy_methods(&self) -> impl Iterator<Item = &MethodMetadata> {
        self.methods.iter().filter(|m| m.pre_destroy)
    }

    /// Application exception entry matching `throwable` (most specific first)
    pub fn application_exception(&self, throwable: &Throwable) -> Option<&ApplicationExceptionMetadata> {
        let lineage = std::iter::once(&throwable.class_name).chain(throwable.superclasses.iter());
        for class_name in lineage {
            if let Some(entry) = self
                .application_exceptions
                .iter()
                .find(|a| &a.class_name == class_name)
            {
                return Some(entry);
            }
        }
        None
    }

    /// Whether the bean has an EJB 2.1 home of either flavor
    pub fn has_home(&self) -> bool {
        self.home.is_some() || self.local_home.is_some()
    }

    /// Every interface a client can call through: business, component and home
    pub fn client_interfaces(&self) -> impl Iterator<Item = &InterfaceDescriptor> {
        self.local_interfaces
            .iter()
            .chain(self.remote_interfaces.iter())
            .chain(self.home.iter().flat_map(|h| [&h.home, &h.component]))
            .chain(self.local_home.iter().flat_map(|h| [&h.home, &h.component]))
    }
}
