//! Exception model
//!
//! A [`Throwable`] carries its class name together with its superclass chain
//! so that assignability checks ("is this a RuntimeException?", "is this
//! declared by the method?") work on both sides of the wire without a class
//! hierarchy at hand.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known exception class names
pub mod names {
    /// Root of the hierarchy
    pub const THROWABLE: &str = "java.lang.Throwable";
    /// Checked exception root
    pub const EXCEPTION: &str = "java.lang.Exception";
    /// Unchecked exception root
    pub const RUNTIME_EXCEPTION: &str = "java.lang.RuntimeException";
    /// Error root
    pub const ERROR: &str = "java.lang.Error";
    /// Linkage failures
    pub const LINKAGE_ERROR: &str = "java.lang.LinkageError";
    /// Class verification failure (also used for interpreter faults)
    pub const VERIFY_ERROR: &str = "java.lang.VerifyError";
    /// Object in the wrong state
    pub const ILLEGAL_STATE: &str = "java.lang.IllegalStateException";
    /// Bad argument
    pub const ILLEGAL_ARGUMENT: &str = "java.lang.IllegalArgumentException";
    /// Operation not supported
    pub const UNSUPPORTED_OPERATION: &str = "java.lang.UnsupportedOperationException";
    /// I/O failure
    pub const IO_EXCEPTION: &str = "java.io.IOException";

    /// Container system exception
    pub const EJB_EXCEPTION: &str = "javax.ejb.EJBException";
    /// Bean instance does not exist anymore
    pub const NO_SUCH_EJB: &str = "javax.ejb.NoSuchEJBException";
    /// Local-view variant of "no such object"
    pub const NO_SUCH_OBJECT_LOCAL: &str = "javax.ejb.NoSuchObjectLocalException";
    /// Caller not allowed to invoke the method
    pub const EJB_ACCESS: &str = "javax.ejb.EJBAccessException";
    /// Mandatory transaction missing
    pub const EJB_TRANSACTION_REQUIRED: &str = "javax.ejb.EJBTransactionRequiredException";
    /// Local-view variant of "transaction required"
    pub const TRANSACTION_REQUIRED_LOCAL: &str = "javax.ejb.TransactionRequiredLocalException";
    /// Transaction rolled back by the container
    pub const EJB_TRANSACTION_ROLLEDBACK: &str = "javax.ejb.EJBTransactionRolledbackException";
    /// EJB 2.1 removal failure
    pub const REMOVE_EXCEPTION: &str = "javax.ejb.RemoveException";
    /// EJB 2.1 creation failure
    pub const CREATE_EXCEPTION: &str = "javax.ejb.CreateException";

    /// Remote failure
    pub const REMOTE_EXCEPTION: &str = "java.rmi.RemoteException";
    /// Remote-view variant of "no such object"
    pub const NO_SUCH_OBJECT: &str = "java.rmi.NoSuchObjectException";
    /// Remote-view variant of "transaction required"
    pub const TRANSACTION_REQUIRED: &str = "javax.transaction.TransactionRequiredException";
}

use names::*;

/// Superclass chains of the exceptions the container itself raises
fn well_known_lineage(class_name: &str) -> Option<&'static [&'static str]> {
    const CHECKED: &[&str] = &[EXCEPTION, THROWABLE];
    const RUNTIME: &[&str] = &[RUNTIME_EXCEPTION, EXCEPTION, THROWABLE];
    const EJB: &[&str] = &[EJB_EXCEPTION, RUNTIME_EXCEPTION, EXCEPTION, THROWABLE];
    const REMOTE: &[&str] = &[REMOTE_EXCEPTION, IO_EXCEPTION, EXCEPTION, THROWABLE];

    let lineage: &'static [&'static str] = match class_name {
        THROWABLE => &[],
        EXCEPTION | ERROR => &[THROWABLE],
        RUNTIME_EXCEPTION | IO_EXCEPTION => CHECKED,
        LINKAGE_ERROR => &[ERROR, THROWABLE],
        VERIFY_ERROR => &[LINKAGE_ERROR, ERROR, THROWABLE],
        ILLEGAL_STATE | ILLEGAL_ARGUMENT | UNSUPPORTED_OPERATION | EJB_EXCEPTION => RUNTIME,
        NO_SUCH_EJB
        | NO_SUCH_OBJECT_LOCAL
        | EJB_ACCESS
        | EJB_TRANSACTION_REQUIRED
        | TRANSACTION_REQUIRED_LOCAL
        | EJB_TRANSACTION_ROLLEDBACK => EJB,
        REMOVE_EXCEPTION | CREATE_EXCEPTION => CHECKED,
        REMOTE_EXCEPTION => &[IO_EXCEPTION, EXCEPTION, THROWABLE],
        NO_SUCH_OBJECT | TRANSACTION_REQUIRED => REMOTE,
        _ => return None,
    };
    Some(lineage)
}

/// Broad category of a throwable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowableKind {
    /// Must be declared (`Exception` but not `RuntimeException`)
    Checked,
    /// Unchecked exception (`RuntimeException`)
    Runtime,
    /// `Error` or a bare `Throwable`
    Error,
}

/// An exception value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throwable {
    /// Fully qualified class name
    pub class_name: String,
    /// Superclasses, nearest first, ending with `java.lang.Throwable`
    pub superclasses: Vec<String>,
    /// Detail message
    #[serde(default)]
    pub message: Option<String>,
    /// Underlying cause
    #[serde(default)]
    pub cause: Option<Box<Throwable>>,
}

impl Throwable {
    /// Create a throwable with an explicit superclass chain
    pub fn new(
        class_name: impl Into<String>,
        superclasses: Vec<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            superclasses,
            message,
            cause: None,
        }
    }

    /// Create a well-known throwable; unknown classes are treated as checked
    pub fn of(class_name: &str, message: impl Into<String>) -> Self {
        let superclasses = well_known_lineage(class_name)
            .unwrap_or(&[EXCEPTION, THROWABLE])
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self::new(class_name, superclasses, Some(message.into()))
    }

    /// A checked exception directly extending `java.lang.Exception`
    pub fn checked(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            class_name,
            vec![EXCEPTION.to_string(), THROWABLE.to_string()],
            Some(message.into()),
        )
    }

    /// An unchecked exception directly extending `java.lang.RuntimeException`
    pub fn runtime(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            class_name,
            vec![
                RUNTIME_EXCEPTION.to_string(),
                EXCEPTION.to_string(),
                THROWABLE.to_string(),
            ],
            Some(message.into()),
        )
    }

    /// A throwable whose direct superclass is `parent`
    pub fn subclass_of(
        class_name: impl Into<String>,
        parent: &Throwable,
        message: impl Into<String>,
    ) -> Self {
        let mut superclasses = Vec::with_capacity(parent.superclasses.len() + 1);
        superclasses.push(parent.class_name.clone());
        superclasses.extend(parent.superclasses.iter().cloned());
        Self::new(class_name, superclasses, Some(message.into()))
    }

    /// `javax.ejb.EJBException`
    pub fn ejb_exception(message: impl Into<String>) -> Self {
        Self::of(EJB_EXCEPTION, message)
    }

    /// `java.lang.IllegalStateException`
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::of(ILLEGAL_STATE, message)
    }

    /// `javax.ejb.NoSuchEJBException`
    pub fn no_such_ejb(message: impl Into<String>) -> Self {
        Self::of(NO_SUCH_EJB, message)
    }

    /// `java.lang.VerifyError`
    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::of(VERIFY_ERROR, message)
    }

    /// Attach a cause
    pub fn with_cause(mut self, cause: Throwable) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The cause, if any
    pub fn cause(&self) -> Option<&Throwable> {
        self.cause.as_deref()
    }

    /// Whether this throwable is assignable to `class_name`
    pub fn is_instance_of(&self, class_name: &str) -> bool {
        self.class_name == class_name || self.superclasses.iter().any(|s| s == class_name)
    }

    /// Classify as checked, runtime or error
    pub fn kind(&self) -> ThrowableKind {
        if self.is_instance_of(RUNTIME_EXCEPTION) {
            ThrowableKind::Runtime
        } else if self.is_instance_of(EXCEPTION) {
            ThrowableKind::Checked
        } else {
            ThrowableKind::Error
        }
    }

    /// Shorthand for `kind() == Runtime`
    pub fn is_runtime(&self) -> bool {
        self.kind() == ThrowableKind::Runtime
    }

    /// Shorthand for `kind() == Checked`
    pub fn is_checked(&self) -> bool {
        self.kind() == ThrowableKind::Checked
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message),
            None => write!(f, "{}", self.class_name),
        }
    }
}

impl std::error::Error for Throwable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
