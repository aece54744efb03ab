//! Exception remapping across the local/remote boundary
//!
//! [`remap`] is what a client proxy applies to an exception coming back from
//! a factory. [`rethrow_from_proxy`] is what generated no-interface code
//! applies to an exception coming out of its invocation handler.

use ezb_sdk::{names, Throwable};

/// Client view a proxy belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// In-process view
    Local,
    /// Remote view
    Remote,
}

impl ViewKind {
    /// `Local` or `Remote`, as used in naming
    pub fn label(self) -> &'static str {
        match self {
            ViewKind::Local => "Local",
            ViewKind::Remote => "Remote",
        }
    }
}

/// Which rule produced the remapped exception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapDecision {
    /// Delivered as thrown
    Unwrapped,
    /// Translated to the view's flavor of a container exception
    Remapped,
    /// Wrapped in an `EJBException`
    Wrapped,
}

/// Outcome of [`remap`]
#[derive(Debug, Clone, PartialEq)]
pub struct Remapped {
    /// What the client sees
    pub throwable: Throwable,
    /// Rule applied
    pub decision: RemapDecision,
}

fn translated(class_name: &str, cause: Throwable) -> Throwable {
    let message = cause.message.clone().unwrap_or_default();
    Throwable::of(class_name, message).with_cause(cause)
}

fn wrapped(cause: Throwable) -> Throwable {
    Throwable::ejb_exception(cause.to_string()).with_cause(cause)
}

/// Translate `thrown` for a client of `view`
///
/// Rules, first match wins:
///
/// 1. assignable to a declared exception: unwrapped
/// 2. `NoSuchEJBException` and `EJBTransactionRequiredException`: translated
///    to the remote or local flavor, keeping the original as cause
/// 3. any other `EJBException`: unwrapped
/// 4. runtime exception flagged as application exception: unwrapped
/// 5. other runtime exception: wrapped in `EJBException`
/// 6. anything else: wrapped in `EJBException`
pub fn remap(thrown: Throwable, declared: &[String], application: bool, view: ViewKind) -> Remapped {
    if declared.iter().any(|d| thrown.is_instance_of(d)) {
        return Remapped {
            throwable: thrown,
            decision: RemapDecision::Unwrapped,
        };
    }

    if thrown.is_instance_of(names::NO_SUCH_EJB) {
        let target = match view {
            ViewKind::Remote => names::NO_SUCH_OBJECT,
            ViewKind::Local => names::NO_SUCH_OBJECT_LOCAL,
        };
        return Remapped {
            throwable: translated(target, thrown),
            decision: RemapDecision::Remapped,
        };
    }
    if thrown.is_instance_of(names::EJB_TRANSACTION_REQUIRED) {
        let target = match view {
            ViewKind::Remote => names::TRANSACTION_REQUIRED,
            ViewKind::Local => names::TRANSACTION_REQUIRED_LOCAL,
        };
        return Remapped {
            throwable: translated(target, thrown),
            decision: RemapDecision::Remapped,
        };
    }

    if thrown.is_instance_of(names::EJB_EXCEPTION) || (thrown.is_runtime() && application) {
        return Remapped {
            throwable: thrown,
            decision: RemapDecision::Unwrapped,
        };
    }

    Remapped {
        throwable: wrapped(thrown),
        decision: RemapDecision::Wrapped,
    }
}

/// Exception seen by a client whose transport failed
pub fn transport_failure(message: impl Into<String>) -> Throwable {
    let message = message.into();
    Throwable::ejb_exception(format!("Transport failure: {}", message))
        .with_cause(Throwable::of(names::REMOTE_EXCEPTION, message))
}

/// Rethrow an invocation-handler failure from a forwarding method
///
/// Priority: a declared checked exception assignable from `cause` is thrown
/// as is, a runtime exception is thrown as is, another checked exception is
/// wrapped in `EJBException`, and anything else is wrapped in a
/// `RuntimeException` inside an `EJBException`.
pub fn rethrow_from_proxy(cause: Throwable, declared: &[String]) -> Throwable {
    if cause.is_checked() && declared.iter().any(|d| cause.is_instance_of(d)) {
        return cause;
    }
    if cause.is_runtime() {
        return cause;
    }
    if cause.is_checked() {
        return wrapped(cause);
    }
    let runtime = Throwable::of(names::RUNTIME_EXCEPTION, cause.to_string()).with_cause(cause);
    wrapped(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_declared_is_unwrapped() {
        let thrown = Throwable::checked("org.acme.CartFull", "full");
        let out = remap(thrown.clone(), &declared(&["org.acme.CartFull"]), true, ViewKind::Remote);
        assert_eq!(out.decision, RemapDecision::Unwrapped);
        assert_eq!(out.throwable, thrown);
    }

    #[test]
    fn test_no_such_ejb_per_view() {
        let thrown = Throwable::no_such_ejb("gone");
        let remote = remap(thrown.clone(), &[], false, ViewKind::Remote);
        assert_eq!(remote.throwable.class_name, names::NO_SUCH_OBJECT);
        assert_eq!(remote.throwable.cause(), Some(&thrown));

        let local = remap(thrown, &[], false, ViewKind::Local);
        assert_eq!(local.throwable.class_name, names::NO_SUCH_OBJECT_LOCAL);
        assert_eq!(local.decision, RemapDecision::Remapped);
    }

    #[test]
    fn test_transaction_required_per_view() {
        let thrown = Throwable::of(names::EJB_TRANSACTION_REQUIRED, "no tx");
        assert_eq!(
            remap(thrown.clone(), &[], false, ViewKind::Remote).throwable.class_name,
            names::TRANSACTION_REQUIRED
        );
        assert_eq!(
            remap(thrown, &[], false, ViewKind::Local).throwable.class_name,
            names::TRANSACTION_REQUIRED_LOCAL
        );
    }

    #[test]
    fn test_ejb_exception_and_application_runtime_unwrapped() {
        let ejb = Throwable::of(names::EJB_ACCESS, "denied");
        assert_eq!(remap(ejb, &[], false, ViewKind::Local).decision, RemapDecision::Unwrapped);

        let app = Throwable::runtime("org.acme.Rejected", "no");
        assert_eq!(remap(app, &[], true, ViewKind::Local).decision, RemapDecision::Unwrapped);
    }

    #[test]
    fn test_other_exceptions_wrapped() {
        let runtime = Throwable::runtime("java.lang.ArithmeticException", "/ by zero");
        let out = remap(runtime.clone(), &[], false, ViewKind::Local);
        assert_eq!(out.throwable.class_name, names::EJB_EXCEPTION);
        assert_eq!(out.throwable.cause(), Some(&runtime));

        let checked = Throwable::checked("org.acme.Undeclared", "x");
        assert_eq!(remap(checked, &[], true, ViewKind::Remote).decision, RemapDecision::Wrapped);
    }

    #[test]
    fn test_transport_failure_has_remote_cause() {
        let t = transport_failure("connection refused");
        assert_eq!(t.class_name, names::EJB_EXCEPTION);
        assert_eq!(t.cause().map(|c| c.class_name.as_str()), Some(names::REMOTE_EXCEPTION));
    }

    #[test]
    fn test_rethrow_priority() {
        let declared = declared(&["org.acme.Checked"]);
        let checked = Throwable::checked("org.acme.Checked", "c");
        assert_eq!(rethrow_from_proxy(checked.clone(), &declared), checked);

        let runtime = Throwable::runtime("org.acme.Boom", "r");
        assert_eq!(rethrow_from_proxy(runtime.clone(), &declared), runtime);

        let other = Throwable::checked("org.acme.Other", "o");
        assert_eq!(rethrow_from_proxy(other, &declared).class_name, names::EJB_EXCEPTION);

        let error = Throwable::verify_error("bad");
        let out = rethrow_from_proxy(error, &declared);
        assert_eq!(out.class_name, names::EJB_EXCEPTION);
        assert_eq!(out.cause().map(|c| c.class_name.as_str()), Some(names::RUNTIME_EXCEPTION));
    }
}
