//! Per-call state
//!
//! A [`CallState`] is created when a call enters a factory and dropped when
//! it leaves. It is passed explicitly down the pipeline; work started on
//! behalf of the call receives a copy through [`CallState::inherit`].

use ezb_sdk::{CallerIdentity, Value};
use rustc_hash::FxHashMap;

use super::remap::ViewKind;

/// What the container is doing with the bean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationState {
    /// Dependency injection
    DependencyInjection,
    /// Post-construct or pre-destroy callback
    LifecycleCallback,
    /// Business method
    #[default]
    BusinessMethod,
    /// Timeout callback
    Timeout,
    /// Message delivery
    MessageDelivery,
}

/// Context data shared by the interceptors of one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextData {
    entries: FxHashMap<String, Value>,
}

impl ContextData {
    /// Get an entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Set an entry, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State of one incoming call
#[derive(Debug, Clone)]
pub struct CallState {
    /// Current operation
    pub operation: OperationState,
    /// Interceptor context data
    pub context_data: ContextData,
    /// Authenticated caller
    pub caller: Option<CallerIdentity>,
    /// View the call came through (none for container-initiated calls)
    pub view: Option<ViewKind>,
    /// Set by the EJB 2.1 `remove` helper
    pub remove_requested: bool,
    /// Stateful session id
    pub bean_id: Option<i64>,
}

impl CallState {
    /// State of a business call
    pub fn business(caller: Option<CallerIdentity>, view: Option<ViewKind>) -> Self {
        Self {
            operation: OperationState::BusinessMethod,
            context_data: ContextData::default(),
            caller,
            view,
            remove_requested: false,
            bean_id: None,
        }
    }

    /// State of a container-initiated call
    pub fn container(operation: OperationState) -> Self {
        Self {
            operation,
            ..Self::business(None, None)
        }
    }

    /// Set the session id
    pub fn with_bean_id(mut self, bean_id: Option<i64>) -> Self {
        self.bean_id = bean_id;
        self
    }

    /// Copy handed to work started on behalf of this call
    ///
    /// The caller, view, operation and context data carry over; the remove
    /// request does not.
    pub fn inherit(&self) -> Self {
        Self {
            remove_requested: false,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherit_keeps_caller_and_data() {
        let mut state = CallState::business(
            Some(CallerIdentity::new("alice", &["admin"])),
            Some(ViewKind::Local),
        );
        state.context_data.insert("trace", Value::Str("abc".into()));
        state.remove_requested = true;

        let child = state.inherit();
        assert_eq!(child.caller, state.caller);
        assert_eq!(child.context_data.get("trace"), Some(&Value::Str("abc".into())));
        assert!(!child.remove_requested);
    }

    #[test]
    fn test_container_state_has_no_caller() {
        let state = CallState::container(OperationState::Timeout);
        assert_eq!(state.operation, OperationState::Timeout);
        assert!(state.caller.is_none());
        assert!(state.view.is_none());
    }
}
