//! Permission checks
//!
//! The permission manager is consulted before every business call. The
//! caller is passed explicitly; nothing is read from thread-local state.

use std::fmt;

use dashmap::DashMap;
use ezb_sdk::CallerIdentity;
use rustc_hash::FxHashMap;

use crate::metadata::{BeanClassMetadata, MethodSecurity};

use super::interceptor::InvocationContext;

/// Security decisions consumed by the invocation pipeline
pub trait PermissionManager: Send + Sync {
    /// Whether the call described by `ctx` may proceed
    ///
    /// `run_as_bean` is true when the bean declares a run-as role.
    fn check_security(&self, ctx: &InvocationContext<'_>, run_as_bean: bool) -> bool;

    /// Whether `caller` holds `role` for bean `ejb_name`
    ///
    /// With `in_run_as` the bean's run-as role counts as held.
    fn is_caller_in_role(
        &self,
        caller: Option<&CallerIdentity>,
        ejb_name: &str,
        role: &str,
        in_run_as: bool,
    ) -> bool;

    /// Called when a container deploys a bean
    fn register_bean(&self, _metadata: &BeanClassMetadata) {}

    /// Called when a container stops a bean
    fn unregister_bean(&self, _ejb_name: &str) {}
}

/// Allows everything
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

impl PermissionManager for PermitAll {
    fn check_security(&self, _ctx: &InvocationContext<'_>, _run_as_bean: bool) -> bool {
        true
    }

    fn is_caller_in_role(
        &self,
        caller: Option<&CallerIdentity>,
        _ejb_name: &str,
        role: &str,
        _in_run_as: bool,
    ) -> bool {
        caller.map(|c| c.has_role(role)).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
struct BeanPolicy {
    run_as: Option<String>,
    methods: FxHashMap<(String, String), MethodSecurity>,
}

/// Role-based checks driven by bean metadata
///
/// Methods without an entry are open to everyone.
#[derive(Default)]
pub struct RoleBasedPermissionManager {
    beans: DashMap<String, BeanPolicy>,
}

impl RoleBasedPermissionManager {
    /// Create a manager without policies
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the method constraints of a bean
    pub fn add_policy(&self, metadata: &BeanClassMetadata) {
        let methods = metadata
            .methods
            .iter()
            .filter(|m| m.security != MethodSecurity::PermitAll)
            .map(|m| ((m.name.clone(), m.descriptor.clone()), m.security.clone()))
            .collect();
        self.beans.insert(
            metadata.ejb_name.clone(),
            BeanPolicy {
                run_as: metadata.run_as.clone(),
                methods,
            },
        );
    }

    /// Forget a bean
    pub fn remove_policy(&self, ejb_name: &str) {
        self.beans.remove(ejb_name);
    }

    fn constraint(&self, ejb_name: &str, method: &str, descriptor: &str) -> MethodSecurity {
        self.beans
            .get(ejb_name)
            .and_then(|p| {
                p.methods
                    .get(&(method.to_string(), descriptor.to_string()))
                    .cloned()
            })
            .unwrap_or_default()
    }

    fn run_as_role(&self, ejb_name: &str) -> Option<String> {
        self.beans.get(ejb_name).and_then(|p| p.run_as.clone())
    }
}

impl PermissionManager for RoleBasedPermissionManager {
    fn check_security(&self, ctx: &InvocationContext<'_>, run_as_bean: bool) -> bool {
        match self.constraint(ctx.bean_name(), ctx.method_name(), ctx.descriptor()) {
            MethodSecurity::PermitAll => true,
            MethodSecurity::DenyAll => false,
            MethodSecurity::RolesAllowed(roles) => roles.iter().any(|role| {
                self.is_caller_in_role(ctx.caller(), ctx.bean_name(), role, run_as_bean)
            }),
        }
    }

    fn is_caller_in_role(
        &self,
        caller: Option<&CallerIdentity>,
        ejb_name: &str,
        role: &str,
        in_run_as: bool,
    ) -> bool {
        if in_run_as && self.run_as_role(ejb_name).as_deref() == Some(role) {
            return true;
        }
        caller.map(|c| c.has_role(role)).unwrap_or(false)
    }

    fn register_bean(&self, metadata: &BeanClassMetadata) {
        self.add_policy(metadata);
    }

    fn unregister_bean(&self, ejb_name: &str) {
        self.remove_policy(ejb_name);
    }
}

impl fmt::Debug for RoleBasedPermissionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleBasedPermissionManager")
            .field("beans", &self.beans.len())
            .finish()
    }
}
