//! Invocation layer
//!
//! Everything a business call passes through between the proxy and the bean:
//! per-call state, interceptor chains, permission checks, transaction
//! demarcation and exception remapping.

pub mod context;
pub mod interceptor;
pub mod remap;
pub mod security;
pub mod transaction;

pub use context::{CallState, ContextData, OperationState};
pub use interceptor::{
    DynamicInterceptorManager, GlobalInterceptors, Interceptor, InterceptorManager,
    InvocationContext, InvocationContextFactory, InvocationTarget,
};
pub use remap::{remap, rethrow_from_proxy, transport_failure, RemapDecision, Remapped, ViewKind};
pub use security::{PermissionManager, PermitAll, RoleBasedPermissionManager};
pub use transaction::{
    demarcate, FailureKind, LocalTransactionManager, TransactionError, TransactionId,
    TransactionManager,
};
