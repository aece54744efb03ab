//! Remote invocation handler

use std::fmt;
use std::sync::Arc;

use ezb_sdk::{
    decode_response, encode_request, EjbRequest, EjbResponse, MethodDescriptor, ProxyIdentity,
    Throwable, Value, WireError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::container::{EmbeddedManager, RpcDispatcher};
use crate::invocation::{transport_failure, ViewKind};

use super::handler::HandlerCore;
use super::proxy::InvocationHandler;

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request or response could not be encoded
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// The target server no longer exists
    #[error("Embedded server {0} is gone")]
    ServerGone(u32),

    /// The target cannot be reached
    #[error("Unreachable: {0}")]
    Unreachable(String),
}

/// Carries requests to a server and brings responses back
pub trait ClientRpc: Send + Sync {
    /// Send `request` and wait for the response
    fn send(&self, request: &EjbRequest) -> Result<EjbResponse, TransportError>;
}

/// Transport to a server of this process through the wire encoding
///
/// Requests are encoded, dispatched and decoded exactly as a network
/// transport would, without leaving the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackRpc {
    server_id: u32,
}

impl LoopbackRpc {
    /// Transport to server `server_id`
    pub fn new(server_id: u32) -> Self {
        Self { server_id }
    }
}

impl ClientRpc for LoopbackRpc {
    fn send(&self, request: &EjbRequest) -> Result<EjbResponse, TransportError> {
        let embedded = EmbeddedManager::get_embedded(self.server_id)
            .ok_or(TransportError::ServerGone(self.server_id))?;
        let bytes = encode_request(request)?;
        let reply = RpcDispatcher::dispatch(&embedded, &bytes)?;
        Ok(decode_response(&reply)?)
    }
}

/// Sends calls over a [`ClientRpc`]
///
/// The transport is not serialized; a handler read back must be bound
/// again with [`bind`](Self::bind).
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientRpcInvocationHandler {
    core: HandlerCore,
    #[serde(skip)]
    rpc: Option<Arc<dyn ClientRpc>>,
}

impl ClientRpcInvocationHandler {
    /// Create a handler sending over `rpc`
    pub fn new(core: HandlerCore, rpc: Arc<dyn ClientRpc>) -> Self {
        Self {
            core,
            rpc: Some(rpc),
        }
    }

    /// Attach a transport
    pub fn bind(&mut self, rpc: Arc<dyn ClientRpc>) {
        self.rpc = Some(rpc);
    }

    /// Whether a transport is attached
    pub fn is_bound(&self) -> bool {
        self.rpc.is_some()
    }

    /// Target and session state
    pub fn core(&self) -> &HandlerCore {
        &self.core
    }

    /// Target and session state, mutably
    pub fn core_mut(&mut self) -> &mut HandlerCore {
        &mut self.core
    }
}

impl InvocationHandler for ClientRpcInvocationHandler {
    fn invoke(&mut self, method: &MethodDescriptor, args: Vec<Value>) -> Result<Value, Throwable> {
        let rpc = self.rpc.clone();
        self.core.invoke_with(method, args, ViewKind::Remote, |request| {
            let rpc = rpc.ok_or_else(|| Throwable::illegal_state("Remote handler has no transport"))?;
            rpc.send(&request)
                .map_err(|e| transport_failure(e.to_string()))
        })
    }

    fn identity(&self) -> ProxyIdentity {
        self.core.identity()
    }
}

impl fmt::Debug for ClientRpcInvocationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRpcInvocationHandler")
            .field("core", &self.core)
            .field("bound", &self.rpc.is_some())
            .finish()
    }
}
