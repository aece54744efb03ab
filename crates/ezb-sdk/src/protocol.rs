//! Request/response value objects and their JSON codec
//!
//! One [`EjbRequest`] is built per call by a proxy; the container answers
//! with one [`EjbResponse`]. The response always echoes the authoritative
//! bean id so a client learns the id of a freshly created stateful instance,
//! and carries the `removed` flag once that instance is gone.

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::throwable::Throwable;
use crate::value::Value;

/// Largest accepted encoded message
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Principal and roles of the calling client
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Principal name
    pub principal: String,
    /// Roles granted to the principal
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CallerIdentity {
    /// Create a caller with the given roles
    pub fn new(principal: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            principal: principal.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Whether the caller holds `role`
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A call from a proxy to a factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EjbRequest {
    /// Wire identifier of the method
    pub method_hash: i64,
    /// Arguments in declaration order
    pub args: Vec<Value>,
    /// Target container
    pub container_id: String,
    /// Target factory (bean name)
    pub factory_name: String,
    /// Stateful session id, if already assigned
    pub bean_id: Option<i64>,
    /// Interface the method was invoked through
    pub interface_name: String,
    /// Authenticated caller
    #[serde(default)]
    pub caller: Option<CallerIdentity>,
}

impl EjbRequest {
    /// Create a request without routing information
    pub fn new(method_hash: i64, args: Vec<Value>) -> Self {
        Self {
            method_hash,
            args,
            container_id: String::new(),
            factory_name: String::new(),
            bean_id: None,
            interface_name: String::new(),
            caller: None,
        }
    }

    /// Set routing information
    pub fn for_factory(
        mut self,
        container_id: impl Into<String>,
        factory_name: impl Into<String>,
        interface_name: impl Into<String>,
    ) -> Self {
        self.container_id = container_id.into();
        self.factory_name = factory_name.into();
        self.interface_name = interface_name.into();
        self
    }

    /// Set the bean id
    pub fn with_bean_id(mut self, bean_id: Option<i64>) -> Self {
        self.bean_id = bean_id;
        self
    }

    /// Set the caller
    pub fn with_caller(mut self, caller: Option<CallerIdentity>) -> Self {
        self.caller = caller;
        self
    }
}

/// Exception raised by a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcException {
    /// What was thrown
    pub cause: Throwable,
    /// Whether the container classified it as an application exception
    pub application: bool,
}

/// Result of a call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EjbResponse {
    /// Return value (null for void or on failure)
    pub value: Value,
    /// Authoritative bean id
    pub bean_id: Option<i64>,
    /// The bean instance is gone
    pub removed: bool,
    /// Failure, if any
    pub rpc_exception: Option<RpcException>,
}

impl EjbResponse {
    /// Successful response
    pub fn value(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Failed response
    pub fn exception(cause: Throwable, application: bool) -> Self {
        Self {
            rpc_exception: Some(RpcException { cause, application }),
            ..Self::default()
        }
    }

    /// Set the bean id
    pub fn with_bean_id(mut self, bean_id: Option<i64>) -> Self {
        self.bean_id = bean_id;
        self
    }

    /// Mark the bean as removed
    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }

    /// Whether the call failed
    pub fn is_error(&self) -> bool {
        self.rpc_exception.is_some()
    }
}

// ============================================================================
// Codec
// ============================================================================

fn check_size(size: usize) -> Result<(), WireError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(WireError::TooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Encode a request to JSON bytes
pub fn encode_request(request: &EjbRequest) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(request)?;
    check_size(bytes.len())?;
    Ok(bytes)
}

/// Decode a request from JSON bytes
pub fn decode_request(bytes: &[u8]) -> Result<EjbRequest, WireError> {
    check_size(bytes.len())?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a response to JSON bytes
pub fn encode_response(response: &EjbResponse) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(response)?;
    check_size(bytes.len())?;
    Ok(bytes)
}

/// Decode a response from JSON bytes
pub fn decode_response(bytes: &[u8]) -> Result<EjbResponse, WireError> {
    check_size(bytes.len())?;
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_caller_field_decodes() {
        let json = br#"{"method_hash":1,"args":[],"container_id":"c","factory_name":"f","bean_id":null,"interface_name":"i"}"#;
        let request = decode_request(json).unwrap();
        assert_eq!(request.caller, None);
        assert_eq!(request.factory_name, "f");
    }

    #[test]
    fn test_response_carries_exception() {
        let response = EjbResponse::exception(Throwable::no_such_ejb("gone"), false)
            .with_bean_id(Some(3))
            .removed();
        let bytes = encode_response(&response).unwrap();
        let back = decode_response(&bytes).unwrap();
        assert!(back.removed);
        assert_eq!(back.bean_id, Some(3));
        assert_eq!(
            back.rpc_exception.map(|e| e.cause.class_name),
            Some("javax.ejb.NoSuchEJBException".to_string())
        );
    }

    #[test]
    fn test_oversized_message_rejected() {
        let bytes = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode_request(&bytes),
            Err(WireError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_caller_roles() {
        let caller = CallerIdentity::new("alice", &["admin"]);
        assert!(caller.has_role("admin"));
        assert!(!caller.has_role("guest"));
    }
}
