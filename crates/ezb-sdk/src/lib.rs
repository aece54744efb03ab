//! EZB SDK - wire types shared by bean clients and containers
//!
//! This crate holds everything a client needs to talk to a container without
//! depending on the full `ezb-engine`:
//!
//! - [`Value`]: opaque argument/return values carried across the boundary
//! - [`Throwable`]: the exception model (class name, superclass chain, cause)
//! - [`TypeDesc`] / [`MethodDescriptor`]: JVM-style type and method descriptors
//! - [`method_hash`]: the stable per-method hash used as wire identifier
//! - [`EjbRequest`] / [`EjbResponse`]: request/response value objects and codec
//! - [`ProxyIdentity`] / [`EjbMetaData`]: proxy identity, handles and metadata
//!
//! # Example
//!
//! ```ignore
//! use ezb_sdk::{method_hash, EjbRequest, MethodDescriptor, TypeDesc, Value};
//!
//! let method = MethodDescriptor::new("org.acme.Calculator", "add")
//!     .with_params(vec![TypeDesc::Int, TypeDesc::Int])
//!     .returns(TypeDesc::Int);
//! let request = EjbRequest::new(method.hash(), vec![Value::Int(1), Value::Int(2)])
//!     .for_factory("container-1", "CalculatorBean", "org.acme.Calculator");
//! ```

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod hash;
pub mod identity;
pub mod protocol;
pub mod throwable;
pub mod value;

pub use descriptor::{InterfaceDescriptor, MethodDescriptor, TypeDesc};
pub use error::{DescriptorError, WireError};
pub use hash::method_hash;
pub use identity::{EjbMetaData, ProxyIdentity};
pub use protocol::{
    decode_request, decode_response, encode_request, encode_response, CallerIdentity,
    EjbRequest, EjbResponse, RpcException,
};
pub use throwable::{names, Throwable, ThrowableKind};
pub use value::{ObjectValue, Value};
