//! EZB Engine - an embeddable EJB 3 container
//!
//! This crate provides:
//! - [`classfile`]: the class format beans are deployed in, with its codec
//!   and verifier
//! - [`enhancer`]: deployment-time rewriting of bean classes
//! - [`runtime`]: the class loader and interpreter running enhanced classes
//! - [`invocation`]: interceptor chains, transactions, security and
//!   exception remapping
//! - [`factory`]: per-bean dispatchers for stateless, stateful, singleton
//!   and message-driven beans
//! - [`container`]: containers, embedded servers, naming and the server
//!   registry
//! - [`client`]: proxies and invocation handlers
//! - [`statistics`]: hierarchical call statistics
//!
//! # Usage
//!
//! ```ignore
//! use ezb_engine::{BeanDeployment, Embedded, EmbeddedConfig};
//!
//! let server = Embedded::new(EmbeddedConfig::default())?;
//! let container = server.create_container("orders")?;
//! container.deploy(BeanDeployment::new(metadata, class_bytes, body))?;
//! container.resolve()?;
//! server.start()?;
//!
//! let mut counter = server.lookup("Counter@org.acme.Counter@Local")?.local_proxy(None)?;
//! let next = counter.call("next", vec![])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod classfile;
pub mod client;
pub mod config;
pub mod container;
pub mod enhancer;
pub mod factory;
pub mod invocation;
pub mod metadata;
pub mod runtime;
pub mod statistics;

pub use client::{
    ClientRpc, ClientRpcInvocationHandler, HomeInvocationHandler, InvocationHandler,
    LocalCallInvocationHandler, LoopbackRpc, NoInterfaceView, Proxy,
};
pub use config::{ContainerConfig, EmbeddedConfig};
pub use container::{
    BeanReference, ContainerError, ContainerState, Embedded, EmbeddedManager, EzbContainer,
};
pub use enhancer::{Enhancer, EnhanceError};
pub use factory::{BeanDeployment, Factory, FactoryError, TimerHandle};
pub use invocation::{Interceptor, InvocationContext};
pub use metadata::{BeanClassMetadata, BeanKind, MethodMetadata};
pub use runtime::{BeanBody, BodyCall};
pub use statistics::StatisticComponent;
