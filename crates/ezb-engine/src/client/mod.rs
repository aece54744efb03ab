//! Client views
//!
//! A client talks to a bean through a [`Proxy`] over one of its
//! interfaces. The proxy hands every call to an [`InvocationHandler`]:
//!
//! - [`LocalCallInvocationHandler`] calls the factory in process
//! - [`ClientRpcInvocationHandler`] serializes the call over a [`ClientRpc`]
//! - [`HomeInvocationHandler`] implements an EJB 2.1 home
//!
//! Handlers are serializable. A deserialized local handler finds its
//! server again through the [`EmbeddedManager`](crate::container::EmbeddedManager)
//! registry; a remote one must be bound to a transport.

pub mod handler;
pub mod home;
pub mod local;
pub mod no_interface;
pub mod proxy;
pub mod remote;

pub use handler::HandlerCore;
pub use home::{ComponentHandler, HomeInvocationHandler, HomeTransport};
pub use local::LocalCallInvocationHandler;
pub use no_interface::NoInterfaceView;
pub use proxy::{InvocationHandler, Proxy};
pub use remote::{ClientRpc, ClientRpcInvocationHandler, LoopbackRpc, TransportError};
