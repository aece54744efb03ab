//! Class loading and execution
//!
//! [`BeanClassLoader`] holds the enhanced classes of a container,
//! [`Interpreter`] runs their code against [`Instance`]s, and [`Host`] is the
//! seam through which generated code reaches the container.

pub mod instance;
pub mod interpreter;
pub mod loader;

pub use instance::{BeanBody, BodyCall, Instance, NativeRef, ObjectRef, Slot};
pub use interpreter::{Host, Interpreter, MAX_CALL_DEPTH};
pub use loader::{BeanClassLoader, LoadError, LoadedClass, ResolvedMethod};
