//! Object instances, slots and bean bodies

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use ezb_sdk::{CallerIdentity, Throwable, TypeDesc, Value};

use super::loader::LoadedClass;

/// Shared reference to an instance
pub type ObjectRef = Arc<Instance>;

/// Container object stored in a field (factory, interceptor manager, ...)
pub type NativeRef = Arc<dyn Any + Send + Sync>;

/// A value on the operand stack or in a field
#[derive(Clone, Default)]
pub enum Slot {
    /// Null reference
    #[default]
    Null,
    /// Plain value
    Value(Value),
    /// Interpreted object
    Object(ObjectRef),
    /// Container-side object
    Native(NativeRef),
}

impl Slot {
    /// Wrap a value (`Value::Null` becomes `Slot::Null`)
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Slot::Null,
            other => Slot::Value(other),
        }
    }

    /// Wrap a container object
    pub fn native<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Slot::Native(object)
    }

    /// Zero value of a field type
    pub fn default_for(ty: &TypeDesc) -> Self {
        match ty {
            TypeDesc::Boolean => Slot::Value(Value::Bool(false)),
            TypeDesc::Byte | TypeDesc::Char | TypeDesc::Short | TypeDesc::Int => {
                Slot::Value(Value::Int(0))
            }
            TypeDesc::Long => Slot::Value(Value::Long(0)),
            TypeDesc::Float | TypeDesc::Double => Slot::Value(Value::Double(0.0)),
            TypeDesc::Void | TypeDesc::Object(_) | TypeDesc::Array(_) => Slot::Null,
        }
    }

    /// Null?
    pub fn is_null(&self) -> bool {
        matches!(self, Slot::Null)
    }

    /// Plain value, if any
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Interpreted object, if any
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Slot::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Container object of type `T`, if any
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Slot::Native(native) => native.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Convert to a value that can leave the interpreter
    pub fn into_value(self) -> Result<Value, Throwable> {
        match self {
            Slot::Null => Ok(Value::Null),
            Slot::Value(value) => Ok(value),
            Slot::Object(object) => Err(Throwable::verify_error(format!(
                "Reference to {} cannot leave the interpreter",
                object.class_name()
            ))),
            Slot::Native(_) => Err(Throwable::verify_error(
                "Container reference cannot leave the interpreter",
            )),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Null => write!(f, "null"),
            Slot::Value(value) => write!(f, "{:?}", value),
            Slot::Object(object) => write!(f, "<{}>", object.class_name()),
            Slot::Native(_) => write!(f, "<native>"),
        }
    }
}

/// A call dispatched to a bean body
pub struct BodyCall<'a> {
    /// Method name
    pub method: &'a str,
    /// Method descriptor
    pub descriptor: &'a str,
    /// Arguments
    pub args: Vec<Value>,
    /// Receiving instance (fields are readable and writable)
    pub instance: &'a Instance,
    /// Authenticated caller of the current invocation
    pub caller: Option<&'a CallerIdentity>,
}

impl BodyCall<'_> {
    /// Argument `index`, or null
    pub fn arg(&self, index: usize) -> &Value {
        const NULL: Value = Value::Null;
        self.args.get(index).unwrap_or(&NULL)
    }
}

/// Business logic of a bean
///
/// Methods of a bean class that carry no code are dispatched here.
pub trait BeanBody: Send + Sync {
    /// Run `call.method`
    fn invoke(&self, call: &mut BodyCall<'_>) -> Result<Value, Throwable>;
}

impl<F> BeanBody for F
where
    F: Fn(&mut BodyCall<'_>) -> Result<Value, Throwable> + Send + Sync,
{
    fn invoke(&self, call: &mut BodyCall<'_>) -> Result<Value, Throwable> {
        self(call)
    }
}

/// An instance of a loaded class
pub struct Instance {
    class: Arc<LoadedClass>,
    fields: Mutex<FxHashMap<String, Slot>>,
    body: Option<Arc<dyn BeanBody>>,
}

impl Instance {
    pub(crate) fn new(
        class: Arc<LoadedClass>,
        fields: FxHashMap<String, Slot>,
        body: Option<Arc<dyn BeanBody>>,
    ) -> Self {
        Self {
            class,
            fields: Mutex::new(fields),
            body,
        }
    }

    /// Class of this instance
    pub fn class(&self) -> &Arc<LoadedClass> {
        &self.class
    }

    /// Class name
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// Whether the instance's class is, extends or implements `name`
    pub fn is_instance_of(&self, name: &str) -> bool {
        self.class.is_assignable_to(name)
    }

    /// Bean body, if any
    pub fn body(&self) -> Option<&Arc<dyn BeanBody>> {
        self.body.as_ref()
    }

    /// Read a field (null if absent)
    pub fn field(&self, name: &str) -> Slot {
        self.fields.lock().get(name).cloned().unwrap_or_default()
    }

    /// Write a field
    pub fn set_field(&self, name: &str, value: Slot) {
        self.fields.lock().insert(name.to_string(), value);
    }

    /// Whether the field exists
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.lock().contains_key(name)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class_name())
            .field("fields", &*self.fields.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_defaults() {
        assert!(Slot::default_for(&TypeDesc::object("X")).is_null());
        assert_eq!(
            Slot::default_for(&TypeDesc::Long).as_value(),
            Some(&Value::Long(0))
        );
        assert_eq!(
            Slot::default_for(&TypeDesc::Boolean).as_value(),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_native_downcast() {
        let slot = Slot::native(Arc::new(42u32));
        assert_eq!(slot.downcast::<u32>().map(|v| *v), Some(42));
        assert!(slot.downcast::<String>().is_none());
        assert!(slot.into_value().is_err());
    }

    #[test]
    fn test_value_conversion() {
        assert!(Slot::from_value(Value::Null).is_null());
        assert_eq!(
            Slot::from_value(Value::Int(3)).into_value().unwrap(),
            Value::Int(3)
        );
    }
}
