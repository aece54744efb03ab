//! Opaque values carried across the invocation boundary
//!
//! Arguments and return values of business methods are [`Value`]s. The
//! variants mirror what a bean interface can exchange: primitives, strings,
//! binary blobs, lists and structured objects identified by class name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value exchanged between a client and a bean
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Null reference (also the result of void methods)
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Double precision float
    Double(f64),
    /// String
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list
    List(Vec<Value>),
    /// Structured object
    Object(ObjectValue),
}

/// A structured value with a class name and named fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectValue {
    /// Fully qualified class name
    pub class_name: String,
    /// Field values by name
    pub fields: BTreeMap<String, Value>,
}

impl ObjectValue {
    /// Create an object without fields
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Value {
    /// Build an object value
    pub fn object(object: ObjectValue) -> Self {
        Value::Object(object)
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i32
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as i64 (widening ints)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i as i64),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            Value::Long(l) => Some(*l as f64),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Name of the value's type, for diagnostics
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Str(_) => "java.lang.String",
            Value::Bytes(_) => "byte[]",
            Value::List(_) => "java.util.List",
            Value::Object(obj) => obj.class_name.as_str(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjectValue> for Value {
    fn from(obj: ObjectValue) -> Self {
        Value::Object(obj)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::Long(7).as_i32(), None);
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert!(Value::from(None::<i32>).is_null());
    }

    #[test]
    fn test_object_fields() {
        let obj = ObjectValue::new("org.acme.Point")
            .with_field("x", 1)
            .with_field("y", 2);
        let value = Value::from(obj);
        assert_eq!(value.type_name(), "org.acme.Point");
        assert_eq!(value.as_object().unwrap().field("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_json_shape_is_tagged() {
        let json = serde_json::to_string(&Value::Long(5)).unwrap();
        assert_eq!(json, r#"{"type":"Long","value":5}"#);
    }
}
