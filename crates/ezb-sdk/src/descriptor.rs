//! Type and method descriptors
//!
//! Methods are identified structurally by name plus a JVM-style descriptor
//! string, e.g. `add(II)I` or `greet(Ljava/lang/String;)Ljava/lang/String;`.
//! The same descriptors are used by the class format, by the method hash and
//! by client proxies, so both sides of the wire agree on identity.

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;
use crate::hash::method_hash;

/// Class owning `equals`, `hashCode` and `toString`
pub const OBJECT_CLASS: &str = "java.lang.Object";

/// A field, parameter or return type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDesc {
    /// `V`
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `Lpkg/Name;` (stored with dots)
    Object(String),
    /// `[T`
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Reference type by dotted class name
    pub fn object(class_name: impl Into<String>) -> Self {
        TypeDesc::Object(class_name.into())
    }

    /// `java.lang.String`
    pub fn string() -> Self {
        TypeDesc::Object("java.lang.String".to_string())
    }

    /// Render as descriptor string
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            TypeDesc::Void => out.push('V'),
            TypeDesc::Boolean => out.push('Z'),
            TypeDesc::Byte => out.push('B'),
            TypeDesc::Char => out.push('C'),
            TypeDesc::Short => out.push('S'),
            TypeDesc::Int => out.push('I'),
            TypeDesc::Long => out.push('J'),
            TypeDesc::Float => out.push('F'),
            TypeDesc::Double => out.push('D'),
            TypeDesc::Object(name) => {
                out.push('L');
                out.push_str(&name.replace('.', "/"));
                out.push(';');
            }
            TypeDesc::Array(inner) => {
                out.push('[');
                inner.write_descriptor(out);
            }
        }
    }

    /// Parse a complete field descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let (ty, rest) = Self::parse_prefix(descriptor, descriptor)?;
        if !rest.is_empty() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(ty)
    }

    /// Parse one type from the front of `input`, returning the remainder
    fn parse_prefix<'a>(input: &'a str, whole: &str) -> Result<(Self, &'a str), DescriptorError> {
        let mut chars = input.chars();
        let tag = chars
            .next()
            .ok_or_else(|| DescriptorError::UnexpectedEnd(whole.to_string()))?;
        let rest = chars.as_str();
        let ty = match tag {
            'V' => TypeDesc::Void,
            'Z' => TypeDesc::Boolean,
            'B' => TypeDesc::Byte,
            'C' => TypeDesc::Char,
            'S' => TypeDesc::Short,
            'I' => TypeDesc::Int,
            'J' => TypeDesc::Long,
            'F' => TypeDesc::Float,
            'D' => TypeDesc::Double,
            'L' => {
                let end = rest
                    .find(';')
                    .ok_or_else(|| DescriptorError::UnexpectedEnd(whole.to_string()))?;
                let name = rest[..end].replace('/', ".");
                return Ok((TypeDesc::Object(name), &rest[end + 1..]));
            }
            '[' => {
                let (inner, rest) = Self::parse_prefix(rest, whole)?;
                return Ok((TypeDesc::Array(Box::new(inner)), rest));
            }
            other => {
                return Err(DescriptorError::InvalidTag {
                    tag: other,
                    descriptor: whole.to_string(),
                })
            }
        };
        Ok((ty, rest))
    }

    /// Whether this is `void`
    pub fn is_void(&self) -> bool {
        matches!(self, TypeDesc::Void)
    }

    /// Whether values of this type are references (nullable)
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeDesc::Object(_) | TypeDesc::Array(_))
    }

    /// Class name for reference types
    pub fn class_name(&self) -> Option<&str> {
        match self {
            TypeDesc::Object(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Parse a method descriptor into parameter and return types
pub fn parse_method_descriptor(
    descriptor: &str,
) -> Result<(Vec<TypeDesc>, TypeDesc), DescriptorError> {
    let inner = descriptor
        .strip_prefix('(')
        .ok_or_else(|| DescriptorError::MalformedMethod(descriptor.to_string()))?;
    let close = inner
        .find(')')
        .ok_or_else(|| DescriptorError::MalformedMethod(descriptor.to_string()))?;

    let mut params = Vec::new();
    let mut rest = &inner[..close];
    while !rest.is_empty() {
        let (ty, remaining) = TypeDesc::parse_prefix(rest, descriptor)?;
        if ty.is_void() {
            return Err(DescriptorError::MalformedMethod(descriptor.to_string()));
        }
        params.push(ty);
        rest = remaining;
    }

    let return_type = TypeDesc::parse(&inner[close + 1..])?;
    Ok((params, return_type))
}

/// Render a method descriptor from parameter and return types
pub fn method_descriptor(params: &[TypeDesc], return_type: &TypeDesc) -> String {
    let mut out = String::from("(");
    for param in params {
        param.write_descriptor(&mut out);
    }
    out.push(')');
    return_type.write_descriptor(&mut out);
    out
}

/// A method as seen by a proxy: declaring type, signature, throws clause
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Interface or class declaring the method
    pub declaring_class: String,
    /// Method name
    pub name: String,
    /// Parameter types
    pub params: Vec<TypeDesc>,
    /// Return type
    pub return_type: TypeDesc,
    /// Declared exception class names
    pub exceptions: Vec<String>,
}

impl MethodDescriptor {
    /// Create a `void name()` method
    pub fn new(declaring_class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            name: name.into(),
            params: Vec::new(),
            return_type: TypeDesc::Void,
            exceptions: Vec::new(),
        }
    }

    /// Build from a descriptor string
    pub fn parse(
        declaring_class: impl Into<String>,
        name: impl Into<String>,
        descriptor: &str,
    ) -> Result<Self, DescriptorError> {
        let (params, return_type) = parse_method_descriptor(descriptor)?;
        Ok(Self {
            declaring_class: declaring_class.into(),
            name: name.into(),
            params,
            return_type,
            exceptions: Vec::new(),
        })
    }

    /// Set parameter types
    pub fn with_params(mut self, params: Vec<TypeDesc>) -> Self {
        self.params = params;
        self
    }

    /// Set return type
    pub fn returns(mut self, return_type: TypeDesc) -> Self {
        self.return_type = return_type;
        self
    }

    /// Add a declared exception
    pub fn throws(mut self, exception: impl Into<String>) -> Self {
        self.exceptions.push(exception.into());
        self
    }

    /// `java.lang.Object#equals(Object)`
    pub fn object_equals() -> Self {
        Self::new(OBJECT_CLASS, "equals")
            .with_params(vec![TypeDesc::object(OBJECT_CLASS)])
            .returns(TypeDesc::Boolean)
    }

    /// `java.lang.Object#hashCode()`
    pub fn object_hash_code() -> Self {
        Self::new(OBJECT_CLASS, "hashCode").returns(TypeDesc::Int)
    }

    /// `java.lang.Object#toString()`
    pub fn object_to_string() -> Self {
        Self::new(OBJECT_CLASS, "toString").returns(TypeDesc::string())
    }

    /// JVM-style descriptor, e.g. `(II)I`
    pub fn descriptor(&self) -> String {
        method_descriptor(&self.params, &self.return_type)
    }

    /// Stable structural hash of name and descriptor
    pub fn hash(&self) -> i64 {
        method_hash(&self.name, &self.descriptor())
    }

    /// Whether this method is declared by `java.lang.Object`
    pub fn is_object_method(&self) -> bool {
        self.declaring_class == OBJECT_CLASS
    }

    /// Same name and descriptor (declaring class ignored)
    pub fn same_signature(&self, other: &MethodDescriptor) -> bool {
        self.name == other.name && self.params == other.params && self.return_type == other.return_type
    }
}

/// A business, component or home interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// Fully qualified interface name
    pub name: String,
    /// Methods declared by the interface (including inherited ones)
    pub methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    /// Create an interface without methods
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method; its declaring class is set to this interface
    pub fn with_method(mut self, mut method: MethodDescriptor) -> Self {
        method.declaring_class = self.name.clone();
        self.methods.push(method);
        self
    }

    /// Find the first method with the given name and arity
    pub fn find(&self, name: &str, arity: usize) -> Option<&MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.params.len() == arity)
    }

    /// Find a method by name and descriptor
    pub fn find_exact(&self, name: &str, descriptor: &str) -> Option<&MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor() == descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_descriptor_rendering() {
        assert_eq!(TypeDesc::Int.descriptor(), "I");
        assert_eq!(TypeDesc::string().descriptor(), "Ljava/lang/String;");
        assert_eq!(
            TypeDesc::Array(Box::new(TypeDesc::Long)).descriptor(),
            "[J"
        );
    }

    #[test]
    fn test_parse_method_descriptor() {
        let (params, ret) = parse_method_descriptor("(ILjava/lang/String;[J)Z").unwrap();
        assert_eq!(
            params,
            vec![
                TypeDesc::Int,
                TypeDesc::string(),
                TypeDesc::Array(Box::new(TypeDesc::Long))
            ]
        );
        assert_eq!(ret, TypeDesc::Boolean);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_method_descriptor("II)V").is_err());
        assert!(parse_method_descriptor("(Q)V").is_err());
        assert!(parse_method_descriptor("(Ljava/lang/String)V").is_err());
        assert!(parse_method_descriptor("(V)V").is_err());
        assert!(TypeDesc::parse("II").is_err());
    }

    #[test]
    fn test_method_descriptor_parse_matches_render() {
        let m = MethodDescriptor::new("org.acme.Calc", "add")
            .with_params(vec![TypeDesc::Int, TypeDesc::Int])
            .returns(TypeDesc::Int);
        assert_eq!(m.descriptor(), "(II)I");
        let parsed = MethodDescriptor::parse("org.acme.Calc", "add", "(II)I").unwrap();
        assert!(parsed.same_signature(&m));
    }

    #[test]
    fn test_object_methods() {
        assert!(MethodDescriptor::object_to_string().is_object_method());
        assert_eq!(
            MethodDescriptor::object_equals().descriptor(),
            "(Ljava/lang/Object;)Z"
        );
    }

    #[test]
    fn test_interface_lookup() {
        let iface = InterfaceDescriptor::new("org.acme.Calc").with_method(
            MethodDescriptor::new("ignored", "add")
                .with_params(vec![TypeDesc::Int, TypeDesc::Int])
                .returns(TypeDesc::Int),
        );
        let m = iface.find("add", 2).unwrap();
        assert_eq!(m.declaring_class, "org.acme.Calc");
        assert!(iface.find("add", 1).is_none());
        assert!(iface.find_exact("add", "(II)I").is_some());
    }
}
