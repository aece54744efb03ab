//! Class file structure and binary encoding
//!
//! Layout of an encoded class:
//!
//! ```text
//! magic "EZBC" | version u32 | flags u32 | crc32 u32 | sha256 [32] | payload
//! ```
//!
//! Both checksums cover the payload. Encoding is deterministic: the same
//! [`ClassFile`] always produces the same bytes.

use sha2::{Digest, Sha256};
use thiserror::Error;

use ezb_sdk::descriptor::{method_descriptor, parse_method_descriptor};
use ezb_sdk::TypeDesc;

use super::encoder::{ClassReader, ClassWriter, DecodeError};
use super::insn::{decode_code, encode_code, Insn};

/// Magic number of class files: "EZBC"
pub const MAGIC: [u8; 4] = *b"EZBC";

/// Current class format version
pub const VERSION: u32 = 1;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 32;

/// Class flags
pub mod flags {
    /// Class was produced by the enhancer
    pub const ENHANCED: u32 = 1 << 0;
    /// Class was generated from scratch (e.g. a no-interface view)
    pub const GENERATED: u32 = 1 << 1;
}

/// Class encoding/decoding errors
#[derive(Debug, Error)]
pub enum ClassFileError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected EZBC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// CRC mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// SHA-256 mismatch
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Stored digest (hex)
        expected: String,
        /// Computed digest (hex)
        actual: String,
    },
}

/// Access flags of classes, fields and methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    /// `public`
    pub const PUBLIC: u16 = 0x0001;
    /// `private`
    pub const PRIVATE: u16 = 0x0002;
    /// `protected`
    pub const PROTECTED: u16 = 0x0004;
    /// `static`
    pub const STATIC: u16 = 0x0008;
    /// `final`
    pub const FINAL: u16 = 0x0010;
    /// interface type
    pub const INTERFACE: u16 = 0x0200;
    /// `abstract`
    pub const ABSTRACT: u16 = 0x0400;
    /// compiler/enhancer generated
    pub const SYNTHETIC: u16 = 0x1000;

    /// `public`
    pub fn public() -> Self {
        Self(Self::PUBLIC)
    }

    /// `private`
    pub fn private() -> Self {
        Self(Self::PRIVATE)
    }

    /// Add flags
    pub fn with(self, bits: u16) -> Self {
        Self(self.0 | bits)
    }

    /// Whether all `bits` are set
    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    /// `public`?
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    /// `private`?
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// `static`?
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// `final`?
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }
}

/// A field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Access flags
    pub access: AccessFlags,
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeDesc,
}

impl FieldDef {
    /// Create a private field
    pub fn new(name: impl Into<String>, ty: TypeDesc) -> Self {
        Self {
            access: AccessFlags::private(),
            name: name.into(),
            ty,
        }
    }

    /// Set access flags
    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }
}

/// A method declaration
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Access flags
    pub access: AccessFlags,
    /// Method name (`<init>` for constructors)
    pub name: String,
    /// Parameter types
    pub params: Vec<TypeDesc>,
    /// Return type
    pub return_type: TypeDesc,
    /// Declared exception classes
    pub exceptions: Vec<String>,
    /// Annotation class names
    pub annotations: Vec<String>,
    /// Code; `None` means the method is implemented by the bean body
    pub code: Option<Vec<Insn>>,
}

impl MethodDef {
    /// Create a public method without code
    pub fn new(name: impl Into<String>, params: Vec<TypeDesc>, return_type: TypeDesc) -> Self {
        Self {
            access: AccessFlags::public(),
            name: name.into(),
            params,
            return_type,
            exceptions: Vec::new(),
            annotations: Vec::new(),
            code: None,
        }
    }

    /// Create a method from a descriptor string
    pub fn from_descriptor(name: impl Into<String>, descriptor: &str) -> Result<Self, DecodeError> {
        let (params, return_type) = parse_method_descriptor(descriptor)
            .map_err(|_| DecodeError::InvalidDescriptor(descriptor.to_string()))?;
        Ok(Self::new(name, params, return_type))
    }

    /// A public no-argument constructor calling `super_name`'s constructor
    pub fn default_constructor(super_name: &str) -> Self {
        Self::new("<init>", Vec::new(), TypeDesc::Void).with_code(vec![
            Insn::LoadThis,
            Insn::InvokeSpecial {
                owner: super_name.to_string(),
                name: "<init>".to_string(),
                desc: "()V".to_string(),
            },
            Insn::Return,
        ])
    }

    /// Set access flags
    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Set code
    pub fn with_code(mut self, code: Vec<Insn>) -> Self {
        self.code = Some(code);
        self
    }

    /// Add a declared exception
    pub fn throws(mut self, exception: impl Into<String>) -> Self {
        self.exceptions.push(exception.into());
        self
    }

    /// Add an annotation
    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    /// JVM-style descriptor
    pub fn descriptor(&self) -> String {
        method_descriptor(&self.params, &self.return_type)
    }

    /// Whether this is the no-argument constructor
    pub fn is_default_constructor(&self) -> bool {
        self.name == "<init>" && self.params.is_empty()
    }

    /// Whether the method has the given name and descriptor
    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor() == descriptor
    }
}

/// A class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    /// Format version
    pub version: u32,
    /// Class flags (see [`flags`])
    pub flags: u32,
    /// Access flags
    pub access: AccessFlags,
    /// Fully qualified name
    pub name: String,
    /// Superclass (`None` only for the root)
    pub super_name: Option<String>,
    /// Implemented interfaces, in declaration order
    pub interfaces: Vec<String>,
    /// Annotation class names
    pub annotations: Vec<String>,
    /// Fields
    pub fields: Vec<FieldDef>,
    /// Methods
    pub methods: Vec<MethodDef>,
}

impl ClassFile {
    /// Create a public class extending `java.lang.Object`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: VERSION,
            flags: 0,
            access: AccessFlags::public(),
            name: name.into(),
            super_name: Some(ezb_sdk::descriptor::OBJECT_CLASS.to_string()),
            interfaces: Vec::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.matches(name, descriptor))
    }

    /// Find a method by name and descriptor (mutable)
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.matches(name, descriptor))
    }

    /// Whether the class implements `interface` directly
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// Encode to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ClassWriter::new();

        writer.emit_bytes(&MAGIC);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);
        let digest_offset = writer.offset();
        writer.emit_bytes(&[0u8; 32]);

        writer.emit_u16(self.access.0);
        writer.emit_string(&self.name);
        match &self.super_name {
            Some(super_name) => {
                writer.emit_u8(1);
                writer.emit_string(super_name);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_strings(&self.interfaces);
        writer.emit_strings(&self.annotations);

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            writer.emit_u16(field.access.0);
            writer.emit_string(&field.name);
            writer.emit_string(&field.ty.descriptor());
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            encode_method(method, &mut writer);
        }

        let payload = &writer.buffer[HEADER_SIZE..];
        let checksum = crc32fast::hash(payload);
        let digest = Sha256::digest(payload);
        writer.patch_u32(checksum_offset, checksum);
        writer.patch_bytes(digest_offset, digest.as_slice());

        writer.into_bytes()
    }

    /// Decode from bytes, verifying header and checksums
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = ClassReader::new(data);

        let magic: [u8; 4] = {
            let bytes = reader.read_bytes(4)?;
            [bytes[0], bytes[1], bytes[2], bytes[3]]
        };
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ClassFileError::UnsupportedVersion(version));
        }
        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let stored_digest = reader.read_bytes(32)?;

        let payload = &data[HEADER_SIZE..];
        let checksum = crc32fast::hash(payload);
        if checksum != stored_checksum {
            return Err(ClassFileError::ChecksumMismatch {
                expected: stored_checksum,
                actual: checksum,
            });
        }
        let digest = Sha256::digest(payload);
        if digest.as_slice() != stored_digest.as_slice() {
            return Err(ClassFileError::DigestMismatch {
                expected: hex::encode(&stored_digest),
                actual: hex::encode(digest),
            });
        }

        let access = AccessFlags(reader.read_u16()?);
        let name = reader.read_string()?;
        let super_name = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_string()?),
        };
        let interfaces = reader.read_strings()?;
        let annotations = reader.read_strings()?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(reader.remaining()));
        for _ in 0..field_count {
            let access = AccessFlags(reader.read_u16()?);
            let name = reader.read_string()?;
            let descriptor = reader.read_string()?;
            let ty = TypeDesc::parse(&descriptor)
                .map_err(|_| DecodeError::InvalidDescriptor(descriptor.clone()))?;
            fields.push(FieldDef { access, name, ty });
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(reader.remaining()));
        for _ in 0..method_count {
            methods.push(decode_method(&mut reader)?);
        }

        if reader.remaining() > 0 {
            return Err(DecodeError::Trailing(reader.remaining()).into());
        }

        Ok(Self {
            version,
            flags,
            access,
            name,
            super_name,
            interfaces,
            annotations,
            fields,
            methods,
        })
    }
}

fn encode_method(method: &MethodDef, writer: &mut ClassWriter) {
    writer.emit_u16(method.access.0);
    writer.emit_string(&method.name);
    writer.emit_string(&method.descriptor());
    writer.emit_strings(&method.exceptions);
    writer.emit_strings(&method.annotations);
    match &method.code {
        Some(code) => {
            writer.emit_u8(1);
            encode_code(code, writer);
        }
        None => writer.emit_u8(0),
    }
}

fn decode_method(reader: &mut ClassReader<'_>) -> Result<MethodDef, DecodeError> {
    let access = AccessFlags(reader.read_u16()?);
    let name = reader.read_string()?;
    let descriptor = reader.read_string()?;
    let (params, return_type) = parse_method_descriptor(&descriptor)
        .map_err(|_| DecodeError::InvalidDescriptor(descriptor.clone()))?;
    let exceptions = reader.read_strings()?;
    let annotations = reader.read_strings()?;
    let code = match reader.read_u8()? {
        0 => None,
        _ => Some(decode_code(reader)?),
    };
    Ok(MethodDef {
        access,
        name,
        params,
        return_type,
        exceptions,
        annotations,
        code,
    })
}

/// Hex SHA-256 digest stored in the header of encoded class bytes
pub fn class_digest(data: &[u8]) -> Option<String> {
    data.get(16..HEADER_SIZE).map(hex::encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClassFile {
        let mut class = ClassFile::new("org.acme.CalculatorBean");
        class.interfaces.push("org.acme.Calculator".into());
        class.fields.push(FieldDef::new("total", TypeDesc::Long));
        class
            .methods
            .push(MethodDef::default_constructor("java.lang.Object"));
        class.methods.push(
            MethodDef::new("add", vec![TypeDesc::Int, TypeDesc::Int], TypeDesc::Int)
                .throws("org.acme.OverflowException"),
        );
        class
    }

    #[test]
    fn test_class_encoding() {
        let class = sample();
        let bytes = class.encode();
        assert_eq!(&bytes[..4], b"EZBC");
        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded, class);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(sample().encode(), sample().encode());
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_digest_validation() {
        let mut bytes = sample().encode();
        // Corrupt the digest only; the CRC still matches the payload
        bytes[20] ^= 0xFF;
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic_number() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample().encode();
        bytes[4..8].copy_from_slice(&999u32.to_le_bytes());
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::UnsupportedVersion(999))
        ));
    }

    #[test]
    fn test_lookup_helpers() {
        let class = sample();
        assert!(class.method("add", "(II)I").is_some());
        assert!(class.method("<init>", "()V").unwrap().is_default_constructor());
        assert!(class.implements("org.acme.Calculator"));
        assert_eq!(class.field("total").map(|f| &f.ty), Some(&TypeDesc::Long));
        assert_eq!(class_digest(&class.encode()).map(|d| d.len()), Some(64));
    }

    #[test]
    fn test_access_flags() {
        let flags = AccessFlags::public().with(AccessFlags::FINAL);
        assert!(flags.is_public());
        assert!(flags.is_final());
        assert!(!flags.is_static());
    }
}
