//! Bean class enhancer
//!
//! Rewrites a compiled bean class at deployment time so the container can
//! drive it:
//!
//! - adds the marker interface of the bean kind
//! - injects container fields (factory, interceptor manager, contexts, and
//!   kind-specific state) with public accessors
//! - patches the no-argument constructor to create the interceptor manager
//! - generates the timeout dispatcher and the cleanup method
//! - generates the EJB 2.1 surface for session beans with a home
//! - optionally generates a no-interface view subclass
//!
//! Enhancement is atomic and deterministic: either a complete
//! [`EnhancedClass`] is returned or nothing is, and the same input always
//! produces byte-identical output.

pub mod cleanup;
pub mod ejb21;
pub mod fields;
pub mod names;
pub mod no_interface;
pub mod schema;
pub mod timer;

use thiserror::Error;
use tracing::debug;

use crate::classfile::{
    class_digest, flags, verify_class, ClassFile, ClassFileError, CodegenError, VerifyError,
};
use crate::metadata::BeanClassMetadata;

use schema::ClassSchema;

/// Enhancement failures
#[derive(Debug, Error)]
pub enum EnhanceError {
    /// Input bytes are not a valid class
    #[error("Cannot decode class: {0}")]
    Decode(#[from] ClassFileError),

    /// Output failed verification
    #[error("Enhanced class failed verification: {0}")]
    Verify(#[from] VerifyError),

    /// Generated code is malformed
    #[error("Code generation failed: {0}")]
    Codegen(#[from] CodegenError),

    /// Class name differs from the metadata
    #[error("Class name mismatch: metadata describes {expected}, bytes define {actual}")]
    ClassNameMismatch {
        /// Name in the metadata
        expected: String,
        /// Name in the class bytes
        actual: String,
    },

    /// Class already implements a bean marker
    #[error("Class {class} is already enhanced (implements {marker})")]
    AlreadyEnhanced {
        /// Class name
        class: String,
        /// Marker found
        marker: String,
    },

    /// No no-argument constructor
    #[error("Class {0} has no no-argument constructor")]
    MissingConstructor(String),

    /// Constructor does not start with the superclass constructor call
    #[error("Unexpected constructor prologue in {0}")]
    ConstructorPattern(String),

    /// Generated member clashes with an existing one
    #[error("Member {member} already exists in {class}")]
    DuplicateMember {
        /// Class name
        class: String,
        /// Member name (and descriptor for methods)
        member: String,
    },

    /// Metadata cannot be applied to the class
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// A class name and its encoded bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedClass {
    /// Fully qualified name
    pub name: String,
    /// Encoded class
    pub bytes: Vec<u8>,
}

impl DefinedClass {
    /// Encode `class`
    pub fn from_class(class: &ClassFile) -> Self {
        Self {
            name: class.name.clone(),
            bytes: class.encode(),
        }
    }

    /// Hex SHA-256 of the payload
    pub fn digest(&self) -> String {
        class_digest(&self.bytes).unwrap_or_default()
    }
}

/// Result of enhancing one bean
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedClass {
    /// The rewritten bean class
    pub bean: DefinedClass,
    /// Auxiliary classes (no-interface view)
    pub generated: Vec<DefinedClass>,
}

impl EnhancedClass {
    /// Every class, bean first
    pub fn classes(&self) -> impl Iterator<Item = &DefinedClass> {
        std::iter::once(&self.bean).chain(self.generated.iter())
    }
}

/// Enhancer switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancerOptions {
    /// Generate no-interface views for beans that ask for one
    pub no_interface_view: bool,
    /// Generate the EJB 2.1 surface for session beans with a home
    pub ejb21_view: bool,
}

impl Default for EnhancerOptions {
    fn default() -> Self {
        Self {
            no_interface_view: true,
            ejb21_view: true,
        }
    }
}

/// Bean class enhancer
#[derive(Debug, Clone, Default)]
pub struct Enhancer {
    options: EnhancerOptions,
}

impl Enhancer {
    /// Create an enhancer
    pub fn new(options: EnhancerOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> EnhancerOptions {
        self.options
    }

    /// Enhance `class_bytes` described by `metadata`
    pub fn enhance(
        &self,
        class_bytes: &[u8],
        metadata: &BeanClassMetadata,
    ) -> Result<EnhancedClass, EnhanceError> {
        let original = ClassFile::decode(class_bytes)?;

        if original.name != metadata.class_name {
            return Err(EnhanceError::ClassNameMismatch {
                expected: metadata.class_name.clone(),
                actual: original.name,
            });
        }
        if let Some(marker) = names::MARKERS.iter().find(|m| original.implements(m)) {
            return Err(EnhanceError::AlreadyEnhanced {
                class: original.name,
                marker: marker.to_string(),
            });
        }

        let schema = self.build_schema(&original, metadata)?;
        let mut enhanced = schema.apply(&original)?;
        enhanced.flags |= flags::ENHANCED;
        verify_class(&enhanced)?;
        let bean = DefinedClass::from_class(&enhanced);

        let mut generated = Vec::new();
        if self.options.no_interface_view && metadata.no_interface_view && metadata.kind.is_session() {
            let view = no_interface::generate_view(&original)?;
            verify_class(&view)?;
            generated.push(DefinedClass::from_class(&view));
        }

        debug!(
            class = %metadata.class_name,
            kind = metadata.kind.label(),
            digest = %bean.digest(),
            generated = generated.len(),
            "Enhanced bean class"
        );

        Ok(EnhancedClass { bean, generated })
    }

    fn build_schema(
        &self,
        original: &ClassFile,
        metadata: &BeanClassMetadata,
    ) -> Result<ClassSchema, EnhanceError> {
        let mut schema = ClassSchema::new();
        schema.add_interface(metadata.kind.marker_interface());

        fields::add_injected_fields(&mut schema, &original.name, metadata.kind);
        schema.add_method(timer::timeout_dispatcher(metadata)?);
        let injected = schema.fields().to_vec();
        schema.add_method(cleanup::cleanup_method(&original.name, &injected)?);

        if self.options.ejb21_view && metadata.kind.is_session() && metadata.has_home() {
            ejb21::add_ejb21_methods(&mut schema, original)?;
        }

        Ok(schema)
    }
}
