//! Bean class loader
//!
//! A loader owns the classes defined by one container. Classes are decoded
//! and verified when defined and never redefined.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::classfile::{verify_class, ClassFile, ClassFileError, MethodDef, VerifyError};
use crate::enhancer::DefinedClass;

/// Class definition failures
#[derive(Debug, Error)]
pub enum LoadError {
    /// Bytes are not a valid class
    #[error("Cannot decode class {name}: {source}")]
    Decode {
        /// Name the class was defined under
        name: String,
        /// Decoding failure
        source: ClassFileError,
    },

    /// Class failed verification
    #[error("Class {name} failed verification: {source}")]
    Verify {
        /// Class name
        name: String,
        /// Verification failure
        source: VerifyError,
    },

    /// Class already defined in this loader
    #[error("Class {0} is already defined in loader {1}")]
    Duplicate(String, String),

    /// Bytes define another class than announced
    #[error("Class bytes define {actual}, expected {expected}")]
    NameMismatch {
        /// Announced name
        expected: String,
        /// Name in the bytes
        actual: String,
    },
}

/// A class defined in a loader
#[derive(Debug)]
pub struct LoadedClass {
    file: ClassFile,
    ancestry: Vec<String>,
    digest: String,
}

impl LoadedClass {
    /// Class name
    pub fn name(&self) -> &str {
        &self.file.name
    }

    /// Decoded class
    pub fn file(&self) -> &ClassFile {
        &self.file
    }

    /// Superclass name
    pub fn super_name(&self) -> Option<&str> {
        self.file.super_name.as_deref()
    }

    /// SHA-256 of the class payload, hex encoded
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether this class is, extends or implements `name`
    ///
    /// Ancestry is computed from the classes visible at definition time.
    pub fn is_assignable_to(&self, name: &str) -> bool {
        self.ancestry.iter().any(|a| a == name)
    }

    /// Declared method
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDef> {
        self.file.method(name, descriptor)
    }
}

/// A method found by [`BeanClassLoader::resolve_method`]
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    /// Class declaring the method
    pub class: Arc<LoadedClass>,
    /// Index into the class's method list
    pub index: usize,
}

impl ResolvedMethod {
    /// The method definition
    pub fn method(&self) -> &MethodDef {
        &self.class.file().methods[self.index]
    }
}

/// Loader of enhanced bean classes
pub struct BeanClassLoader {
    name: String,
    classes: RwLock<FxHashMap<String, Arc<LoadedClass>>>,
}

impl BeanClassLoader {
    /// Create an empty loader
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: RwLock::new(FxHashMap::default()),
        }
    }

    /// Loader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode, verify and define `class`
    pub fn define(&self, class: &DefinedClass) -> Result<Arc<LoadedClass>, LoadError> {
        let file = ClassFile::decode(&class.bytes).map_err(|source| LoadError::Decode {
            name: class.name.clone(),
            source,
        })?;
        if file.name != class.name {
            return Err(LoadError::NameMismatch {
                expected: class.name.clone(),
                actual: file.name,
            });
        }
        verify_class(&file).map_err(|source| LoadError::Verify {
            name: class.name.clone(),
            source,
        })?;

        let mut classes = self.classes.write();
        if classes.contains_key(&file.name) {
            return Err(LoadError::Duplicate(file.name, self.name.clone()));
        }

        let mut ancestry = vec![file.name.clone()];
        ancestry.extend(file.interfaces.iter().cloned());
        if let Some(super_name) = &file.super_name {
            match classes.get(super_name) {
                Some(parent) => ancestry.extend(parent.ancestry.iter().cloned()),
                None => ancestry.push(super_name.clone()),
            }
        }

        let loaded = Arc::new(LoadedClass {
            digest: class.digest(),
            ancestry,
            file,
        });
        debug!(loader = %self.name, class = %loaded.name(), digest = %loaded.digest, "Defined class");
        classes.insert(loaded.name().to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Class by name
    pub fn class(&self, name: &str) -> Option<Arc<LoadedClass>> {
        self.classes.read().get(name).cloned()
    }

    /// Whether `name` is defined
    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Number of defined classes
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// No classes defined?
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// `class` followed by every superclass defined in this loader
    pub fn superclass_chain(&self, class: &Arc<LoadedClass>) -> Vec<Arc<LoadedClass>> {
        let classes = self.classes.read();
        let mut chain = vec![class.clone()];
        let mut current = class.super_name();
        while let Some(name) = current {
            match classes.get(name) {
                Some(parent) if chain.len() < 64 => {
                    chain.push(parent.clone());
                    current = parent.super_name();
                }
                _ => break,
            }
        }
        chain
    }

    /// Find a method on `class` or its superclasses
    pub fn resolve_method(
        &self,
        class: &Arc<LoadedClass>,
        name: &str,
        descriptor: &str,
    ) -> Option<ResolvedMethod> {
        self.superclass_chain(class).into_iter().find_map(|c| {
            let index = c
                .file()
                .methods
                .iter()
                .position(|m| m.matches(name, descriptor))?;
            Some(ResolvedMethod { class: c, index })
        })
    }
}

impl std::fmt::Debug for BeanClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanClassLoader")
            .field("name", &self.name)
            .field("classes", &self.len())
            .finish()
    }
}
