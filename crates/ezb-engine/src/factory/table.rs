//! Method table
//!
//! Maps the wire hash of every method a client can call to what the factory
//! needs to run it. Built once per factory from the business and component
//! interfaces, the `java.lang.Object` methods answered by the container, and
//! the bean's public methods when a no-interface view is exposed. Home
//! interfaces are served client-side and never reach the table.

use std::sync::Arc;

use ezb_sdk::{names as exceptions, MethodDescriptor, TypeDesc};
use rustc_hash::FxHashMap;

use crate::classfile::{AccessFlags, ClassFile};
use crate::enhancer::names::{EJB_LOCAL_OBJECT_CLASS, EJB_OBJECT_CLASS, TIMEOUT_DESCRIPTOR, TIMEOUT_METHOD};
use crate::metadata::{BeanClassMetadata, MethodMetadata};

/// A callable method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodEntry {
    /// Wire hash
    pub hash: i64,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Declared exceptions
    pub exceptions: Vec<String>,
    /// Bean metadata of the method (defaults when the bean declares none)
    pub metadata: MethodMetadata,
    /// `equals`, `hashCode` or `toString`
    pub object_method: bool,
}

impl MethodEntry {
    fn from_descriptor(method: &MethodDescriptor, bean: &BeanClassMetadata) -> Self {
        let descriptor = method.descriptor();
        let metadata = bean
            .method(&method.name, &descriptor)
            .cloned()
            .unwrap_or_else(|| MethodMetadata::new(method.name.clone(), descriptor.clone()));
        Self {
            hash: method.hash(),
            name: method.name.clone(),
            descriptor,
            exceptions: method.exceptions.clone(),
            metadata,
            object_method: method.is_object_method(),
        }
    }

    /// Entry running the generated timeout dispatcher
    ///
    /// Transaction attribute and flags come from the bean's timeout method.
    pub fn timeout(bean: &BeanClassMetadata) -> Self {
        let mut metadata = bean
            .timeout_method()
            .cloned()
            .unwrap_or_default();
        metadata.name = TIMEOUT_METHOD.to_string();
        metadata.descriptor = TIMEOUT_DESCRIPTOR.to_string();
        Self {
            hash: ezb_sdk::method_hash(TIMEOUT_METHOD, TIMEOUT_DESCRIPTOR),
            name: TIMEOUT_METHOD.to_string(),
            descriptor: TIMEOUT_DESCRIPTOR.to_string(),
            exceptions: Vec::new(),
            metadata,
            object_method: false,
        }
    }

    /// Entry for a message listener method
    pub fn listener(method: &MethodDescriptor, bean: &BeanClassMetadata) -> Self {
        Self::from_descriptor(method, bean)
    }
}

/// EJB 2.1 component methods generated by the enhancer
fn component_surface(component: &str) -> Vec<MethodDescriptor> {
    let identical_param = if component == "local" {
        EJB_LOCAL_OBJECT_CLASS
    } else {
        EJB_OBJECT_CLASS
    };
    vec![
        MethodDescriptor::new(component, "remove").throws(exceptions::REMOVE_EXCEPTION),
        MethodDescriptor::new(component, "isIdentical")
            .with_params(vec![TypeDesc::object(identical_param)])
            .returns(TypeDesc::Boolean),
        MethodDescriptor::new(component, "getHandle")
            .returns(TypeDesc::object(ezb_sdk::identity::HANDLE_CLASS)),
        MethodDescriptor::new(component, "getPrimaryKey")
            .returns(TypeDesc::object(ezb_sdk::descriptor::OBJECT_CLASS)),
    ]
}

/// Hash-indexed methods of a bean
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    entries: FxHashMap<i64, Arc<MethodEntry>>,
}

impl MethodTable {
    /// Build the table of `bean`; `class` is the enhanced bean class
    pub fn build(bean: &BeanClassMetadata, class: &ClassFile) -> Self {
        let mut table = Self::default();

        for interface in bean.local_interfaces.iter().chain(bean.remote_interfaces.iter()) {
            for method in &interface.methods {
                table.insert(MethodEntry::from_descriptor(method, bean));
            }
        }

        if let Some(home) = &bean.home {
            for method in home.component.methods.iter().chain(component_surface("remote").iter()) {
                table.insert(MethodEntry::from_descriptor(method, bean));
            }
        }
        if let Some(home) = &bean.local_home {
            for method in home.component.methods.iter().chain(component_surface("local").iter()) {
                table.insert(MethodEntry::from_descriptor(method, bean));
            }
        }

        if bean.no_interface_view {
            let public = class.methods.iter().filter(|m| {
                m.access.is_public()
                    && !m.access.is_static()
                    && !m.access.contains(AccessFlags::SYNTHETIC)
                    && !m.name.starts_with('<')
            });
            for method in public {
                let mut descriptor = MethodDescriptor::new(class.name.clone(), method.name.clone())
                    .with_params(method.params.clone())
                    .returns(method.return_type.clone());
                descriptor.exceptions = method.exceptions.clone();
                table.insert(MethodEntry::from_descriptor(&descriptor, bean));
            }
        }

        for method in [
            MethodDescriptor::object_equals(),
            MethodDescriptor::object_hash_code(),
            MethodDescriptor::object_to_string(),
        ] {
            table.insert(MethodEntry::from_descriptor(&method, bean));
        }

        table
    }

    fn insert(&mut self, entry: MethodEntry) {
        self.entries.entry(entry.hash).or_insert_with(|| Arc::new(entry));
    }

    /// Entry for `hash`
    pub fn get(&self, hash: i64) -> Option<Arc<MethodEntry>> {
        self.entries.get(&hash).cloned()
    }

    /// Number of methods
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No methods?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::MethodDef;
    use crate::metadata::{BeanKind, TransactionAttribute};
    use ezb_sdk::InterfaceDescriptor;

    fn calc() -> InterfaceDescriptor {
        InterfaceDescriptor::new("org.acme.Calc").with_method(
            MethodDescriptor::new("", "add")
                .with_params(vec![TypeDesc::Int, TypeDesc::Int])
                .returns(TypeDesc::Int),
        )
    }

    #[test]
    fn test_business_and_object_methods() {
        let bean = BeanClassMetadata::new("Calc", "org.acme.CalcBean", BeanKind::Stateless)
            .with_local(calc())
            .with_method(
                MethodMetadata::new("add", "(II)I").transaction(TransactionAttribute::Never),
            );
        let table = MethodTable::build(&bean, &ClassFile::new("org.acme.CalcBean"));
        assert_eq!(table.len(), 4);

        let add = table.get(ezb_sdk::method_hash("add", "(II)I")).unwrap();
        assert_eq!(add.metadata.transaction, TransactionAttribute::Never);
        assert!(!add.object_method);

        let to_string = table
            .get(MethodDescriptor::object_to_string().hash())
            .unwrap();
        assert!(to_string.object_method);
    }

    #[test]
    fn test_no_interface_view_adds_public_methods() {
        let mut class = ClassFile::new("org.acme.CalcBean");
        class
            .methods
            .push(MethodDef::new("square", vec![TypeDesc::Int], TypeDesc::Int));
        class.methods.push(
            MethodDef::new("hidden", vec![], TypeDesc::Void).with_access(AccessFlags::private()),
        );
        let bean = BeanClassMetadata::new("Calc", "org.acme.CalcBean", BeanKind::Stateless)
            .with_no_interface_view();
        let table = MethodTable::build(&bean, &class);
        assert!(table.get(ezb_sdk::method_hash("square", "(I)I")).is_some());
        assert!(table.get(ezb_sdk::method_hash("hidden", "()V")).is_none());
    }

    #[test]
    fn test_component_interface_gets_ejb21_surface() {
        let home = InterfaceDescriptor::new("org.acme.CartHome");
        let component = InterfaceDescriptor::new("org.acme.CartObject");
        let bean = BeanClassMetadata::new("Cart", "org.acme.CartBean", BeanKind::Stateful)
            .with_home(home, component);
        let table = MethodTable::build(&bean, &ClassFile::new("org.acme.CartBean"));
        let remove = table.get(ezb_sdk::method_hash("remove", "()V")).unwrap();
        assert_eq!(remove.exceptions, vec![exceptions::REMOVE_EXCEPTION.to_string()]);
        assert!(table
            .get(ezb_sdk::method_hash("isIdentical", "(Ljavax/ejb/EJBObject;)Z"))
            .is_some());
    }

    #[test]
    fn test_timeout_entry_uses_timeout_metadata() {
        let bean = BeanClassMetadata::new("T", "org.acme.TimerBean", BeanKind::Stateless).with_method(
            MethodMetadata::new("fire", "()V")
                .timeout()
                .transaction(TransactionAttribute::RequiresNew),
        );
        let entry = MethodEntry::timeout(&bean);
        assert_eq!(entry.name, TIMEOUT_METHOD);
        assert_eq!(entry.metadata.transaction, TransactionAttribute::RequiresNew);
    }
}
