//! Class schema
//!
//! Everything the enhancer adds to a class is first collected into a
//! [`ClassSchema`]: interfaces, fields, methods and the constructor prologue.
//! [`ClassSchema::apply`] then produces a new class from the original one, so
//! a failure never leaves a partially enhanced class behind.

use ezb_sdk::TypeDesc;

use crate::classfile::{AccessFlags, ClassFile, FieldDef, Insn, MethodDef};

use super::names::accessor_names;
use super::EnhanceError;

/// Additions to apply to a class
#[derive(Debug, Clone, Default)]
pub struct ClassSchema {
    interfaces: Vec<String>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    constructor_prologue: Vec<Insn>,
}

impl ClassSchema {
    /// Empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interface
    pub fn add_interface(&mut self, interface: &str) {
        self.interfaces.push(interface.to_string());
    }

    /// Add a field
    pub fn add_field(&mut self, field: FieldDef) {
        self.fields.push(field);
    }

    /// Add a method
    pub fn add_method(&mut self, method: MethodDef) {
        self.methods.push(method);
    }

    /// Add a private field with a public getter and setter
    pub fn add_field_with_accessors(&mut self, owner: &str, name: &str, ty: TypeDesc) {
        let (getter, setter) = accessor_names(name);
        let synthetic = AccessFlags::public().with(AccessFlags::SYNTHETIC);

        self.add_field(FieldDef::new(name, ty.clone()).with_access(AccessFlags::private().with(AccessFlags::SYNTHETIC)));
        self.add_method(
            MethodDef::new(getter, Vec::new(), ty.clone())
                .with_access(synthetic)
                .with_code(vec![
                    Insn::LoadThis,
                    Insn::GetField {
                        owner: owner.to_string(),
                        name: name.to_string(),
                    },
                    Insn::ReturnValue,
                ]),
        );
        self.add_method(
            MethodDef::new(setter, vec![ty], TypeDesc::Void)
                .with_access(synthetic)
                .with_code(vec![
                    Insn::LoadThis,
                    Insn::LoadArg(0),
                    Insn::PutField {
                        owner: owner.to_string(),
                        name: name.to_string(),
                    },
                    Insn::Return,
                ]),
        );
    }

    /// Instructions inserted right after the superclass constructor call
    pub fn prepend_to_constructor(&mut self, insns: Vec<Insn>) {
        self.constructor_prologue.extend(insns);
    }

    /// Fields added so far
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Whether the schema already adds a method
    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.methods.iter().any(|m| m.matches(name, descriptor))
    }

    /// Produce the enhanced class
    pub fn apply(&self, original: &ClassFile) -> Result<ClassFile, EnhanceError> {
        let mut class = original.clone();

        for interface in &self.interfaces {
            if !class.implements(interface) {
                class.interfaces.push(interface.clone());
            }
        }

        for field in &self.fields {
            if class.field(&field.name).is_some() {
                return Err(EnhanceError::DuplicateMember {
                    class: class.name.clone(),
                    member: field.name.clone(),
                });
            }
            class.fields.push(field.clone());
        }

        for method in &self.methods {
            if class.method(&method.name, &method.descriptor()).is_some() {
                return Err(EnhanceError::DuplicateMember {
                    class: class.name.clone(),
                    member: format!("{}{}", method.name, method.descriptor()),
                });
            }
            class.methods.push(method.clone());
        }

        if !self.constructor_prologue.is_empty() {
            patch_constructor(&mut class, &self.constructor_prologue)?;
        }

        Ok(class)
    }
}

/// Insert `prologue` directly after the superclass constructor call
fn patch_constructor(class: &mut ClassFile, prologue: &[Insn]) -> Result<(), EnhanceError> {
    let class_name = class.name.clone();
    let super_name = class.super_name.clone().unwrap_or_default();
    let constructor = class
        .method_mut("<init>", "()V")
        .ok_or_else(|| EnhanceError::MissingConstructor(class_name.clone()))?;
    let code = constructor
        .code
        .as_mut()
        .ok_or_else(|| EnhanceError::ConstructorPattern(class_name.clone()))?;

    let expected_super_call = Insn::InvokeSpecial {
        owner: super_name,
        name: "<init>".to_string(),
        desc: "()V".to_string(),
    };
    let matches = code.len() >= 2 && code[0] == Insn::LoadThis && code[1] == expected_super_call;
    if !matches {
        return Err(EnhanceError::ConstructorPattern(class_name));
    }

    let tail = code.split_off(2);
    code.extend(prologue.iter().cloned());
    code.extend(tail);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bean() -> ClassFile {
        let mut class = ClassFile::new("org.acme.Bean");
        class
            .methods
            .push(MethodDef::default_constructor("java.lang.Object"));
        class
    }

    #[test]
    fn test_accessors_added() {
        let mut schema = ClassSchema::new();
        schema.add_field_with_accessors("org.acme.Bean", "easyBeansFactory", TypeDesc::object("F"));
        let class = schema.apply(&bean()).unwrap();
        assert!(class.field("easyBeansFactory").is_some());
        assert!(class.method("getEasyBeansFactory", "()LF;").is_some());
        assert!(class.method("setEasyBeansFactory", "(LF;)V").is_some());
    }

    #[test]
    fn test_constructor_patch_position() {
        let mut schema = ClassSchema::new();
        schema.prepend_to_constructor(vec![Insn::Nop]);
        let class = schema.apply(&bean()).unwrap();
        let code = class.method("<init>", "()V").unwrap().code.clone().unwrap();
        assert_eq!(code[2], Insn::Nop);
        assert_eq!(code[3], Insn::Return);
    }

    #[test]
    fn test_unexpected_prologue_rejected() {
        let mut class = ClassFile::new("org.acme.Bean");
        class.methods.push(
            MethodDef::new("<init>", vec![], TypeDesc::Void)
                .with_code(vec![Insn::Nop, Insn::Return]),
        );
        let mut schema = ClassSchema::new();
        schema.prepend_to_constructor(vec![Insn::Nop]);
        assert!(matches!(
            schema.apply(&class),
            Err(EnhanceError::ConstructorPattern(_))
        ));
    }

    #[test]
    fn test_member_clash_leaves_original_untouched() {
        let mut original = bean();
        original.fields.push(FieldDef::new("easyBeansFactory", TypeDesc::Int));
        let snapshot = original.clone();
        let mut schema = ClassSchema::new();
        schema.add_field_with_accessors("org.acme.Bean", "easyBeansFactory", TypeDesc::Int);
        assert!(matches!(
            schema.apply(&original),
            Err(EnhanceError::DuplicateMember { .. })
        ));
        assert_eq!(original, snapshot);
    }
}
