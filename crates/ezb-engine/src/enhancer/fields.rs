//! Injected container fields and the constructor patch

use ezb_sdk::TypeDesc;

use crate::classfile::Insn;
use crate::metadata::BeanKind;

use super::names::*;
use super::schema::ClassSchema;

/// Fields injected into every enhanced class, with their types
pub fn common_fields() -> Vec<(&'static str, TypeDesc)> {
    vec![
        (FIELD_FACTORY, TypeDesc::object(FACTORY_CLASS)),
        (FIELD_INTERCEPTOR_MANAGER, TypeDesc::object(INTERCEPTOR_MANAGER_CLASS)),
        (
            FIELD_INVOCATION_CONTEXT_FACTORY,
            TypeDesc::object(INVOCATION_CONTEXT_FACTORY_CLASS),
        ),
        (
            FIELD_DYNAMIC_INTERCEPTOR_MANAGER,
            TypeDesc::object(DYNAMIC_INTERCEPTOR_MANAGER_CLASS),
        ),
        (FIELD_CONTEXT, TypeDesc::object(CONTEXT_CLASS)),
    ]
}

/// Fields specific to a bean kind
pub fn kind_fields(kind: BeanKind) -> Vec<(&'static str, TypeDesc)> {
    match kind {
        BeanKind::Stateful => vec![
            (FIELD_STATEFUL_ID, TypeDesc::object(LONG_CLASS)),
            (FIELD_STATEFUL_IN_TRANSACTION, TypeDesc::Boolean),
            (FIELD_STATEFUL_TIMEOUT, TypeDesc::Long),
        ],
        BeanKind::MessageDriven => vec![(FIELD_XA_RESOURCE, TypeDesc::object(XA_RESOURCE_CLASS))],
        _ => Vec::new(),
    }
}

/// Add every injected field with its accessors and patch the constructor
pub fn add_injected_fields(schema: &mut ClassSchema, class_name: &str, kind: BeanKind) {
    for (name, ty) in common_fields().into_iter().chain(kind_fields(kind)) {
        schema.add_field_with_accessors(class_name, name, ty);
    }

    schema.prepend_to_constructor(vec![
        Insn::LoadThis,
        Insn::New {
            class: INTERCEPTOR_MANAGER_CLASS.to_string(),
        },
        Insn::PutField {
            owner: class_name.to_string(),
            name: FIELD_INTERCEPTOR_MANAGER.to_string(),
        },
    ]);
}
