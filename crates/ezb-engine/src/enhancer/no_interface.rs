//! No-interface view generation
//!
//! The view extends the bean class and forwards each public business method
//! through its invocation handler. Methods that are neither public nor
//! private raise `EJBAccessException`. Final, static and private methods are
//! not overridden, nor are constructors or container-generated members.

use ezb_sdk::{names as exceptions, TypeDesc};

use crate::classfile::{flags, AccessFlags, ClassFile, CodeBuilder, MethodDef};

use super::names::{
    no_interface_view_name, FIELD_INVOCATION_HANDLER, INVOCATION_HANDLER_CLASS, MARKER_NO_INTERFACE,
};
use super::schema::ClassSchema;
use super::EnhanceError;

/// Whether the view overrides `method`
fn is_overridable(method: &MethodDef) -> bool {
    !method.name.starts_with('<')
        && !method.access.is_private()
        && !method.access.is_static()
        && !method.access.is_final()
        && !method.access.contains(AccessFlags::SYNTHETIC)
}

/// Generate the no-interface view of `bean`
pub fn generate_view(bean: &ClassFile) -> Result<ClassFile, EnhanceError> {
    let view_name = no_interface_view_name(&bean.name);

    let mut view = ClassFile::new(view_name.clone());
    view.super_name = Some(bean.name.clone());
    view.flags = flags::GENERATED;
    view.access = AccessFlags::public().with(AccessFlags::SYNTHETIC);
    view.methods.push(MethodDef::default_constructor(&bean.name));

    let mut schema = ClassSchema::new();
    schema.add_interface(MARKER_NO_INTERFACE);
    schema.add_field_with_accessors(
        &view_name,
        FIELD_INVOCATION_HANDLER,
        TypeDesc::object(INVOCATION_HANDLER_CLASS),
    );

    for method in bean.methods.iter().filter(|m| is_overridable(m)) {
        let descriptor = method.descriptor();
        let mut code = CodeBuilder::new(format!("{}{}", method.name, descriptor));
        if method.access.is_public() {
            code.load_this()
                .load_args(method.params.len())
                .invoke_handler(&bean.name, &method.name, &descriptor)
                .return_as(&method.return_type);
        } else {
            code.throw(
                exceptions::EJB_ACCESS,
                format!(
                    "Method {} of {} is not public and cannot be called through the no-interface view",
                    method.name, bean.name
                ),
            );
        }

        let mut forward = method.clone();
        forward.access = AccessFlags(method.access.0 & !AccessFlags::ABSTRACT);
        forward.annotations.clear();
        forward.code = Some(code.finish()?);
        schema.add_method(forward);
    }

    schema.apply(&view)
}
