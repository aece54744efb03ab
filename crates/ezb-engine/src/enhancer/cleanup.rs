//! Cleanup method
//!
//! `easyBeansCleanup()` resets every injected field to its zero value so that
//! an evicted instance no longer references its factory or context.

use ezb_sdk::TypeDesc;

use crate::classfile::{AccessFlags, CodeBuilder, FieldDef, MethodDef};

use super::names::CLEANUP_METHOD;
use super::EnhanceError;

/// Build the cleanup method resetting `fields`
pub fn cleanup_method(class_name: &str, fields: &[FieldDef]) -> Result<MethodDef, EnhanceError> {
    let mut code = CodeBuilder::new(CLEANUP_METHOD);
    for field in fields {
        code.load_this()
            .load_default(&field.ty)
            .put_field(class_name, &field.name);
    }
    code.return_as(&TypeDesc::Void);

    Ok(MethodDef::new(CLEANUP_METHOD, Vec::new(), TypeDesc::Void)
        .with_access(AccessFlags::public().with(AccessFlags::SYNTHETIC))
        .with_code(code.finish()?))
}
