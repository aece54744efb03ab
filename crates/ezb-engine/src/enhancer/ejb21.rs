//! EJB 2.1 component surface
//!
//! Session beans exposing a home get `remove`, `isIdentical` (remote and
//! local flavor), `getHandle` and `getPrimaryKey` unless the bean already
//! defines them. The bodies delegate to helpers serviced by the factory, which
//! knows the bean's identity.

use ezb_sdk::{names as exceptions, TypeDesc};

use crate::classfile::{AccessFlags, ClassFile, CodeBuilder, MethodDef};

use super::names::{EJB21_HELPER_CLASS, EJB_LOCAL_OBJECT_CLASS, EJB_OBJECT_CLASS};
use super::schema::ClassSchema;
use super::EnhanceError;

/// Helper descriptor of `remove`
pub const HELPER_REMOVE_DESC: &str = "(Ljava/lang/Object;)V";
/// Helper descriptor of `isIdentical`
pub const HELPER_IS_IDENTICAL_DESC: &str = "(Ljava/lang/Object;Ljava/lang/Object;)Z";
/// Helper descriptor of `getHandle`
pub const HELPER_GET_HANDLE_DESC: &str = "(Ljava/lang/Object;)Ljavax/ejb/Handle;";

fn synthetic(method: MethodDef, code: &mut CodeBuilder) -> Result<MethodDef, EnhanceError> {
    Ok(method
        .with_access(AccessFlags::public().with(AccessFlags::SYNTHETIC))
        .with_code(code.finish()?))
}

/// Add the EJB 2.1 methods missing from `class`
pub fn add_ejb21_methods(schema: &mut ClassSchema, class: &ClassFile) -> Result<(), EnhanceError> {
    let mut candidates = Vec::new();

    let remove = MethodDef::new("remove", Vec::new(), TypeDesc::Void).throws(exceptions::REMOVE_EXCEPTION);
    let mut code = CodeBuilder::new("remove");
    code.load_this()
        .invoke_static(EJB21_HELPER_CLASS, "remove", HELPER_REMOVE_DESC)
        .return_as(&TypeDesc::Void);
    candidates.push(synthetic(remove, &mut code)?);

    for component in [EJB_OBJECT_CLASS, EJB_LOCAL_OBJECT_CLASS] {
        let method = MethodDef::new(
            "isIdentical",
            vec![TypeDesc::object(component)],
            TypeDesc::Boolean,
        );
        let mut code = CodeBuilder::new("isIdentical");
        code.load_this()
            .load_arg(0)
            .invoke_static(EJB21_HELPER_CLASS, "isIdentical", HELPER_IS_IDENTICAL_DESC)
            .return_as(&TypeDesc::Boolean);
        candidates.push(synthetic(method, &mut code)?);
    }

    let handle_type = TypeDesc::object(ezb_sdk::identity::HANDLE_CLASS);
    let get_handle = MethodDef::new("getHandle", Vec::new(), handle_type.clone());
    let mut code = CodeBuilder::new("getHandle");
    code.load_this()
        .invoke_static(EJB21_HELPER_CLASS, "getHandle", HELPER_GET_HANDLE_DESC)
        .return_as(&handle_type);
    candidates.push(synthetic(get_handle, &mut code)?);

    let get_primary_key = MethodDef::new(
        "getPrimaryKey",
        Vec::new(),
        TypeDesc::object(ezb_sdk::descriptor::OBJECT_CLASS),
    );
    let mut code = CodeBuilder::new("getPrimaryKey");
    code.throw(
        exceptions::EJB_EXCEPTION,
        "Session beans do not have a primary key",
    );
    candidates.push(synthetic(get_primary_key, &mut code)?);

    for method in candidates {
        let descriptor = method.descriptor();
        if class.method(&method.name, &descriptor).is_none()
            && !schema.has_method(&method.name, &descriptor)
        {
            schema.add_method(method);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_full_surface() {
        let class = ClassFile::new("org.acme.Cart");
        let mut schema = ClassSchema::new();
        add_ejb21_methods(&mut schema, &class).unwrap();
        assert!(schema.has_method("remove", "()V"));
        assert!(schema.has_method("isIdentical", "(Ljavax/ejb/EJBObject;)Z"));
        assert!(schema.has_method("isIdentical", "(Ljavax/ejb/EJBLocalObject;)Z"));
        assert!(schema.has_method("getHandle", "()Ljavax/ejb/Handle;"));
        assert!(schema.has_method("getPrimaryKey", "()Ljava/lang/Object;"));
    }

    #[test]
    fn test_keeps_bean_defined_methods() {
        let mut class = ClassFile::new("org.acme.Cart");
        class.methods.push(MethodDef::new("remove", vec![], TypeDesc::Void));
        let mut schema = ClassSchema::new();
        add_ejb21_methods(&mut schema, &class).unwrap();
        assert!(!schema.has_method("remove", "()V"));
        assert!(schema.has_method("getHandle", "()Ljavax/ejb/Handle;"));
    }
}
