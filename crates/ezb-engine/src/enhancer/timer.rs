//! Timeout dispatch method
//!
//! `timeoutCallByEasyBeans(Timer)` calls the bean's timeout method. When
//! several methods are flagged the first one found is used.

use ezb_sdk::descriptor::parse_method_descriptor;
use ezb_sdk::{names as exceptions, TypeDesc};

use crate::classfile::{AccessFlags, CodeBuilder, MethodDef};
use crate::metadata::BeanClassMetadata;

use super::names::{TIMEOUT_METHOD, TIMER_CLASS};
use super::EnhanceError;

/// Build the timeout dispatcher for `metadata`
pub fn timeout_dispatcher(metadata: &BeanClassMetadata) -> Result<MethodDef, EnhanceError> {
    let mut code = CodeBuilder::new(TIMEOUT_METHOD);

    match metadata.timeout_method() {
        Some(target) => {
            let (params, ret) = parse_method_descriptor(&target.descriptor).map_err(|e| {
                EnhanceError::InvalidMetadata(format!(
                    "timeout method {}{}: {}",
                    target.name, target.descriptor, e
                ))
            })?;
            code.load_this();
            if target.accepts_timer() {
                code.load_arg(0);
            }
            code.invoke_virtual(&metadata.class_name, &target.name, &params, &ret);
            if !ret.is_void() {
                code.emit(crate::classfile::Insn::Pop);
            }
            code.return_as(&TypeDesc::Void);
        }
        None => {
            code.throw(
                exceptions::EJB_EXCEPTION,
                format!("No timeout method defined on bean {}", metadata.class_name),
            );
        }
    }

    Ok(MethodDef::new(
        TIMEOUT_METHOD,
        vec![TypeDesc::object(TIMER_CLASS)],
        TypeDesc::Void,
    )
    .with_access(AccessFlags::public().with(AccessFlags::SYNTHETIC))
    .with_code(code.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::Insn;
    use crate::metadata::{BeanKind, MethodMetadata};

    fn meta() -> BeanClassMetadata {
        BeanClassMetadata::new("T", "org.acme.TimerBean", BeanKind::Stateless)
    }

    #[test]
    fn test_without_timeout_method_throws() {
        let method = timeout_dispatcher(&meta()).unwrap();
        let code = method.code.unwrap();
        assert!(matches!(&code[0], Insn::Throw { class, .. } if class == exceptions::EJB_EXCEPTION));
    }

    #[test]
    fn test_timer_passed_only_when_accepted() {
        let with_timer = meta().with_method(MethodMetadata::new("fire", "(Ljavax/ejb/Timer;)V").timeout());
        let code = timeout_dispatcher(&with_timer).unwrap().code.unwrap();
        assert_eq!(code[1], Insn::LoadArg(0));

        let without = meta().with_method(MethodMetadata::new("fire", "()V").timeout());
        let code = timeout_dispatcher(&without).unwrap().code.unwrap();
        assert!(!code.contains(&Insn::LoadArg(0)));
    }

    #[test]
    fn test_first_flagged_method_is_called() {
        let metadata = meta()
            .with_method(MethodMetadata::new("first", "()V").timeout())
            .with_method(MethodMetadata::new("second", "()V").timeout());
        let code = timeout_dispatcher(&metadata).unwrap().code.unwrap();
        assert!(code
            .iter()
            .any(|i| matches!(i, Insn::InvokeVirtual { name, .. } if name == "first")));
        assert!(!code
            .iter()
            .any(|i| matches!(i, Insn::InvokeVirtual { name, .. } if name == "second")));
    }

    #[test]
    fn test_result_of_timeout_method_is_discarded() {
        let metadata = meta().with_method(MethodMetadata::new("fire", "()I").timeout());
        let code = timeout_dispatcher(&metadata).unwrap().code.unwrap();
        assert_eq!(code[code.len() - 2], Insn::Pop);
    }
}
