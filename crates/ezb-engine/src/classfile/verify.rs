//! Class verification
//!
//! Checked before a class is defined into a loader: member uniqueness, stack
//! discipline of every method body, argument indices, field references on
//! the class itself and return shape.

use rustc_hash::FxHashSet;

use super::class::{ClassFile, MethodDef};
use super::insn::Insn;

/// Class verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Two fields with the same name
    #[error("Duplicate field '{0}'")]
    DuplicateField(String),

    /// Two methods with the same name and descriptor
    #[error("Duplicate method '{name}{descriptor}'")]
    DuplicateMethod {
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
    },

    /// Stack underflow
    #[error("Stack underflow in {method} at instruction {index}")]
    StackUnderflow {
        /// Method name and descriptor
        method: String,
        /// Instruction index
        index: usize,
    },

    /// Argument index out of range
    #[error("Invalid argument reference {arg} (max {max}) in {method} at instruction {index}")]
    InvalidArgRef {
        /// Method name and descriptor
        method: String,
        /// Referenced argument
        arg: u16,
        /// Number of parameters
        max: usize,
        /// Instruction index
        index: usize,
    },

    /// Field of the class itself that is not declared
    #[error("Unknown field {owner}.{field} in {method}")]
    UnknownField {
        /// Method name and descriptor
        method: String,
        /// Field owner
        owner: String,
        /// Field name
        field: String,
    },

    /// Return shape does not match the method's return type
    #[error("Return mismatch in {method} at instruction {index}")]
    ReturnMismatch {
        /// Method name and descriptor
        method: String,
        /// Instruction index
        index: usize,
    },

    /// Execution falls off the end of the code
    #[error("Execution falls off end of {0}")]
    FallOffEnd(String),

    /// Instructions after a terminator
    #[error("Unreachable code in {method} at instruction {index}")]
    UnreachableCode {
        /// Method name and descriptor
        method: String,
        /// Instruction index
        index: usize,
    },

    /// Malformed call descriptor in an instruction
    #[error("Bad descriptor in {method} at instruction {index}: {message}")]
    BadDescriptor {
        /// Method name and descriptor
        method: String,
        /// Instruction index
        index: usize,
        /// Parser message
        message: String,
    },
}

/// Verify a class
pub fn verify_class(class: &ClassFile) -> Result<(), VerifyError> {
    let mut field_names = FxHashSet::default();
    for field in &class.fields {
        if !field_names.insert(field.name.as_str()) {
            return Err(VerifyError::DuplicateField(field.name.clone()));
        }
    }

    let mut signatures = FxHashSet::default();
    for method in &class.methods {
        let descriptor = method.descriptor();
        if !signatures.insert((method.name.as_str(), descriptor.clone())) {
            return Err(VerifyError::DuplicateMethod {
                name: method.name.clone(),
                descriptor,
            });
        }
    }

    for method in &class.methods {
        if let Some(code) = &method.code {
            verify_code(class, method, code)?;
        }
    }

    Ok(())
}

/// Verify a single method body
fn verify_code(class: &ClassFile, method: &MethodDef, code: &[Insn]) -> Result<(), VerifyError> {
    let label = || format!("{}.{}{}", class.name, method.name, method.descriptor());
    let mut depth: usize = 0;

    for (index, insn) in code.iter().enumerate() {
        if index > 0 && code[index - 1].opcode().is_terminator() {
            return Err(VerifyError::UnreachableCode {
                method: label(),
                index,
            });
        }

        match insn {
            Insn::LoadArg(arg) if *arg as usize >= method.params.len() => {
                return Err(VerifyError::InvalidArgRef {
                    method: label(),
                    arg: *arg,
                    max: method.params.len(),
                    index,
                });
            }
            Insn::GetField { owner, name } | Insn::PutField { owner, name }
                if *owner == class.name && class.field(name).is_none() =>
            {
                return Err(VerifyError::UnknownField {
                    method: label(),
                    owner: owner.clone(),
                    field: name.clone(),
                });
            }
            Insn::Return if !method.return_type.is_void() => {
                return Err(VerifyError::ReturnMismatch {
                    method: label(),
                    index,
                });
            }
            Insn::ReturnValue if method.return_type.is_void() => {
                return Err(VerifyError::ReturnMismatch {
                    method: label(),
                    index,
                });
            }
            _ => {}
        }

        let (pops, pushes) = insn
            .stack_effect()
            .map_err(|e| VerifyError::BadDescriptor {
                method: label(),
                index,
                message: e.to_string(),
            })?;
        depth = depth
            .checked_sub(pops)
            .ok_or_else(|| VerifyError::StackUnderflow {
                method: label(),
                index,
            })?;
        depth += pushes;
    }

    match code.last() {
        Some(last) if last.opcode().is_terminator() => Ok(()),
        _ => Err(VerifyError::FallOffEnd(label())),
    }
}
