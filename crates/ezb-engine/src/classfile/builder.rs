//! Code builder
//!
//! Small emission API used by the enhancer to synthesize method bodies. It
//! tracks the operand stack depth so that generated code is balanced by
//! construction; [`CodeBuilder::finish`] reports an unbalanced body instead of
//! producing it.

use ezb_sdk::descriptor::method_descriptor;
use ezb_sdk::TypeDesc;

use super::insn::Insn;

/// Errors raised while building code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    /// Instruction would pop more than is on the stack
    #[error("Stack underflow emitting {insn} in {method}")]
    StackUnderflow {
        /// Method being built
        method: String,
        /// Offending instruction
        insn: String,
    },

    /// Bad call descriptor
    #[error("Bad descriptor in {method}: {message}")]
    BadDescriptor {
        /// Method being built
        method: String,
        /// Parser message
        message: String,
    },

    /// Body does not end with a terminator
    #[error("Method {0} does not end with a terminator")]
    Unterminated(String),
}

/// Builder for one method body
#[derive(Debug)]
pub struct CodeBuilder {
    method: String,
    code: Vec<Insn>,
    depth: usize,
    max_depth: usize,
    error: Option<CodegenError>,
}

impl CodeBuilder {
    /// Start a body for `method` (used in diagnostics)
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            code: Vec::new(),
            depth: 0,
            max_depth: 0,
            error: None,
        }
    }

    /// Emit an instruction
    pub fn emit(&mut self, insn: Insn) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        match insn.stack_effect() {
            Ok((pops, pushes)) => match self.depth.checked_sub(pops) {
                Some(depth) => {
                    self.depth = depth + pushes;
                    self.max_depth = self.max_depth.max(self.depth);
                    self.code.push(insn);
                }
                None => {
                    self.error = Some(CodegenError::StackUnderflow {
                        method: self.method.clone(),
                        insn: insn.to_string(),
                    });
                }
            },
            Err(e) => {
                self.error = Some(CodegenError::BadDescriptor {
                    method: self.method.clone(),
                    message: e.to_string(),
                });
            }
        }
        self
    }

    /// `this`
    pub fn load_this(&mut self) -> &mut Self {
        self.emit(Insn::LoadThis)
    }

    /// Push argument `index`
    pub fn load_arg(&mut self, index: u16) -> &mut Self {
        self.emit(Insn::LoadArg(index))
    }

    /// Push every argument in order
    pub fn load_args(&mut self, count: usize) -> &mut Self {
        for index in 0..count {
            self.load_arg(index as u16);
        }
        self
    }

    /// Push the zero value of `ty`
    pub fn load_default(&mut self, ty: &TypeDesc) -> &mut Self {
        let insn = match ty {
            TypeDesc::Boolean => Insn::ConstBool(false),
            TypeDesc::Byte | TypeDesc::Char | TypeDesc::Short | TypeDesc::Int => Insn::ConstInt(0),
            TypeDesc::Long => Insn::ConstLong(0),
            TypeDesc::Float | TypeDesc::Double => Insn::ConstDouble(0.0),
            TypeDesc::Void | TypeDesc::Object(_) | TypeDesc::Array(_) => Insn::ConstNull,
        };
        self.emit(insn)
    }

    /// Read `owner.name` from the object on the stack
    pub fn get_field(&mut self, owner: &str, name: &str) -> &mut Self {
        self.emit(Insn::GetField {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Store the top value into `owner.name` of the object below it
    pub fn put_field(&mut self, owner: &str, name: &str) -> &mut Self {
        self.emit(Insn::PutField {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Construct `class`
    pub fn new_object(&mut self, class: &str) -> &mut Self {
        self.emit(Insn::New {
            class: class.to_string(),
        })
    }

    /// Virtual call
    pub fn invoke_virtual(&mut self, owner: &str, name: &str, params: &[TypeDesc], ret: &TypeDesc) -> &mut Self {
        self.emit(Insn::InvokeVirtual {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: method_descriptor(params, ret),
        })
    }

    /// Non-virtual call
    pub fn invoke_special(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Insn::InvokeSpecial {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }

    /// Host helper call
    pub fn invoke_static(&mut self, owner: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Insn::InvokeStatic {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }

    /// Forward through the receiver's handler
    pub fn invoke_handler(&mut self, declaring: &str, name: &str, desc: &str) -> &mut Self {
        self.emit(Insn::InvokeHandler {
            declaring: declaring.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }

    /// Raise `class` with `message`
    pub fn throw(&mut self, class: &str, message: impl Into<String>) -> &mut Self {
        self.emit(Insn::Throw {
            class: class.to_string(),
            message: message.into(),
        })
    }

    /// Return matching `ret`: the top value, or nothing for void
    pub fn return_as(&mut self, ret: &TypeDesc) -> &mut Self {
        if ret.is_void() {
            self.emit(Insn::Return)
        } else {
            self.emit(Insn::ReturnValue)
        }
    }

    /// Current stack depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Deepest stack seen so far
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Finish the body
    pub fn finish(&mut self) -> Result<Vec<Insn>, CodegenError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        match self.code.last() {
            Some(last) if last.opcode().is_terminator() => Ok(std::mem::take(&mut self.code)),
            _ => Err(CodegenError::Unterminated(self.method.clone())),
        }
    }
}
