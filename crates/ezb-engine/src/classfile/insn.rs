//! Typed instructions
//!
//! Method code is a straight-line list of [`Insn`]s. There are no jumps:
//! generated code only ever forwards, wires fields or raises, so every method
//! body is a single basic block ending with a terminator.

use std::fmt;

use ezb_sdk::descriptor::parse_method_descriptor;
use ezb_sdk::DescriptorError;

use super::encoder::{ClassReader, ClassWriter, DecodeError};
use super::opcode::Opcode;

/// One instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// No operation
    Nop,
    /// Pop top value
    Pop,
    /// Duplicate top value
    Dup,
    /// Push null
    ConstNull,
    /// Push a boolean
    ConstBool(bool),
    /// Push an int
    ConstInt(i32),
    /// Push a long
    ConstLong(i64),
    /// Push a double
    ConstDouble(f64),
    /// Push a string
    ConstString(String),
    /// Push the receiver
    LoadThis,
    /// Push an argument (0-based, receiver excluded)
    LoadArg(u16),
    /// Pop an object, push one of its fields
    GetField {
        /// Class declaring the field
        owner: String,
        /// Field name
        name: String,
    },
    /// Pop a value and an object, store the value into the field
    PutField {
        /// Class declaring the field
        owner: String,
        /// Field name
        name: String,
    },
    /// Construct an object with its no-argument constructor and push it
    New {
        /// Class to construct
        class: String,
    },
    /// Pop arguments and receiver, dispatch on the receiver's class
    InvokeVirtual {
        /// Static owner
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        desc: String,
    },
    /// Pop arguments and receiver, resolve starting at `owner`
    InvokeSpecial {
        /// Class to resolve from
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        desc: String,
    },
    /// Pop arguments, call a host helper
    InvokeStatic {
        /// Helper class
        owner: String,
        /// Helper name
        name: String,
        /// Helper descriptor
        desc: String,
    },
    /// Pop arguments and receiver, forward through the receiver's invocation handler
    InvokeHandler {
        /// Class the method is looked up on
        declaring: String,
        /// Method name
        name: String,
        /// Method descriptor
        desc: String,
    },
    /// Raise a new exception of a well-known class
    Throw {
        /// Exception class
        class: String,
        /// Detail message
        message: String,
    },
    /// Return from a void method
    Return,
    /// Return the top of stack
    ReturnValue,
}

impl Insn {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Insn::Nop => Opcode::Nop,
            Insn::Pop => Opcode::Pop,
            Insn::Dup => Opcode::Dup,
            Insn::ConstNull => Opcode::ConstNull,
            Insn::ConstBool(_) => Opcode::ConstBool,
            Insn::ConstInt(_) => Opcode::ConstInt,
            Insn::ConstLong(_) => Opcode::ConstLong,
            Insn::ConstDouble(_) => Opcode::ConstDouble,
            Insn::ConstString(_) => Opcode::ConstString,
            Insn::LoadThis => Opcode::LoadThis,
            Insn::LoadArg(_) => Opcode::LoadArg,
            Insn::GetField { .. } => Opcode::GetField,
            Insn::PutField { .. } => Opcode::PutField,
            Insn::New { .. } => Opcode::New,
            Insn::InvokeVirtual { .. } => Opcode::InvokeVirtual,
            Insn::InvokeSpecial { .. } => Opcode::InvokeSpecial,
            Insn::InvokeStatic { .. } => Opcode::InvokeStatic,
            Insn::InvokeHandler { .. } => Opcode::InvokeHandler,
            Insn::Throw { .. } => Opcode::Throw,
            Insn::Return => Opcode::Return,
            Insn::ReturnValue => Opcode::ReturnValue,
        }
    }

    /// Number of values popped and pushed
    pub fn stack_effect(&self) -> Result<(usize, usize), DescriptorError> {
        let call_effect = |desc: &str, receiver: usize| -> Result<(usize, usize), DescriptorError> {
            let (params, ret) = parse_method_descriptor(desc)?;
            Ok((params.len() + receiver, usize::from(!ret.is_void())))
        };
        Ok(match self {
            Insn::Nop | Insn::Return | Insn::Throw { .. } => (0, 0),
            Insn::Pop | Insn::ReturnValue => (1, 0),
            Insn::Dup => (1, 2),
            Insn::ConstNull
            | Insn::ConstBool(_)
            | Insn::ConstInt(_)
            | Insn::ConstLong(_)
            | Insn::ConstDouble(_)
            | Insn::ConstString(_)
            | Insn::LoadThis
            | Insn::LoadArg(_)
            | Insn::New { .. } => (0, 1),
            Insn::GetField { .. } => (1, 1),
            Insn::PutField { .. } => (2, 0),
            Insn::InvokeVirtual { desc, .. }
            | Insn::InvokeSpecial { desc, .. }
            | Insn::InvokeHandler { desc, .. } => call_effect(desc, 1)?,
            Insn::InvokeStatic { desc, .. } => call_effect(desc, 0)?,
        })
    }

    /// Encode into `writer`
    pub fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_u8(self.opcode().to_u8());
        match self {
            Insn::ConstBool(b) => writer.emit_u8(u8::from(*b)),
            Insn::ConstInt(v) => writer.emit_i32(*v),
            Insn::ConstLong(v) => writer.emit_i64(*v),
            Insn::ConstDouble(v) => writer.emit_f64(*v),
            Insn::ConstString(s) => writer.emit_string(s),
            Insn::LoadArg(index) => writer.emit_u16(*index),
            Insn::GetField { owner, name } | Insn::PutField { owner, name } => {
                writer.emit_string(owner);
                writer.emit_string(name);
            }
            Insn::New { class } => writer.emit_string(class),
            Insn::InvokeVirtual { owner, name, desc }
            | Insn::InvokeSpecial { owner, name, desc }
            | Insn::InvokeStatic { owner, name, desc }
            | Insn::InvokeHandler {
                declaring: owner,
                name,
                desc,
            } => {
                writer.emit_string(owner);
                writer.emit_string(name);
                writer.emit_string(desc);
            }
            Insn::Throw { class, message } => {
                writer.emit_string(class);
                writer.emit_string(message);
            }
            Insn::Nop
            | Insn::Pop
            | Insn::Dup
            | Insn::ConstNull
            | Insn::LoadThis
            | Insn::Return
            | Insn::ReturnValue => {}
        }
    }

    /// Decode one instruction
    pub fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))?;
        Ok(match opcode {
            Opcode::Nop => Insn::Nop,
            Opcode::Pop => Insn::Pop,
            Opcode::Dup => Insn::Dup,
            Opcode::ConstNull => Insn::ConstNull,
            Opcode::ConstBool => Insn::ConstBool(reader.read_u8()? != 0),
            Opcode::ConstInt => Insn::ConstInt(reader.read_i32()?),
            Opcode::ConstLong => Insn::ConstLong(reader.read_i64()?),
            Opcode::ConstDouble => Insn::ConstDouble(reader.read_f64()?),
            Opcode::ConstString => Insn::ConstString(reader.read_string()?),
            Opcode::LoadThis => Insn::LoadThis,
            Opcode::LoadArg => Insn::LoadArg(reader.read_u16()?),
            Opcode::GetField => Insn::GetField {
                owner: reader.read_string()?,
                name: reader.read_string()?,
            },
            Opcode::PutField => Insn::PutField {
                owner: reader.read_string()?,
                name: reader.read_string()?,
            },
            Opcode::New => Insn::New {
                class: reader.read_string()?,
            },
            Opcode::InvokeVirtual => Insn::InvokeVirtual {
                owner: reader.read_string()?,
                name: reader.read_string()?,
                desc: reader.read_string()?,
            },
            Opcode::InvokeSpecial => Insn::InvokeSpecial {
                owner: reader.read_string()?,
                name: reader.read_string()?,
                desc: reader.read_string()?,
            },
            Opcode::InvokeStatic => Insn::InvokeStatic {
                owner: reader.read_string()?,
                name: reader.read_string()?,
                desc: reader.read_string()?,
            },
            Opcode::InvokeHandler => Insn::InvokeHandler {
                declaring: reader.read_string()?,
                name: reader.read_string()?,
                desc: reader.read_string()?,
            },
            Opcode::Throw => Insn::Throw {
                class: reader.read_string()?,
                message: reader.read_string()?,
            },
            Opcode::Return => Insn::Return,
            Opcode::ReturnValue => Insn::ReturnValue,
        })
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match self {
            Insn::ConstBool(b) => write!(f, "{} {}", name, b),
            Insn::ConstInt(v) => write!(f, "{} {}", name, v),
            Insn::ConstLong(v) => write!(f, "{} {}", name, v),
            Insn::ConstDouble(v) => write!(f, "{} {}", name, v),
            Insn::ConstString(s) => write!(f, "{} {:?}", name, s),
            Insn::LoadArg(i) => write!(f, "{} {}", name, i),
            Insn::GetField { owner, name: field } | Insn::PutField { owner, name: field } => {
                write!(f, "{} {}.{}", name, owner, field)
            }
            Insn::New { class } => write!(f, "{} {}", name, class),
            Insn::InvokeVirtual { owner, name: m, desc }
            | Insn::InvokeSpecial { owner, name: m, desc }
            | Insn::InvokeStatic { owner, name: m, desc }
            | Insn::InvokeHandler {
                declaring: owner,
                name: m,
                desc,
            } => write!(f, "{} {}.{}{}", name, owner, m, desc),
            Insn::Throw { class, .. } => write!(f, "{} {}", name, class),
            _ => write!(f, "{}", name),
        }
    }
}

/// Encode a code list (count-prefixed)
pub fn encode_code(code: &[Insn], writer: &mut ClassWriter) {
    writer.emit_u32(code.len() as u32);
    for insn in code {
        insn.encode(writer);
    }
}

/// Decode a count-prefixed code list
pub fn decode_code(reader: &mut ClassReader<'_>) -> Result<Vec<Insn>, DecodeError> {
    let count = reader.read_u32()? as usize;
    let mut code = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        code.push(Insn::decode(reader)?);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_effects() {
        assert_eq!(Insn::Dup.stack_effect().unwrap(), (1, 2));
        let call = Insn::InvokeVirtual {
            owner: "A".into(),
            name: "add".into(),
            desc: "(II)I".into(),
        };
        assert_eq!(call.stack_effect().unwrap(), (3, 1));
        let helper = Insn::InvokeStatic {
            owner: "H".into(),
            name: "remove".into(),
            desc: "(Ljava/lang/Object;)V".into(),
        };
        assert_eq!(helper.stack_effect().unwrap(), (1, 0));
    }

    #[test]
    fn test_bad_descriptor_in_stack_effect() {
        let call = Insn::InvokeStatic {
            owner: "H".into(),
            name: "x".into(),
            desc: "nope".into(),
        };
        assert!(call.stack_effect().is_err());
    }

    #[test]
    fn test_code_decodes_what_it_encodes() {
        let code = vec![
            Insn::LoadThis,
            Insn::InvokeSpecial {
                owner: "java.lang.Object".into(),
                name: "<init>".into(),
                desc: "()V".into(),
            },
            Insn::ConstLong(-9),
            Insn::Throw {
                class: "javax.ejb.EJBException".into(),
                message: "no".into(),
            },
        ];
        let mut writer = ClassWriter::new();
        encode_code(&code, &mut writer);
        let bytes = writer.into_bytes();
        let decoded = decode_code(&mut ClassReader::new(&bytes)).unwrap();
        assert_eq!(decoded, code);
    }

    #[test]
    fn test_display() {
        let insn = Insn::GetField {
            owner: "A".into(),
            name: "f".into(),
        };
        assert_eq!(insn.to_string(), "GET_FIELD A.f");
    }
}
