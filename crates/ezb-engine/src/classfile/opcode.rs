//! Opcodes of the class format
//!
//! Opcodes are single bytes grouped by category:
//! - 0x00-0x0F: stack manipulation and constants
//! - 0x10-0x1F: receiver and argument access
//! - 0xA0-0xAF: calls and returns
//! - 0xB0-0xBF: object operations
//! - 0xE0-0xEF: exceptions

/// Opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value
    Pop = 0x01,
    /// Duplicate top value
    Dup = 0x02,
    /// Push null
    ConstNull = 0x04,
    /// Push boolean (operand: u8)
    ConstBool = 0x05,
    /// Push int (operand: i32)
    ConstInt = 0x07,
    /// Push long (operand: i64)
    ConstLong = 0x08,
    /// Push double (operand: f64)
    ConstDouble = 0x09,
    /// Push string (operand: string)
    ConstString = 0x0A,

    // ===== Receiver & Arguments (0x10-0x1F) =====
    /// Push `this`
    LoadThis = 0x10,
    /// Push argument (operand: u16 index)
    LoadArg = 0x11,

    // ===== Calls (0xA0-0xAF) =====
    /// Virtual call (operands: owner, name, descriptor)
    InvokeVirtual = 0xA0,
    /// Non-virtual call resolved from owner (operands: owner, name, descriptor)
    InvokeSpecial = 0xA1,
    /// Static helper call serviced by the host (operands: owner, name, descriptor)
    InvokeStatic = 0xA2,
    /// Forward through the receiver's invocation handler (operands: declaring, name, descriptor)
    InvokeHandler = 0xA3,
    /// Return from a void method
    Return = 0xA8,
    /// Return top of stack
    ReturnValue = 0xA9,

    // ===== Objects (0xB0-0xBF) =====
    /// Construct an object (operand: class)
    New = 0xB0,
    /// Read a field (operands: owner, name)
    GetField = 0xB1,
    /// Write a field (operands: owner, name)
    PutField = 0xB2,

    // ===== Exceptions (0xE0-0xEF) =====
    /// Raise a new exception (operands: class, message)
    Throw = 0xE0,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstBool),
            0x07 => Some(Self::ConstInt),
            0x08 => Some(Self::ConstLong),
            0x09 => Some(Self::ConstDouble),
            0x0A => Some(Self::ConstString),
            0x10 => Some(Self::LoadThis),
            0x11 => Some(Self::LoadArg),
            0xA0 => Some(Self::InvokeVirtual),
            0xA1 => Some(Self::InvokeSpecial),
            0xA2 => Some(Self::InvokeStatic),
            0xA3 => Some(Self::InvokeHandler),
            0xA8 => Some(Self::Return),
            0xA9 => Some(Self::ReturnValue),
            0xB0 => Some(Self::New),
            0xB1 => Some(Self::GetField),
            0xB2 => Some(Self::PutField),
            0xE0 => Some(Self::Throw),
            _ => None,
        }
    }

    /// Encode as a byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstBool => "CONST_BOOL",
            Self::ConstInt => "CONST_INT",
            Self::ConstLong => "CONST_LONG",
            Self::ConstDouble => "CONST_DOUBLE",
            Self::ConstString => "CONST_STRING",
            Self::LoadThis => "LOAD_THIS",
            Self::LoadArg => "LOAD_ARG",
            Self::InvokeVirtual => "INVOKE_VIRTUAL",
            Self::InvokeSpecial => "INVOKE_SPECIAL",
            Self::InvokeStatic => "INVOKE_STATIC",
            Self::InvokeHandler => "INVOKE_HANDLER",
            Self::Return => "RETURN",
            Self::ReturnValue => "RETURN_VALUE",
            Self::New => "NEW",
            Self::GetField => "GET_FIELD",
            Self::PutField => "PUT_FIELD",
            Self::Throw => "THROW",
        }
    }

    /// Whether execution cannot continue past this opcode
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::ReturnValue | Self::Throw)
    }

    /// Whether this opcode is a call
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::InvokeVirtual | Self::InvokeSpecial | Self::InvokeStatic | Self::InvokeHandler
        )
    }
}
