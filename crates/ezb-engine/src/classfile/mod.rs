//! Class format
//!
//! The engine's compact stand-in for compiled bean classes: a [`ClassFile`]
//! describes fields and methods, method code is a list of typed [`Insn`]s,
//! and the binary encoding carries CRC32 and SHA-256 checksums.

pub mod builder;
pub mod class;
pub mod encoder;
pub mod insn;
pub mod opcode;
pub mod verify;

pub use builder::{CodeBuilder, CodegenError};
pub use class::{class_digest, flags, AccessFlags, ClassFile, ClassFileError, FieldDef, MethodDef};
pub use encoder::{ClassReader, ClassWriter, DecodeError};
pub use insn::Insn;
pub use opcode::Opcode;
pub use verify::{verify_class, VerifyError};
