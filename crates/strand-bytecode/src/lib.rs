//! Strand VM Bytecode Definitions
//!
//! This crate provides the instruction set, the executable format (function
//! table, constant pool, binary encoding) and the verifier consumed by the
//! Strand virtual machine.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod constants;
pub mod encoder;
pub mod executable;
pub mod opcode;
pub mod verify;

pub use builder::{ExecutableBuilder, Label};
pub use constants::{Constant, ConstantPool};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use executable::{Executable, ExecutableError, FunctionEntry};
pub use opcode::{Instruction, Opcode};
pub use verify::{verify_executable, VerifyError};
