//! Executable verification
//!
//! Executables arrive already validated by the compiler. Verification only
//! rejects what would otherwise make instruction dispatch undefined: operand
//! indices out of range and control transfers outside the code.

use crate::executable::Executable;
use crate::opcode::Instruction;

/// Executable verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Computed absolute target
        target: i64,
        /// Offset of the jump instruction
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        /// Referenced index
        index: u32,
        /// Offset of the instruction
        offset: usize,
    },

    /// Invalid symbol reference
    #[error("Invalid symbol reference: index {index} at offset {offset}")]
    InvalidSymbolRef {
        /// Referenced index
        index: u32,
        /// Offset of the instruction
        offset: usize,
    },

    /// Invalid function reference
    #[error("Invalid function reference: index {index} at offset {offset}")]
    InvalidFunctionRef {
        /// Referenced index
        index: u32,
        /// Offset of the instruction
        offset: usize,
    },

    /// Function entry point outside the code
    #[error("Function {name} has entry point {entry} outside code of length {len}")]
    InvalidEntryPoint {
        /// Function name
        name: String,
        /// Entry point
        entry: usize,
        /// Code length
        len: usize,
    },

    /// Function parameter names an unknown symbol
    #[error("Function {name} has an invalid parameter symbol {index}")]
    InvalidParameter {
        /// Function name
        name: String,
        /// Symbol index
        index: u32,
    },

    /// Entry function does not exist
    #[error("Entry function not found: {0}")]
    MissingEntry(String),

    /// Function referenced by the builder was never defined
    #[error("Function declared but never defined: {0}")]
    UndefinedFunction(String),

    /// Label used by the builder was never bound
    #[error("Label {0} used but never bound")]
    UnboundLabel(usize),
}

/// Verify an executable
pub fn verify_executable(exe: &Executable) -> Result<(), VerifyError> {
    if exe.entry_function().is_none() {
        return Err(VerifyError::MissingEntry(exe.entry.clone()));
    }

    for function in &exe.functions {
        if function.entry >= exe.code.len() {
            return Err(VerifyError::InvalidEntryPoint {
                name: function.name.clone(),
                entry: function.entry,
                len: exe.code.len(),
            });
        }
        for &param in &function.params {
            if exe.symbol(param).is_none() {
                return Err(VerifyError::InvalidParameter {
                    name: function.name.clone(),
                    index: param,
                });
            }
        }
    }

    for (offset, instruction) in exe.code.iter().enumerate() {
        verify_instruction(exe, offset, instruction)?;
    }

    Ok(())
}

fn verify_instruction(
    exe: &Executable,
    offset: usize,
    instruction: &Instruction,
) -> Result<(), VerifyError> {
    match *instruction {
        Instruction::PushConst(index) => {
            if exe.constants.constant(index).is_none() {
                return Err(VerifyError::InvalidConstantRef { index, offset });
            }
        }
        Instruction::Load(index)
        | Instruction::Store(index)
        | Instruction::Bind(index)
        | Instruction::CallForeign { symbol: index, .. } => {
            if exe.symbol(index).is_none() {
                return Err(VerifyError::InvalidSymbolRef { index, offset });
            }
        }
        Instruction::PushFunction(index)
        | Instruction::Call { function: index, .. }
        | Instruction::Async { function: index, .. } => {
            if exe.function(index).is_none() {
                return Err(VerifyError::InvalidFunctionRef { index, offset });
            }
        }
        Instruction::Jump(delta) | Instruction::JumpIfTrue(delta) | Instruction::JumpIfFalse(delta) => {
            // Jumping to code.len() is allowed: it ends the program.
            let target = offset as i64 + 1 + delta as i64;
            if target < 0 || target > exe.code.len() as i64 {
                return Err(VerifyError::InvalidJumpTarget { target, offset });
            }
        }
        _ => {}
    }
    Ok(())
}
