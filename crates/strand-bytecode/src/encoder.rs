//! Bytecode encoding and decoding utilities
//!
//! This module provides the low-level writer and reader used by the
//! executable format, including the fixed operand layout of each instruction.

use crate::opcode::{Instruction, Opcode};
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid constant tag
    #[error("Invalid constant tag {0} at offset {1}")]
    InvalidConstantTag(u8, usize),
}

/// Bytecode writer for encoding instructions
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit an opcode without operands
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit one instruction with its operands
    pub fn emit_instruction(&mut self, instruction: &Instruction) {
        self.emit_opcode(instruction.opcode());
        match *instruction {
            Instruction::PushBool(value) => self.emit_u8(value as u8),
            Instruction::PushInt(value) => self.emit_i64(value),
            Instruction::PushConst(index)
            | Instruction::PushFunction(index)
            | Instruction::Load(index)
            | Instruction::Store(index)
            | Instruction::Bind(index)
            | Instruction::MakeList(index)
            | Instruction::MakeMap(index) => self.emit_u32(index),
            Instruction::Jump(offset)
            | Instruction::JumpIfTrue(offset)
            | Instruction::JumpIfFalse(offset) => self.emit_i32(offset),
            Instruction::Call { function, argc } | Instruction::Async { function, argc } => {
                self.emit_u32(function);
                self.emit_u8(argc);
            }
            Instruction::CallForeign { symbol, argc } => {
                self.emit_u32(symbol);
                self.emit_u8(argc);
            }
            Instruction::CallValue { argc } => self.emit_u8(argc),
            _ => {}
        }
    }

    // ===== Patching =====

    /// Patch a previously emitted u32 value at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }

    /// Reserve space for a u32 value (returns offset for later patching)
    pub fn reserve_u32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_u32(0);
        offset
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader for decoding instructions
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.position + N > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = self.buffer[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }

    /// Read one instruction with its operands
    pub fn read_instruction(&mut self) -> Result<Instruction, DecodeError> {
        let opcode = self.read_opcode()?;
        let instruction = match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Pop => Instruction::Pop,
            Opcode::Dup => Instruction::Dup,
            Opcode::Swap => Instruction::Swap,
            Opcode::PushNull => Instruction::PushNull,
            Opcode::PushBool => Instruction::PushBool(self.read_u8()? != 0),
            Opcode::PushInt => Instruction::PushInt(self.read_i64()?),
            Opcode::PushConst => Instruction::PushConst(self.read_u32()?),
            Opcode::PushFunction => Instruction::PushFunction(self.read_u32()?),
            Opcode::Load => Instruction::Load(self.read_u32()?),
            Opcode::Store => Instruction::Store(self.read_u32()?),
            Opcode::Bind => Instruction::Bind(self.read_u32()?),
            Opcode::Add => Instruction::Add,
            Opcode::Sub => Instruction::Sub,
            Opcode::Mul => Instruction::Mul,
            Opcode::Div => Instruction::Div,
            Opcode::Mod => Instruction::Mod,
            Opcode::Neg => Instruction::Neg,
            Opcode::Eq => Instruction::Eq,
            Opcode::Ne => Instruction::Ne,
            Opcode::Lt => Instruction::Lt,
            Opcode::Le => Instruction::Le,
            Opcode::Gt => Instruction::Gt,
            Opcode::Ge => Instruction::Ge,
            Opcode::Not => Instruction::Not,
            Opcode::Jump => Instruction::Jump(self.read_i32()?),
            Opcode::JumpIfTrue => Instruction::JumpIfTrue(self.read_i32()?),
            Opcode::JumpIfFalse => Instruction::JumpIfFalse(self.read_i32()?),
            Opcode::Return => Instruction::Return,
            Opcode::Halt => Instruction::Halt,
            Opcode::Call => Instruction::Call {
                function: self.read_u32()?,
                argc: self.read_u8()?,
            },
            Opcode::CallValue => Instruction::CallValue {
                argc: self.read_u8()?,
            },
            Opcode::CallForeign => Instruction::CallForeign {
                symbol: self.read_u32()?,
                argc: self.read_u8()?,
            },
            Opcode::Async => Instruction::Async {
                function: self.read_u32()?,
                argc: self.read_u8()?,
            },
            Opcode::Await => Instruction::Await,
            Opcode::MakeList => Instruction::MakeList(self.read_u32()?),
            Opcode::MakeMap => Instruction::MakeMap(self.read_u32()?),
            Opcode::Concat => Instruction::Concat,
            Opcode::First => Instruction::First,
            Opcode::Rest => Instruction::Rest,
            Opcode::Nth => Instruction::Nth,
            Opcode::Len => Instruction::Len,
            Opcode::IsAtom => Instruction::IsAtom,
            Opcode::IsNull => Instruction::IsNull,
            Opcode::Print => Instruction::Print,
        };
        Ok(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_emission() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u32(0xABCD_EF01);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], 0x42);
        assert_eq!(bytes[1], 0x01); // Little-endian
        assert_eq!(bytes[2], 0xEF);
        assert_eq!(bytes[3], 0xCD);
        assert_eq!(bytes[4], 0xAB);
    }

    #[test]
    fn test_instruction_layout() {
        let mut writer = BytecodeWriter::new();
        writer.emit_instruction(&Instruction::Async { function: 3, argc: 2 });

        assert_eq!(writer.buffer(), &[Opcode::Async.to_u8(), 3, 0, 0, 0, 2]);
    }

    #[test]
    fn test_read_instructions() {
        let mut writer = BytecodeWriter::new();
        writer.emit_instruction(&Instruction::PushInt(-5));
        writer.emit_instruction(&Instruction::JumpIfFalse(-2));
        writer.emit_instruction(&Instruction::CallForeign { symbol: 9, argc: 1 });
        writer.emit_instruction(&Instruction::Await);
        let bytes = writer.into_bytes();

        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_instruction().unwrap(), Instruction::PushInt(-5));
        assert_eq!(reader.read_instruction().unwrap(), Instruction::JumpIfFalse(-2));
        assert_eq!(
            reader.read_instruction().unwrap(),
            Instruction::CallForeign { symbol: 9, argc: 1 }
        );
        assert_eq!(reader.read_instruction().unwrap(), Instruction::Await);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_read_past_end() {
        let bytes = [Opcode::PushInt.to_u8(), 1, 2];
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            reader.read_instruction(),
            Err(DecodeError::UnexpectedEnd(1))
        ));
    }

    #[test]
    fn test_invalid_opcode() {
        let bytes = [0xEE];
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            reader.read_opcode(),
            Err(DecodeError::InvalidOpcode(0xEE, 0))
        ));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut writer = BytecodeWriter::new();
        writer.emit_string("chain1");
        let bytes = writer.into_bytes();

        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_string().unwrap(), "chain1");
    }

    #[test]
    fn test_patch_u32() {
        let mut writer = BytecodeWriter::new();
        let offset = writer.reserve_u32();
        writer.patch_u32(offset, 7);
        assert_eq!(writer.buffer(), &[7, 0, 0, 0]);
    }
}
