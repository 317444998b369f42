//! Executable format
//!
//! An [`Executable`] is the immutable input of a program run: a flat
//! instruction sequence, a table of named function entry points, and the
//! constant pool with interned binding names. It is produced by an external
//! compiler (or [`crate::ExecutableBuilder`]) and shared by every thread.

use crate::constants::ConstantPool;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::Instruction;
use std::fmt::Write as _;
use thiserror::Error;

/// Magic number for Strand executables: "STRD"
pub const MAGIC: [u8; 4] = *b"STRD";

/// Current executable format version
pub const VERSION: u32 = 1;

/// Size of the fixed header: magic + version + flags + checksum
const HEADER_SIZE: usize = 16;

/// Executable encoding/decoding errors
#[derive(Debug, Error)]
pub enum ExecutableError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected STRD, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },
}

/// A named top-level function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEntry {
    /// Function name
    pub name: String,
    /// Index of the first instruction in [`Executable::code`]
    pub entry: usize,
    /// Parameter names (symbol indices), bound in order as the frame's locals
    pub params: Vec<u32>,
}

impl FunctionEntry {
    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u32(self.entry as u32);
        writer.emit_u32(self.params.len() as u32);
        for param in &self.params {
            writer.emit_u32(*param);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let entry = reader.read_u32()? as usize;
        let param_count = reader.read_u32()? as usize;
        let mut params = Vec::with_capacity(param_count.min(reader.remaining()));
        for _ in 0..param_count {
            params.push(reader.read_u32()?);
        }
        Ok(Self {
            name,
            entry,
            params,
        })
    }
}

/// A compiled Strand program
#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    /// Program name
    pub name: String,
    /// Format flags
    pub flags: u32,
    /// Literals and binding names
    pub constants: ConstantPool,
    /// Function table
    pub functions: Vec<FunctionEntry>,
    /// Instruction sequence shared by all functions
    pub code: Vec<Instruction>,
    /// Name of the designated entry function
    pub entry: String,
}

impl Executable {
    /// Create an empty executable
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: 0,
            constants: ConstantPool::new(),
            functions: Vec::new(),
            code: Vec::new(),
            entry: "main".to_string(),
        }
    }

    /// Look up a function by table index
    pub fn function(&self, index: u32) -> Option<&FunctionEntry> {
        self.functions.get(index as usize)
    }

    /// Find a function's table index by name
    pub fn function_index(&self, name: &str) -> Option<u32> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
    }

    /// The designated entry function
    pub fn entry_function(&self) -> Option<(u32, &FunctionEntry)> {
        let index = self.function_index(&self.entry)?;
        Some((index, &self.functions[index as usize]))
    }

    /// Look up a symbol by index
    pub fn symbol(&self, index: u32) -> Option<&str> {
        self.constants.symbol(index)
    }

    /// Fetch the instruction at `ip`
    #[inline]
    pub fn instruction(&self, ip: usize) -> Option<&Instruction> {
        self.code.get(ip)
    }

    /// Encode the executable to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Name and entry function name
    /// - Constant pool (constants, then symbols)
    /// - Function table
    /// - Instruction stream (count + encoded instructions)
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.emit_bytes(&MAGIC);
        writer.emit_u32(VERSION);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.reserve_u32();

        writer.emit_string(&self.name);
        writer.emit_string(&self.entry);
        self.constants.encode(&mut writer);

        writer.emit_u32(self.functions.len() as u32);
        for function in &self.functions {
            function.encode(&mut writer);
        }

        writer.emit_u32(self.code.len() as u32);
        for instruction in &self.code {
            writer.emit_instruction(instruction);
        }

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer()[HEADER_SIZE..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode an executable from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ExecutableError> {
        let mut reader = BytecodeReader::new(data);

        let bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes);
        if magic != MAGIC {
            return Err(ExecutableError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ExecutableError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_SIZE..]);
        if stored_checksum != calculated_checksum {
            return Err(ExecutableError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let name = reader.read_string()?;
        let entry = reader.read_string()?;
        let constants = ConstantPool::decode(&mut reader)?;

        let function_count = reader.read_u32()? as usize;
        let mut functions = Vec::with_capacity(function_count.min(reader.remaining()));
        for _ in 0..function_count {
            functions.push(FunctionEntry::decode(&mut reader)?);
        }

        let code_len = reader.read_u32()? as usize;
        let mut code = Vec::with_capacity(code_len.min(reader.remaining()));
        for _ in 0..code_len {
            code.push(reader.read_instruction()?);
        }

        Ok(Self {
            name,
            flags,
            constants,
            functions,
            code,
            entry,
        })
    }

    /// Human-readable disassembly
    pub fn listing(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; executable {} (entry: {})", self.name, self.entry);

        for (ip, instruction) in self.code.iter().enumerate() {
            for function in self.functions.iter().filter(|f| f.entry == ip) {
                let params: Vec<&str> = function
                    .params
                    .iter()
                    .map(|p| self.symbol(*p).unwrap_or("?"))
                    .collect();
                let _ = writeln!(out, "{}({}):", function.name, params.join(", "));
            }
            let _ = writeln!(out, "  {:04}  {}", ip, self.describe(ip, instruction));
        }

        out
    }

    fn describe(&self, ip: usize, instruction: &Instruction) -> String {
        let name = instruction.opcode().name();
        let symbol = |index: &u32| self.symbol(*index).unwrap_or("?").to_string();
        let function = |index: &u32| {
            self.function(*index)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("#{}", index))
        };

        match instruction {
            Instruction::PushBool(value) => format!("{} {}", name, value),
            Instruction::PushInt(value) => format!("{} {}", name, value),
            Instruction::PushConst(index) => match self.constants.constant(*index) {
                Some(constant) => format!("{} {}", name, constant),
                None => format!("{} #{}", name, index),
            },
            Instruction::PushFunction(index) => format!("{} {}", name, function(index)),
            Instruction::Load(index) | Instruction::Store(index) | Instruction::Bind(index) => {
                format!("{} {}", name, symbol(index))
            }
            Instruction::Jump(_) | Instruction::JumpIfTrue(_) | Instruction::JumpIfFalse(_) => {
                match instruction.jump_target(ip) {
                    Some(target) => format!("{} -> {:04}", name, target),
                    None => format!("{} -> ????", name),
                }
            }
            Instruction::Call { function: index, argc }
            | Instruction::Async { function: index, argc } => {
                format!("{} {}/{}", name, function(index), argc)
            }
            Instruction::CallForeign { symbol: index, argc } => {
                format!("{} {}/{}", name, symbol(index), argc)
            }
            Instruction::CallValue { argc } => format!("{} {}", name, argc),
            Instruction::MakeList(count) | Instruction::MakeMap(count) => {
                format!("{} {}", name, count)
            }
            _ => name.to_string(),
        }
    }
}
