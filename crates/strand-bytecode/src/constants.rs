//! Constant pool and symbol table

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use std::fmt;

/// A literal stored in the constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
}

impl Constant {
    const TAG_INT: u8 = 0;
    const TAG_FLOAT: u8 = 1;
    const TAG_STR: u8 = 2;

    fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            Constant::Int(value) => {
                writer.emit_u8(Self::TAG_INT);
                writer.emit_i64(*value);
            }
            Constant::Float(value) => {
                writer.emit_u8(Self::TAG_FLOAT);
                writer.emit_f64(*value);
            }
            Constant::Str(value) => {
                writer.emit_u8(Self::TAG_STR);
                writer.emit_string(value);
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            Self::TAG_INT => Ok(Constant::Int(reader.read_i64()?)),
            Self::TAG_FLOAT => Ok(Constant::Float(reader.read_f64()?)),
            Self::TAG_STR => Ok(Constant::Str(reader.read_string()?)),
            tag => Err(DecodeError::InvalidConstantTag(tag, offset)),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{}", value),
            Constant::Float(value) => write!(f, "{:?}", value),
            Constant::Str(value) => write!(f, "{:?}", value),
        }
    }
}

/// Literals plus interned binding names
///
/// Symbols name local bindings, function parameters and foreign functions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// Literal values
    pub constants: Vec<Constant>,
    /// Interned names
    pub symbols: Vec<String>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant, reusing an existing equal entry
    pub fn add_constant(&mut self, constant: Constant) -> u32 {
        if let Some(index) = self.constants.iter().position(|c| *c == constant) {
            return index as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    /// Intern a symbol
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(index) = self.symbols.iter().position(|s| s == name) {
            return index as u32;
        }
        self.symbols.push(name.to_string());
        (self.symbols.len() - 1) as u32
    }

    /// Look up a constant by index
    pub fn constant(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Look up a symbol by index
    pub fn symbol(&self, index: u32) -> Option<&str> {
        self.symbols.get(index as usize).map(String::as_str)
    }

    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.constants.len() as u32);
        for constant in &self.constants {
            constant.encode(writer);
        }
        writer.emit_u32(self.symbols.len() as u32);
        for symbol in &self.symbols {
            writer.emit_string(symbol);
        }
    }

    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let constant_count = reader.read_u32()? as usize;
        let mut constants = Vec::with_capacity(constant_count.min(reader.remaining()));
        for _ in 0..constant_count {
            constants.push(Constant::decode(reader)?);
        }

        let symbol_count = reader.read_u32()? as usize;
        let mut symbols = Vec::with_capacity(symbol_count.min(reader.remaining()));
        for _ in 0..symbol_count {
            symbols.push(reader.read_string()?);
        }

        Ok(Self { constants, symbols })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_deduplicates() {
        let mut pool = ConstantPool::new();
        let x = pool.intern("x");
        let y = pool.intern("y");
        assert_ne!(x, y);
        assert_eq!(pool.intern("x"), x);
        assert_eq!(pool.symbol(y), Some("y"));
        assert_eq!(pool.symbol(99), None);
    }

    #[test]
    fn test_constants_deduplicate() {
        let mut pool = ConstantPool::new();
        let a = pool.add_constant(Constant::Str("hello".to_string()));
        let b = pool.add_constant(Constant::Float(1.5));
        assert_eq!(pool.add_constant(Constant::Str("hello".to_string())), a);
        assert_eq!(pool.constant(b), Some(&Constant::Float(1.5)));
    }

    #[test]
    fn test_pool_encoding() {
        let mut pool = ConstantPool::new();
        pool.add_constant(Constant::Int(-3));
        pool.add_constant(Constant::Str("s".to_string()));
        pool.intern("arg");

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();

        let decoded = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded, pool);
    }

    #[test]
    fn test_bad_constant_tag() {
        let bytes = [1, 0, 0, 0, 9];
        let result = ConstantPool::decode(&mut BytecodeReader::new(&bytes));
        assert!(matches!(result, Err(DecodeError::InvalidConstantTag(9, 4))));
    }
}
