//! Opcodes and instructions for the Strand VM
//!
//! Every instruction is identified by a single-byte [`Opcode`]. The in-memory
//! form is [`Instruction`], which carries typed operands; the binary encoding
//! writes the opcode byte followed by the operands in a fixed layout.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & literals
//! - 0x10-0x1F: Named local bindings
//! - 0x20-0x2F: Arithmetic
//! - 0x30-0x3F: Comparison & logical
//! - 0x40-0x4F: Control flow
//! - 0x50-0x5F: Calls
//! - 0x60-0x6F: Concurrency (async / await)
//! - 0x70-0x7F: Composite values & builtins

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Literals (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null
    PushNull = 0x04,
    /// Push boolean (operand: u8)
    PushBool = 0x05,
    /// Push 64-bit integer (operand: i64)
    PushInt = 0x06,
    /// Push constant from pool (operand: u32 index)
    PushConst = 0x07,
    /// Push a function reference (operand: u32 function index)
    PushFunction = 0x08,

    // ===== Named Local Bindings (0x10-0x1F) =====
    /// Push the value bound to a name in the current frame (operand: u32 symbol)
    Load = 0x10,
    /// Pop a value and bind it to a name (operand: u32 symbol)
    Store = 0x11,
    /// Bind the top value to a name without popping it (operand: u32 symbol)
    Bind = 0x12,

    // ===== Arithmetic (0x20-0x2F) =====
    /// pop b, pop a, push a + b
    Add = 0x20,
    /// pop b, pop a, push a - b
    Sub = 0x21,
    /// pop b, pop a, push a * b
    Mul = 0x22,
    /// pop b, pop a, push a / b
    Div = 0x23,
    /// pop b, pop a, push a % b
    Mod = 0x24,
    /// pop a, push -a
    Neg = 0x25,

    // ===== Comparison & Logical (0x30-0x3F) =====
    /// pop b, pop a, push a == b
    Eq = 0x30,
    /// pop b, pop a, push a != b
    Ne = 0x31,
    /// pop b, pop a, push a < b
    Lt = 0x32,
    /// pop b, pop a, push a <= b
    Le = 0x33,
    /// pop b, pop a, push a > b
    Gt = 0x34,
    /// pop b, pop a, push a >= b
    Ge = 0x35,
    /// pop a, push !a
    Not = 0x36,

    // ===== Control Flow (0x40-0x4F) =====
    /// Unconditional relative jump (operand: i32)
    Jump = 0x40,
    /// Pop, jump if truthy (operand: i32)
    JumpIfTrue = 0x41,
    /// Pop, jump if falsy (operand: i32)
    JumpIfFalse = 0x42,
    /// Return from the current function
    Return = 0x43,
    /// End the whole program with the top value
    Halt = 0x44,

    // ===== Calls (0x50-0x5F) =====
    /// Direct call (operands: u32 function index, u8 argc)
    Call = 0x50,
    /// Call a function reference popped from the stack (operand: u8 argc)
    CallValue = 0x51,
    /// Call a registered native function (operands: u32 symbol, u8 argc)
    CallForeign = 0x52,

    // ===== Concurrency (0x60-0x6F) =====
    /// Spawn a new thread and push its future (operands: u32 function index, u8 argc)
    Async = 0x60,
    /// Await the value on top of the stack
    Await = 0x61,

    // ===== Composite Values & Builtins (0x70-0x7F) =====
    /// Build a list from the top N values (operand: u32 count)
    MakeList = 0x70,
    /// Build a map from the top N key/value pairs (operand: u32 pair count)
    MakeMap = 0x71,
    /// pop b, pop a, push a ++ b
    Concat = 0x72,
    /// pop list, push its first element
    First = 0x73,
    /// pop list, push all but its first element
    Rest = 0x74,
    /// pop index, pop list, push list[index]
    Nth = 0x75,
    /// pop a composite, push its length
    Len = 0x76,
    /// pop a, push whether a is not a composite
    IsAtom = 0x77,
    /// pop a, push whether a is null or an empty composite
    IsNull = 0x78,
    /// pop a, append its display form to the thread output, push null
    Print = 0x79,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::PushNull),
            0x05 => Some(Self::PushBool),
            0x06 => Some(Self::PushInt),
            0x07 => Some(Self::PushConst),
            0x08 => Some(Self::PushFunction),

            0x10 => Some(Self::Load),
            0x11 => Some(Self::Store),
            0x12 => Some(Self::Bind),

            0x20 => Some(Self::Add),
            0x21 => Some(Self::Sub),
            0x22 => Some(Self::Mul),
            0x23 => Some(Self::Div),
            0x24 => Some(Self::Mod),
            0x25 => Some(Self::Neg),

            0x30 => Some(Self::Eq),
            0x31 => Some(Self::Ne),
            0x32 => Some(Self::Lt),
            0x33 => Some(Self::Le),
            0x34 => Some(Self::Gt),
            0x35 => Some(Self::Ge),
            0x36 => Some(Self::Not),

            0x40 => Some(Self::Jump),
            0x41 => Some(Self::JumpIfTrue),
            0x42 => Some(Self::JumpIfFalse),
            0x43 => Some(Self::Return),
            0x44 => Some(Self::Halt),

            0x50 => Some(Self::Call),
            0x51 => Some(Self::CallValue),
            0x52 => Some(Self::CallForeign),

            0x60 => Some(Self::Async),
            0x61 => Some(Self::Await),

            0x70 => Some(Self::MakeList),
            0x71 => Some(Self::MakeMap),
            0x72 => Some(Self::Concat),
            0x73 => Some(Self::First),
            0x74 => Some(Self::Rest),
            0x75 => Some(Self::Nth),
            0x76 => Some(Self::Len),
            0x77 => Some(Self::IsAtom),
            0x78 => Some(Self::IsNull),
            0x79 => Some(Self::Print),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Mnemonic used in listings
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::PushNull => "PUSH_NULL",
            Self::PushBool => "PUSH_BOOL",
            Self::PushInt => "PUSH_INT",
            Self::PushConst => "PUSH_CONST",
            Self::PushFunction => "PUSH_FN",
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::Bind => "BIND",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Neg => "NEG",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Not => "NOT",
            Self::Jump => "JUMP",
            Self::JumpIfTrue => "JUMP_IF_TRUE",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
            Self::Return => "RETURN",
            Self::Halt => "HALT",
            Self::Call => "CALL",
            Self::CallValue => "CALL_VALUE",
            Self::CallForeign => "CALL_FOREIGN",
            Self::Async => "ASYNC",
            Self::Await => "AWAIT",
            Self::MakeList => "MAKE_LIST",
            Self::MakeMap => "MAKE_MAP",
            Self::Concat => "CONCAT",
            Self::First => "FIRST",
            Self::Rest => "REST",
            Self::Nth => "NTH",
            Self::Len => "LEN",
            Self::IsAtom => "IS_ATOM",
            Self::IsNull => "IS_NULL",
            Self::Print => "PRINT",
        }
    }

    /// Check if this opcode is a jump
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpIfTrue | Self::JumpIfFalse)
    }

    /// Check if this opcode transfers control out of the current function
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::Halt | Self::Jump)
    }
}

/// A decoded instruction: opcode plus typed operands
///
/// Jump offsets are relative to the instruction following the jump, measured
/// in instructions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    /// NOP
    Nop,
    /// POP
    Pop,
    /// DUP
    Dup,
    /// SWAP
    Swap,
    /// PUSH_NULL
    PushNull,
    /// PUSH_BOOL
    PushBool(bool),
    /// PUSH_INT
    PushInt(i64),
    /// PUSH_CONST index
    PushConst(u32),
    /// PUSH_FN function
    PushFunction(u32),
    /// LOAD symbol
    Load(u32),
    /// STORE symbol
    Store(u32),
    /// BIND symbol
    Bind(u32),
    /// ADD
    Add,
    /// SUB
    Sub,
    /// MUL
    Mul,
    /// DIV
    Div,
    /// MOD
    Mod,
    /// NEG
    Neg,
    /// EQ
    Eq,
    /// NE
    Ne,
    /// LT
    Lt,
    /// LE
    Le,
    /// GT
    Gt,
    /// GE
    Ge,
    /// NOT
    Not,
    /// JUMP offset
    Jump(i32),
    /// JUMP_IF_TRUE offset
    JumpIfTrue(i32),
    /// JUMP_IF_FALSE offset
    JumpIfFalse(i32),
    /// RETURN
    Return,
    /// HALT
    Halt,
    /// CALL function, argc
    Call {
        /// Function table index
        function: u32,
        /// Number of arguments on the stack
        argc: u8,
    },
    /// CALL_VALUE argc
    CallValue {
        /// Number of arguments on the stack (below the callee)
        argc: u8,
    },
    /// CALL_FOREIGN symbol, argc
    CallForeign {
        /// Symbol naming the native function
        symbol: u32,
        /// Number of arguments on the stack
        argc: u8,
    },
    /// ASYNC function, argc
    Async {
        /// Function table index
        function: u32,
        /// Number of arguments on the stack
        argc: u8,
    },
    /// AWAIT
    Await,
    /// MAKE_LIST count
    MakeList(u32),
    /// MAKE_MAP pairs
    MakeMap(u32),
    /// CONCAT
    Concat,
    /// FIRST
    First,
    /// REST
    Rest,
    /// NTH
    Nth,
    /// LEN
    Len,
    /// IS_ATOM
    IsAtom,
    /// IS_NULL
    IsNull,
    /// PRINT
    Print,
}

impl Instruction {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::Pop => Opcode::Pop,
            Self::Dup => Opcode::Dup,
            Self::Swap => Opcode::Swap,
            Self::PushNull => Opcode::PushNull,
            Self::PushBool(_) => Opcode::PushBool,
            Self::PushInt(_) => Opcode::PushInt,
            Self::PushConst(_) => Opcode::PushConst,
            Self::PushFunction(_) => Opcode::PushFunction,
            Self::Load(_) => Opcode::Load,
            Self::Store(_) => Opcode::Store,
            Self::Bind(_) => Opcode::Bind,
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Mul => Opcode::Mul,
            Self::Div => Opcode::Div,
            Self::Mod => Opcode::Mod,
            Self::Neg => Opcode::Neg,
            Self::Eq => Opcode::Eq,
            Self::Ne => Opcode::Ne,
            Self::Lt => Opcode::Lt,
            Self::Le => Opcode::Le,
            Self::Gt => Opcode::Gt,
            Self::Ge => Opcode::Ge,
            Self::Not => Opcode::Not,
            Self::Jump(_) => Opcode::Jump,
            Self::JumpIfTrue(_) => Opcode::JumpIfTrue,
            Self::JumpIfFalse(_) => Opcode::JumpIfFalse,
            Self::Return => Opcode::Return,
            Self::Halt => Opcode::Halt,
            Self::Call { .. } => Opcode::Call,
            Self::CallValue { .. } => Opcode::CallValue,
            Self::CallForeign { .. } => Opcode::CallForeign,
            Self::Async { .. } => Opcode::Async,
            Self::Await => Opcode::Await,
            Self::MakeList(_) => Opcode::MakeList,
            Self::MakeMap(_) => Opcode::MakeMap,
            Self::Concat => Opcode::Concat,
            Self::First => Opcode::First,
            Self::Rest => Opcode::Rest,
            Self::Nth => Opcode::Nth,
            Self::Len => Opcode::Len,
            Self::IsAtom => Opcode::IsAtom,
            Self::IsNull => Opcode::IsNull,
            Self::Print => Opcode::Print,
        }
    }

    /// Relative jump offset, if this is a jump
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Self::Jump(offset) | Self::JumpIfTrue(offset) | Self::JumpIfFalse(offset) => {
                Some(*offset)
            }
            _ => None,
        }
    }

    /// Absolute jump target for a jump located at `pc`
    ///
    /// Returns `None` for non-jumps and for targets before the start of code.
    pub fn jump_target(&self, pc: usize) -> Option<usize> {
        let offset = self.jump_offset()?;
        let target = pc as i64 + 1 + offset as i64;
        usize::try_from(target).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0u8..=0xFF {
            if let Some(opcode) = Opcode::from_u8(byte) {
                assert_eq!(opcode.to_u8(), byte);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x0F), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Async.name(), "ASYNC");
        assert_eq!(Opcode::Await.name(), "AWAIT");
        assert_eq!(Opcode::JumpIfFalse.name(), "JUMP_IF_FALSE");
    }

    #[test]
    fn test_instruction_opcode() {
        assert_eq!(
            Instruction::Async { function: 1, argc: 2 }.opcode(),
            Opcode::Async
        );
        assert_eq!(Instruction::PushInt(7).opcode(), Opcode::PushInt);
        assert!(Instruction::Jump(-3).opcode().is_jump());
        assert!(Instruction::Return.opcode().is_terminator());
    }

    #[test]
    fn test_jump_target() {
        assert_eq!(Instruction::Jump(2).jump_target(5), Some(8));
        assert_eq!(Instruction::JumpIfFalse(-3).jump_target(5), Some(3));
        assert_eq!(Instruction::Jump(-10).jump_target(5), None);
        assert_eq!(Instruction::Add.jump_target(5), None);
    }
}
