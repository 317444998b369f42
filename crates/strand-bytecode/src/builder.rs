//! Assembler for executables
//!
//! [`ExecutableBuilder`] lays out functions in a single instruction stream,
//! interns names, resolves forward function references, and back-patches
//! jumps to labels once their positions are known.

use crate::constants::Constant;
use crate::executable::{Executable, FunctionEntry};
use crate::opcode::Instruction;
use crate::verify::{verify_executable, VerifyError};

/// A jump target inside the instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Incremental executable assembler
pub struct ExecutableBuilder {
    exe: Executable,
    defined: Vec<bool>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl ExecutableBuilder {
    /// Start a new executable
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            exe: Executable::new(name),
            defined: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Set the entry function name (defaults to `main`)
    pub fn entry(&mut self, name: &str) -> &mut Self {
        self.exe.entry = name.to_string();
        self
    }

    /// Intern a binding name
    pub fn symbol(&mut self, name: &str) -> u32 {
        self.exe.constants.intern(name)
    }

    /// Add a literal to the constant pool
    pub fn constant(&mut self, constant: Constant) -> u32 {
        self.exe.constants.add_constant(constant)
    }

    /// Function index for `name`, declaring it if it does not exist yet
    pub fn function_ref(&mut self, name: &str) -> u32 {
        if let Some(index) = self.exe.function_index(name) {
            return index;
        }
        self.exe.functions.push(FunctionEntry {
            name: name.to_string(),
            entry: usize::MAX,
            params: Vec::new(),
        });
        self.defined.push(false);
        (self.exe.functions.len() - 1) as u32
    }

    /// Begin a function body at the current position
    pub fn begin_function(&mut self, name: &str, params: &[&str]) -> u32 {
        let index = self.function_ref(name);
        let params: Vec<u32> = params.iter().map(|p| self.symbol(p)).collect();
        let entry = self.exe.code.len();

        let function = &mut self.exe.functions[index as usize];
        function.entry = entry;
        function.params = params;
        self.defined[index as usize] = true;
        index
    }

    /// Current position in the instruction stream
    pub fn offset(&self) -> usize {
        self.exe.code.len()
    }

    /// Append an instruction
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.exe.code.push(instruction);
        self
    }

    /// Create an unbound label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current position
    pub fn bind_label(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.exe.code.len());
        self
    }

    fn emit_jump(&mut self, instruction: Instruction, label: Label) -> &mut Self {
        self.fixups.push((self.exe.code.len(), label));
        self.emit(instruction)
    }

    /// Unconditional jump to `label`
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit_jump(Instruction::Jump(0), label)
    }

    /// Pop and jump to `label` when truthy
    pub fn jump_if_true(&mut self, label: Label) -> &mut Self {
        self.emit_jump(Instruction::JumpIfTrue(0), label)
    }

    /// Pop and jump to `label` when falsy
    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.emit_jump(Instruction::JumpIfFalse(0), label)
    }

    /// Push an integer literal
    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.emit(Instruction::PushInt(value))
    }

    /// Push a string literal
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        let index = self.constant(Constant::Str(value.to_string()));
        self.emit(Instruction::PushConst(index))
    }

    /// Push a float literal
    pub fn push_float(&mut self, value: f64) -> &mut Self {
        let index = self.constant(Constant::Float(value));
        self.emit(Instruction::PushConst(index))
    }

    /// Push the value bound to `name`
    pub fn load(&mut self, name: &str) -> &mut Self {
        let symbol = self.symbol(name);
        self.emit(Instruction::Load(symbol))
    }

    /// Pop into a binding named `name`
    pub fn store(&mut self, name: &str) -> &mut Self {
        let symbol = self.symbol(name);
        self.emit(Instruction::Store(symbol))
    }

    /// Push a reference to function `name`
    pub fn push_function(&mut self, name: &str) -> &mut Self {
        let function = self.function_ref(name);
        self.emit(Instruction::PushFunction(function))
    }

    /// Synchronous call of function `name`
    pub fn call(&mut self, name: &str, argc: u8) -> &mut Self {
        let function = self.function_ref(name);
        self.emit(Instruction::Call { function, argc })
    }

    /// Spawn function `name` on a new thread
    pub fn async_call(&mut self, name: &str, argc: u8) -> &mut Self {
        let function = self.function_ref(name);
        self.emit(Instruction::Async { function, argc })
    }

    /// Call native function `name`
    pub fn call_foreign(&mut self, name: &str, argc: u8) -> &mut Self {
        let symbol = self.symbol(name);
        self.emit(Instruction::CallForeign { symbol, argc })
    }

    /// Resolve labels and forward references, then verify
    pub fn build(mut self) -> Result<Executable, VerifyError> {
        if let Some(index) = self.defined.iter().position(|defined| !defined) {
            return Err(VerifyError::UndefinedFunction(
                self.exe.functions[index].name.clone(),
            ));
        }

        for (pc, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0].ok_or(VerifyError::UnboundLabel(label.0))?;
            let delta = target as i32 - (pc as i32 + 1);
            self.exe.code[pc] = match self.exe.code[pc] {
                Instruction::Jump(_) => Instruction::Jump(delta),
                Instruction::JumpIfTrue(_) => Instruction::JumpIfTrue(delta),
                Instruction::JumpIfFalse(_) => Instruction::JumpIfFalse(delta),
                other => other,
            };
        }

        verify_executable(&self.exe)?;
        Ok(self.exe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_function_reference() {
        let mut b = ExecutableBuilder::new("forward");
        b.begin_function("main", &[]);
        b.push_int(1).call("inc", 1).emit(Instruction::Return);
        b.begin_function("inc", &["x"]);
        b.load("x").push_int(1).emit(Instruction::Add).emit(Instruction::Return);

        let exe = b.build().unwrap();
        assert_eq!(exe.functions.len(), 2);
        assert_eq!(exe.functions[1].entry, 3);
        assert_eq!(exe.code[1], Instruction::Call { function: 1, argc: 1 });
    }

    #[test]
    fn test_undefined_function() {
        let mut b = ExecutableBuilder::new("undefined");
        b.begin_function("main", &[]);
        b.call("missing", 0).emit(Instruction::Return);
        assert!(matches!(
            b.build(),
            Err(VerifyError::UndefinedFunction(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_label_patching() {
        let mut b = ExecutableBuilder::new("labels");
        b.begin_function("main", &[]);
        let top = b.new_label();
        let done = b.new_label();
        b.bind_label(top);
        b.emit(Instruction::PushBool(false));
        b.jump_if_false(done);
        b.jump(top);
        b.bind_label(done);
        b.push_int(0).emit(Instruction::Return);

        let exe = b.build().unwrap();
        assert_eq!(exe.code[1], Instruction::JumpIfFalse(1));
        assert_eq!(exe.code[2], Instruction::Jump(-3));
    }

    #[test]
    fn test_unbound_label() {
        let mut b = ExecutableBuilder::new("unbound");
        b.begin_function("main", &[]);
        let nowhere = b.new_label();
        b.jump(nowhere);
        assert!(matches!(b.build(), Err(VerifyError::UnboundLabel(0))));
    }
}
