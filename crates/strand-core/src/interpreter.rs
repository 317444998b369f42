//! Bytecode interpreter
//!
//! Runs one thread until its root call returns, it blocks on a pending
//! future, or the program ends. Storage and invocation are reached only
//! through the [`Resolver`], on `Async` and `Await`.

use crate::foreign::ForeignRegistry;
use crate::resolver::{AwaitOutcome, Resolver};
use crate::future::FutureId;
use crate::thread::{Frame, ThreadState};
use crate::value::{FunctionRef, Value};
use crate::{VmError, VmResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use strand_bytecode::{Constant, Executable, Instruction};
use tracing::trace;

/// Why a run stopped
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The thread's root call returned this value
    Returned(Value),
    /// The thread is suspended on this future and already persisted
    Blocked(FutureId),
    /// The program ended (`Halt`, or the end of the code) with this value
    EndedProgram(Value),
}

/// Stack machine over one executable
pub struct Interpreter<'a> {
    exe: &'a Executable,
    resolver: &'a Resolver<'a>,
    foreign: &'a ForeignRegistry,
    max_steps: Option<u64>,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter
    pub fn new(
        exe: &'a Executable,
        resolver: &'a Resolver<'a>,
        foreign: &'a ForeignRegistry,
        max_steps: Option<u64>,
    ) -> Self {
        Self {
            exe,
            resolver,
            foreign,
            max_steps,
        }
    }

    /// Run `thread` until it returns, blocks or ends the program
    pub fn run(&self, thread: &mut ThreadState) -> VmResult<RunOutcome> {
        loop {
            if let Some(limit) = self.max_steps {
                if thread.steps >= limit {
                    return Err(VmError::StepLimitExceeded {
                        thread: thread.id,
                        steps: thread.steps,
                    });
                }
            }

            let ip = thread.ip;
            let Some(&instruction) = self.exe.instruction(ip) else {
                let value = thread.stack.pop().unwrap_or(Value::Null);
                return Ok(RunOutcome::EndedProgram(value));
            };
            trace!(thread = %thread.id, ip, ?instruction, "step");

            thread.steps += 1;
            thread.ip += 1;

            if let Some(outcome) = self.step(thread, instruction)? {
                return Ok(outcome);
            }
        }
    }

    /// Execute one instruction; `Some` stops the run
    fn step(&self, thread: &mut ThreadState, instruction: Instruction) -> VmResult<Option<RunOutcome>> {
        match instruction {
            Instruction::Nop => {}
            Instruction::Pop => {
                thread.pop()?;
            }
            Instruction::Dup => {
                let top = thread.peek()?.clone();
                thread.push(top);
            }
            Instruction::Swap => {
                let b = thread.pop()?;
                let a = thread.pop()?;
                thread.push(b);
                thread.push(a);
            }

            Instruction::PushNull => thread.push(Value::Null),
            Instruction::PushBool(b) => thread.push(Value::Bool(b)),
            Instruction::PushInt(i) => thread.push(Value::Int(i)),
            Instruction::PushConst(index) => {
                let value = match self.exe.constants.constant(index) {
                    Some(Constant::Int(i)) => Value::Int(*i),
                    Some(Constant::Float(f)) => Value::Float(*f),
                    Some(Constant::Str(s)) => Value::Str(s.clone()),
                    None => return Err(VmError::InvalidConstant(index)),
                };
                thread.push(value);
            }
            Instruction::PushFunction(index) => {
                self.exe
                    .function(index)
                    .ok_or(VmError::InvalidFunction(index))?;
                thread.push(Value::Function(FunctionRef(index)));
            }

            Instruction::Load(symbol) => {
                let name = self.symbol(symbol)?;
                let value = self.lookup(thread, name)?;
                thread.push(value);
            }
            Instruction::Store(symbol) => {
                let name = self.symbol(symbol)?;
                let value = thread.pop()?;
                thread.frame_mut()?.locals.insert(name.to_string(), value);
            }
            Instruction::Bind(symbol) => {
                let name = self.symbol(symbol)?;
                let value = thread.peek()?.clone();
                thread.frame_mut()?.locals.insert(name.to_string(), value);
            }

            Instruction::Add => self.binary(thread, Value::add)?,
            Instruction::Sub => self.binary(thread, Value::sub)?,
            Instruction::Mul => self.binary(thread, Value::mul)?,
            Instruction::Div => self.binary(thread, Value::div)?,
            Instruction::Mod => self.binary(thread, Value::rem)?,
            Instruction::Neg => {
                let a = thread.pop()?;
                thread.push(a.neg()?);
            }

            Instruction::Eq => self.binary(thread, |a, b| Ok(Value::Bool(a.equals(b))))?,
            Instruction::Ne => self.binary(thread, |a, b| Ok(Value::Bool(!a.equals(b))))?,
            Instruction::Lt => self.compare(thread, |o| o == Ordering::Less)?,
            Instruction::Le => self.compare(thread, |o| o != Ordering::Greater)?,
            Instruction::Gt => self.compare(thread, |o| o == Ordering::Greater)?,
            Instruction::Ge => self.compare(thread, |o| o != Ordering::Less)?,
            Instruction::Not => {
                let a = thread.pop()?;
                thread.push(Value::Bool(!a.is_truthy()));
            }

            Instruction::Jump(offset) => self.jump(thread, offset)?,
            Instruction::JumpIfTrue(offset) => {
                if thread.pop()?.is_truthy() {
                    self.jump(thread, offset)?;
                }
            }
            Instruction::JumpIfFalse(offset) => {
                if !thread.pop()?.is_truthy() {
                    self.jump(thread, offset)?;
                }
            }
            Instruction::Return => {
                let value = thread.pop()?;
                let frame = thread.frames.pop().ok_or(VmError::StackUnderflow)?;
                match frame.return_ip {
                    None => return Ok(Some(RunOutcome::Returned(value))),
                    Some(return_ip) => {
                        thread.stack.truncate(frame.base);
                        thread.push(value);
                        thread.ip = return_ip;
                    }
                }
            }
            Instruction::Halt => {
                let value = thread.stack.pop().unwrap_or(Value::Null);
                return Ok(Some(RunOutcome::EndedProgram(value)));
            }

            Instruction::Call { function, argc } => {
                let args = thread.pop_n(argc as usize)?;
                self.call(thread, function, args)?;
            }
            Instruction::CallValue { argc } => {
                let callee = thread.pop()?;
                let Value::Function(FunctionRef(function)) = callee else {
                    return Err(VmError::TypeError(format!(
                        "cannot call {}",
                        callee.type_name()
                    )));
                };
                let args = thread.pop_n(argc as usize)?;
                self.call(thread, function, args)?;
            }
            Instruction::CallForeign { symbol, argc } => {
                let name = self.symbol(symbol)?;
                let args = thread.pop_n(argc as usize)?;
                let result = self.foreign.call(name, &args)?;
                thread.push(result);
            }

            Instruction::Async { function, argc } => {
                let args = thread.pop_n(argc as usize)?;
                let future = self.resolver.spawn(thread, function, args)?;
                thread.push(Value::Future(future));
            }
            Instruction::Await => {
                // Awaiting a non-future leaves it on the stack unchanged.
                if let Value::Future(future) = thread.peek()? {
                    let future = *future;
                    thread.pop()?;
                    match self.resolver.await_future(future, thread)? {
                        AwaitOutcome::Immediate(value) => thread.push(value),
                        AwaitOutcome::Deferred(terminal) => {
                            return Ok(Some(RunOutcome::Blocked(terminal)))
                        }
                    }
                }
            }

            Instruction::MakeList(count) => {
                let items = thread.pop_n(count as usize)?;
                thread.push(Value::List(items));
            }
            Instruction::MakeMap(pairs) => {
                let flat = thread.pop_n(pairs as usize * 2)?;
                let mut entries = BTreeMap::new();
                for pair in flat.chunks_exact(2) {
                    entries.insert(pair[0].to_key()?, pair[1].clone());
                }
                thread.push(Value::Map(entries));
            }
            Instruction::Concat => self.binary(thread, Value::concat)?,
            Instruction::First => {
                let list = thread.pop()?;
                let first = match list {
                    Value::List(items) => items.into_iter().next().unwrap_or(Value::Null),
                    other => return Err(expected_list(&other)),
                };
                thread.push(first);
            }
            Instruction::Rest => {
                let list = thread.pop()?;
                let rest = match list {
                    Value::List(items) => items.into_iter().skip(1).collect(),
                    other => return Err(expected_list(&other)),
                };
                thread.push(Value::List(rest));
            }
            Instruction::Nth => {
                let index = thread.pop()?;
                let list = thread.pop()?;
                let item = match (list, index) {
                    (Value::List(items), Value::Int(i)) => {
                        let len = items.len();
                        usize::try_from(i)
                            .ok()
                            .and_then(|i| items.into_iter().nth(i))
                            .ok_or(VmError::IndexOutOfBounds { index: i, len })?
                    }
                    (Value::List(_), other) => {
                        return Err(VmError::TypeError(format!(
                            "list index must be int, got {}",
                            other.type_name()
                        )))
                    }
                    (other, _) => return Err(expected_list(&other)),
                };
                thread.push(item);
            }
            Instruction::Len => {
                let value = thread.pop()?;
                thread.push(Value::Int(value.len()? as i64));
            }
            Instruction::IsAtom => {
                let value = thread.pop()?;
                thread.push(Value::Bool(value.is_atom()));
            }
            Instruction::IsNull => {
                let value = thread.pop()?;
                thread.push(Value::Bool(value.is_null()));
            }
            Instruction::Print => {
                let value = thread.pop()?;
                thread.output.push(value.to_string());
                thread.push(Value::Null);
            }
        }
        Ok(None)
    }

    fn symbol(&self, index: u32) -> VmResult<&'a str> {
        self.exe.symbol(index).ok_or(VmError::InvalidSymbol(index))
    }

    /// Local binding, then top-level function of that name
    fn lookup(&self, thread: &ThreadState, name: &str) -> VmResult<Value> {
        if let Some(value) = thread.frame()?.locals.get(name) {
            return Ok(value.clone());
        }
        match self.exe.function_index(name) {
            Some(index) => Ok(Value::Function(FunctionRef(index))),
            None => Err(VmError::UnboundName(name.to_string())),
        }
    }

    fn call(&self, thread: &mut ThreadState, function: u32, args: Vec<Value>) -> VmResult<()> {
        let frame = Frame::enter(self.exe, function, args, Some(thread.ip), thread.stack.len())?;
        thread.frames.push(frame);
        thread.ip = self
            .exe
            .function(function)
            .map(|f| f.entry)
            .ok_or(VmError::InvalidFunction(function))?;
        Ok(())
    }

    fn jump(&self, thread: &mut ThreadState, offset: i32) -> VmResult<()> {
        // thread.ip already points at the next instruction
        let target = thread.ip as i64 + offset as i64;
        if target < 0 || target > self.exe.code.len() as i64 {
            return Err(VmError::InvalidJump(target));
        }
        thread.ip = target as usize;
        Ok(())
    }

    fn binary(
        &self,
        thread: &mut ThreadState,
        op: impl Fn(&Value, &Value) -> VmResult<Value>,
    ) -> VmResult<()> {
        let b = thread.pop()?;
        let a = thread.pop()?;
        thread.push(op(&a, &b)?);
        Ok(())
    }

    fn compare(&self, thread: &mut ThreadState, test: impl Fn(Ordering) -> bool) -> VmResult<()> {
        self.binary(thread, |a, b| Ok(Value::Bool(test(a.compare(b)?))))
    }
}

fn expected_list(value: &Value) -> VmError {
    VmError::TypeError(format!("expected list, got {}", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{InvokeResult, Invoker};
    use crate::store::{DataController, MemoryStore};
    use crate::thread::ThreadId;
    use strand_bytecode::ExecutableBuilder;

    struct NoInvoker;

    impl Invoker for NoInvoker {
        fn start(&self, _thread: ThreadId) -> InvokeResult<()> {
            Ok(())
        }

        fn resume(&self, _thread: ThreadId, _value: Value) -> InvokeResult<()> {
            Ok(())
        }
    }

    fn run_with(
        exe: &Executable,
        foreign: &ForeignRegistry,
        max_steps: Option<u64>,
    ) -> (VmResult<RunOutcome>, ThreadState) {
        let store = MemoryStore::new();
        let resolver = Resolver::new(exe, &store, &NoInvoker);
        let root = store.create_future().unwrap();
        let (index, _) = exe.entry_function().unwrap();
        let state = ThreadState::for_call(exe, index, vec![], root, root).unwrap();
        let id = store.create_thread(state).unwrap();
        let mut thread = store.read_thread(id).unwrap();
        let outcome = Interpreter::new(exe, &resolver, foreign, max_steps).run(&mut thread);
        (outcome, thread)
    }

    fn run(exe: &Executable) -> VmResult<RunOutcome> {
        run_with(exe, &ForeignRegistry::new(), None).0
    }

    fn returned(value: impl Into<Value>) -> RunOutcome {
        RunOutcome::Returned(value.into())
    }

    #[test]
    fn test_arithmetic_and_locals() {
        let mut b = ExecutableBuilder::new("arith");
        b.begin_function("main", &[]);
        b.push_int(6).store("a");
        b.load("a").push_int(7).emit(Instruction::Mul);
        b.push_int(2).emit(Instruction::Sub).emit(Instruction::Return);
        assert_eq!(run(&b.build().unwrap()).unwrap(), returned(40));
    }

    #[test]
    fn test_loop_with_jumps() {
        // sum = 0; i = 0; while i < 5 { sum += i; i += 1 }
        let mut b = ExecutableBuilder::new("loop");
        b.begin_function("main", &[]);
        b.push_int(0).store("sum").push_int(0).store("i");
        let top = b.new_label();
        let done = b.new_label();
        b.bind_label(top);
        b.load("i").push_int(5).emit(Instruction::Lt).jump_if_false(done);
        b.load("sum").load("i").emit(Instruction::Add).store("sum");
        b.load("i").push_int(1).emit(Instruction::Add).store("i");
        b.jump(top);
        b.bind_label(done);
        b.load("sum").emit(Instruction::Return);
        assert_eq!(run(&b.build().unwrap()).unwrap(), returned(10));
    }

    #[test]
    fn test_recursive_call() {
        let mut b = ExecutableBuilder::new("fact");
        b.begin_function("main", &[]);
        b.push_int(5).call("fact", 1).emit(Instruction::Return);
        b.begin_function("fact", &["n"]);
        let recurse = b.new_label();
        b.load("n").push_int(1).emit(Instruction::Gt).jump_if_true(recurse);
        b.push_int(1).emit(Instruction::Return);
        b.bind_label(recurse);
        b.load("n");
        b.load("n").push_int(1).emit(Instruction::Sub).call("fact", 1);
        b.emit(Instruction::Mul).emit(Instruction::Return);
        assert_eq!(run(&b.build().unwrap()).unwrap(), returned(120));
    }

    #[test]
    fn test_call_value_through_binding() {
        let mut b = ExecutableBuilder::new("callvalue");
        b.begin_function("main", &[]);
        b.push_int(20).load("twice").emit(Instruction::CallValue { argc: 1 });
        b.emit(Instruction::Return);
        b.begin_function("twice", &["x"]);
        b.load("x").load("x").emit(Instruction::Add).emit(Instruction::Return);
        assert_eq!(run(&b.build().unwrap()).unwrap(), returned(40));
    }

    #[test]
    fn test_list_builtins() {
        let mut b = ExecutableBuilder::new("lists");
        b.begin_function("main", &[]);
        b.push_int(1).push_int(2).push_int(3).emit(Instruction::MakeList(3));
        let xs = b.symbol("xs");
        b.emit(Instruction::Bind(xs));
        b.emit(Instruction::Rest).emit(Instruction::First);
        b.load("xs").push_int(2).emit(Instruction::Nth);
        b.emit(Instruction::Add);
        b.load("xs").emit(Instruction::Len).emit(Instruction::Add);
        b.emit(Instruction::Return);
        // 2 + 3 + 3
        assert_eq!(run(&b.build().unwrap()).unwrap(), returned(8));
    }

    #[test]
    fn test_map_and_predicates() {
        let mut b = ExecutableBuilder::new("maps");
        b.begin_function("main", &[]);
        b.push_str("a").push_int(1).emit(Instruction::MakeMap(1));
        b.emit(Instruction::IsAtom);
        b.emit(Instruction::MakeList(0)).emit(Instruction::IsNull);
        b.emit(Instruction::MakeList(2)).emit(Instruction::Return);
        assert_eq!(
            run(&b.build().unwrap()).unwrap(),
            RunOutcome::Returned(Value::List(vec![Value::Bool(false), Value::Bool(true)]))
        );
    }

    #[test]
    fn test_print_collects_output() {
        let mut b = ExecutableBuilder::new("print");
        b.begin_function("main", &[]);
        b.push_str("hello").emit(Instruction::Print).emit(Instruction::Pop);
        b.push_int(1).push_int(2).emit(Instruction::MakeList(2)).emit(Instruction::Print);
        b.emit(Instruction::Return);
        let (outcome, thread) = run_with(&b.build().unwrap(), &ForeignRegistry::new(), None);
        assert_eq!(outcome.unwrap(), RunOutcome::Returned(Value::Null));
        assert_eq!(thread.output, vec!["hello".to_string(), "[1, 2]".to_string()]);
    }

    #[test]
    fn test_foreign_call() {
        let mut foreign = ForeignRegistry::new();
        foreign.register("sum", |args| {
            let mut total = 0;
            for arg in args {
                match arg {
                    Value::Int(i) => total += i,
                    other => return Err(format!("not an int: {}", other)),
                }
            }
            Ok(Value::Int(total))
        });

        let mut b = ExecutableBuilder::new("foreign");
        b.begin_function("main", &[]);
        b.push_int(1).push_int(2).push_int(3).call_foreign("sum", 3);
        b.emit(Instruction::Return);
        let (outcome, _) = run_with(&b.build().unwrap(), &foreign, None);
        assert_eq!(outcome.unwrap(), returned(6));
    }

    #[test]
    fn test_halt_and_end_of_code() {
        let mut b = ExecutableBuilder::new("halt");
        b.begin_function("main", &[]);
        b.push_int(9).emit(Instruction::Halt);
        assert_eq!(
            run(&b.build().unwrap()).unwrap(),
            RunOutcome::EndedProgram(Value::Int(9))
        );

        let mut b = ExecutableBuilder::new("fall-off");
        b.begin_function("main", &[]);
        b.push_int(3);
        assert_eq!(
            run(&b.build().unwrap()).unwrap(),
            RunOutcome::EndedProgram(Value::Int(3))
        );
    }

    #[test]
    fn test_await_non_future_is_noop() {
        let mut b = ExecutableBuilder::new("await-value");
        b.begin_function("main", &[]);
        b.push_int(5).emit(Instruction::Await).emit(Instruction::Return);
        assert_eq!(run(&b.build().unwrap()).unwrap(), returned(5));
    }

    #[test]
    fn test_errors() {
        let mut b = ExecutableBuilder::new("underflow");
        b.begin_function("main", &[]);
        b.emit(Instruction::Add);
        assert!(matches!(run(&b.build().unwrap()), Err(VmError::StackUnderflow)));

        let mut b = ExecutableBuilder::new("unbound");
        b.begin_function("main", &[]);
        b.load("nope").emit(Instruction::Return);
        assert!(matches!(
            run(&b.build().unwrap()),
            Err(VmError::UnboundName(name)) if name == "nope"
        ));

        let mut b = ExecutableBuilder::new("index");
        b.begin_function("main", &[]);
        b.emit(Instruction::MakeList(0)).push_int(0).emit(Instruction::Nth);
        assert!(matches!(
            run(&b.build().unwrap()),
            Err(VmError::IndexOutOfBounds { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_step_limit() {
        let mut b = ExecutableBuilder::new("spin");
        b.begin_function("main", &[]);
        let top = b.new_label();
        b.bind_label(top);
        b.jump(top);
        let (outcome, thread) = run_with(&b.build().unwrap(), &ForeignRegistry::new(), Some(300));
        assert!(matches!(
            outcome,
            Err(VmError::StepLimitExceeded { steps: 300, .. })
        ));
        assert_eq!(thread.steps, 300);
    }
}
