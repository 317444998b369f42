//! Thread state
//!
//! A thread is one independently suspendable execution of bytecode starting
//! at a function entry point. While running, its state is owned by the
//! execution unit; while suspended, the serialized [`ThreadState`] in the
//! data controller is the only copy.

use crate::future::FutureId;
use crate::value::Value;
use crate::{VmError, VmResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strand_bytecode::Executable;

/// Unique identifier for a thread, allocated by the data controller
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a ThreadId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        ThreadId(id)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Lifecycle of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThreadStatus {
    /// Created, never run
    New,
    /// Executing on some unit
    Running,
    /// Suspended until the future resolves
    Blocked(FutureId),
    /// Root call returned; its future is resolved
    Returned,
    /// Ended the whole program
    Halted,
    /// Stopped by an error; nothing resolves its future
    Failed(String),
}

impl ThreadStatus {
    /// Check if the thread can never run again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Returned | ThreadStatus::Halted | ThreadStatus::Failed(_)
        )
    }
}

/// One call frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Function index in the executable
    pub function: u32,
    /// Where to continue in the caller; `None` for the thread's root frame
    pub return_ip: Option<usize>,
    /// Named local bindings
    pub locals: BTreeMap<String, Value>,
    /// Operand stack height at entry
    pub base: usize,
}

/// Persisted resume point of a blocked thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitPoint {
    /// Terminal future the thread waits on
    pub future: FutureId,
    /// Instruction after the `Await`
    pub resume_ip: usize,
    /// Stack slot that receives the value
    pub slot: usize,
}

/// Complete state of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    /// Identifier (assigned by the data controller on creation)
    pub id: ThreadId,
    /// Function the thread was started with
    pub function: u32,
    /// Instruction pointer
    pub ip: usize,
    /// Operand stack
    pub stack: Vec<Value>,
    /// Call frames, innermost last
    pub frames: Vec<Frame>,
    /// Lifecycle status
    pub status: ThreadStatus,
    /// Future resolved when the root call returns
    pub result_future: FutureId,
    /// Future resolved when the program ends
    pub program_future: FutureId,
    /// Resume point while blocked
    #[serde(default)]
    pub awaiting: Option<AwaitPoint>,
    /// Lines written by `Print`
    #[serde(default)]
    pub output: Vec<String>,
    /// Instructions executed so far
    #[serde(default)]
    pub steps: u64,
}

impl ThreadState {
    /// Initial state for a call of `function` with `args`
    ///
    /// Arguments are bound, in order, to the function's parameter names in
    /// the root frame.
    pub fn for_call(
        exe: &Executable,
        function: u32,
        args: Vec<Value>,
        result_future: FutureId,
        program_future: FutureId,
    ) -> VmResult<Self> {
        let frame = Frame::enter(exe, function, args, None, 0)?;
        let ip = exe
            .function(function)
            .map(|f| f.entry)
            .ok_or(VmError::InvalidFunction(function))?;

        Ok(Self {
            id: ThreadId::from_u64(0),
            function,
            ip,
            stack: Vec::new(),
            frames: vec![frame],
            status: ThreadStatus::New,
            result_future,
            program_future,
            awaiting: None,
            output: Vec::new(),
            steps: 0,
        })
    }

    /// Push a value onto the operand stack
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop a value, failing on underflow
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        let floor = self.frames.last().map_or(0, |frame| frame.base);
        if self.stack.len() <= floor {
            return Err(VmError::StackUnderflow);
        }
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop `count` values, returned in push order
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        let floor = self.frames.last().map_or(0, |frame| frame.base);
        if self.stack.len() < floor + count {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Peek at the top value
    pub fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or(VmError::StackUnderflow)
    }

    /// Innermost frame
    pub fn frame(&self) -> VmResult<&Frame> {
        self.frames.last().ok_or(VmError::StackUnderflow)
    }

    /// Innermost frame, mutably
    pub fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames.last_mut().ok_or(VmError::StackUnderflow)
    }
}

impl Frame {
    /// Frame for entering `function`, binding `args` to its parameters
    pub fn enter(
        exe: &Executable,
        function: u32,
        args: Vec<Value>,
        return_ip: Option<usize>,
        base: usize,
    ) -> VmResult<Self> {
        let entry = exe
            .function(function)
            .ok_or(VmError::InvalidFunction(function))?;
        if entry.arity() != args.len() {
            return Err(VmError::ArityMismatch {
                function: entry.name.clone(),
                expected: entry.arity(),
                actual: args.len(),
            });
        }

        let mut locals = BTreeMap::new();
        for (param, arg) in entry.params.iter().zip(args) {
            let name = exe.symbol(*param).ok_or(VmError::InvalidSymbol(*param))?;
            locals.insert(name.to_string(), arg);
        }

        Ok(Self {
            function,
            return_ip,
            locals,
            base,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_bytecode::{ExecutableBuilder, Instruction};

    fn exe() -> Executable {
        let mut b = ExecutableBuilder::new("thread");
        b.begin_function("main", &[]);
        b.push_int(0).emit(Instruction::Return);
        b.begin_function("pair", &["a", "b"]);
        b.load("a").emit(Instruction::Return);
        b.build().unwrap()
    }

    #[test]
    fn test_for_call_binds_params() {
        let exe = exe();
        let f = FutureId::from_u64(1);
        let state =
            ThreadState::for_call(&exe, 1, vec![Value::Int(1), Value::Int(2)], f, f).unwrap();
        assert_eq!(state.ip, 2);
        assert_eq!(state.status, ThreadStatus::New);
        let frame = state.frame().unwrap();
        assert_eq!(frame.locals.get("a"), Some(&Value::Int(1)));
        assert_eq!(frame.locals.get("b"), Some(&Value::Int(2)));
        assert_eq!(frame.return_ip, None);
    }

    #[test]
    fn test_arity_mismatch() {
        let exe = exe();
        let f = FutureId::from_u64(1);
        let result = ThreadState::for_call(&exe, 1, vec![Value::Int(1)], f, f);
        assert!(matches!(
            result,
            Err(VmError::ArityMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_pop_respects_frame_base() {
        let exe = exe();
        let f = FutureId::from_u64(1);
        let mut state = ThreadState::for_call(&exe, 0, vec![], f, f).unwrap();
        state.push(Value::Int(1));
        state.frames.push(Frame {
            function: 0,
            return_ip: Some(0),
            locals: BTreeMap::new(),
            base: 1,
        });
        assert!(matches!(state.pop(), Err(VmError::StackUnderflow)));
        assert!(state.pop_n(1).is_err());
        state.push(Value::Int(2));
        assert_eq!(state.pop().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_state_serializes() {
        let exe = exe();
        let f = FutureId::from_u64(7);
        let mut state = ThreadState::for_call(&exe, 0, vec![], f, f).unwrap();
        state.status = ThreadStatus::Blocked(FutureId::from_u64(8));
        state.awaiting = Some(AwaitPoint {
            future: FutureId::from_u64(8),
            resume_ip: 1,
            slot: 0,
        });
        let json = serde_json::to_vec(&state).unwrap();
        let back: ThreadState = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, state);
    }
}
