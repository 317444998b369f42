//! Strand VM Core Runtime
//!
//! This crate provides the distributed virtual machine runtime including:
//! - Bytecode interpreter (one thread at a time, until return or await)
//! - Future resolver (spawn, await with chase-through, exactly-once resolve)
//! - Data controller abstraction with in-memory and file-backed stores
//! - Invoker abstraction with thread, pool and process backends
//! - VM controller for starting programs and retrieving their results
//!
//! Threads share nothing but the data controller. A thread that awaits a
//! pending future is persisted and its execution unit ends; whichever thread
//! resolves the future resumes it through the invoker.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod controller;
pub mod foreign;
pub mod future;
pub mod interpreter;
pub mod invoker;
pub mod resolver;
pub mod runtime;
pub mod store;
pub mod thread;
pub mod value;

pub use config::{ConfigError, InvokerBackend, StorageBackend, VmConfig};
pub use controller::{
    program_outputs, program_status, wait_for_result, ProgramResult, ProgramStatus, RootHandle,
    ThreadOutput, VmController, WaitOptions,
};
pub use foreign::ForeignRegistry;
pub use future::{Continuation, FutureId, FutureRecord, FutureState, RegisterOutcome, ResolveOutcome, Waiter};
pub use interpreter::{Interpreter, RunOutcome};
pub use invoker::{Invocation, InvokeError, Invoker, PoolInvoker, ProcessInvoker, ThreadInvoker};
pub use resolver::{AwaitOutcome, Chase, Resolver};
pub use runtime::{Runtime, RuntimeOptions};
pub use store::{DataController, FileStore, MemoryStore, StoreError, StoreResult};
pub use thread::{AwaitPoint, Frame, ThreadId, ThreadState, ThreadStatus};
pub use value::{FunctionRef, Value};

use std::time::Duration;

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// List index out of range
    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: i64,
        /// List length
        len: usize,
    },

    /// Nothing bound to a name
    #[error("Nothing bound to {0}")]
    UnboundName(String),

    /// Function index outside the function table
    #[error("Invalid function index: {0}")]
    InvalidFunction(u32),

    /// Constant index outside the pool
    #[error("Invalid constant index: {0}")]
    InvalidConstant(u32),

    /// Symbol index outside the symbol table
    #[error("Invalid symbol index: {0}")]
    InvalidSymbol(u32),

    /// Jump outside the code
    #[error("Invalid jump target: {0}")]
    InvalidJump(i64),

    /// Wrong number of arguments
    #[error("{function} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Function name
        function: String,
        /// Declared parameters
        expected: usize,
        /// Supplied arguments
        actual: usize,
    },

    /// No foreign function registered under the name
    #[error("Unknown foreign function: {0}")]
    UnknownForeign(String),

    /// A foreign function reported an error
    #[error("Foreign function {name} failed: {message}")]
    Foreign {
        /// Function name
        name: String,
        /// Error message
        message: String,
    },

    /// The per-thread instruction limit was reached
    #[error("Thread {thread} exceeded the step limit after {steps} steps")]
    StepLimitExceeded {
        /// Thread
        thread: ThreadId,
        /// Steps executed
        steps: u64,
    },

    /// The executable has no entry function
    #[error("Entry function not found: {0}")]
    MissingEntry(String),

    /// Start requested for a thread that already ran
    #[error("Thread {0} has already been started")]
    NotStartable(ThreadId),

    /// Resume requested for a thread that is not suspended
    #[error("Thread {0} is not suspended")]
    NotSuspended(ThreadId),

    /// A future would have to wait on itself
    #[error("Future {0} depends on itself")]
    FutureCycle(FutureId),

    /// A thread of the program failed
    #[error("Thread {thread} failed: {message}")]
    ThreadFailed {
        /// Thread
        thread: ThreadId,
        /// Error message
        message: String,
    },

    /// No result within the configured timeout
    #[error("No result after {0:?}")]
    ResultTimeout(Duration),

    /// Data controller failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invoker failure
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Executable could not be decoded
    #[error(transparent)]
    Executable(#[from] strand_bytecode::ExecutableError),

    /// Executable failed verification
    #[error(transparent)]
    Verify(#[from] strand_bytecode::VerifyError),

    /// I/O failure outside the data controller
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
