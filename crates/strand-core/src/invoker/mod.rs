//! Invokers: where threads run
//!
//! An invoker turns "start thread T" or "resume thread T with v" into an
//! execution of [`crate::Runtime::execute`] somewhere. Both operations return
//! as soon as the request is issued.

mod pool;
mod process;
mod thread;

pub use pool::PoolInvoker;
pub use process::ProcessInvoker;
pub use thread::ThreadInvoker;

use crate::thread::ThreadId;
use crate::value::Value;
use thiserror::Error;

/// Invocation backend errors
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The runtime the invoker serves has been dropped
    #[error("Runtime is no longer available")]
    RuntimeGone,

    /// The worker pool is shut down
    #[error("Invoker is shut down")]
    ShutDown,

    /// Spawning an OS thread or process failed
    #[error("Failed to spawn execution unit: {0}")]
    Spawn(#[from] std::io::Error),

    /// The resume value could not be encoded
    #[error("Failed to encode resume value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invocation result
pub type InvokeResult<T> = Result<T, InvokeError>;

/// A request to run a thread
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Begin a freshly created thread
    Start(ThreadId),
    /// Continue a suspended thread, delivering the awaited value
    Resume(ThreadId, Value),
}

impl Invocation {
    /// Thread this invocation targets
    pub fn thread(&self) -> ThreadId {
        match self {
            Invocation::Start(id) | Invocation::Resume(id, _) => *id,
        }
    }
}

/// Invocation abstraction
pub trait Invoker: Send + Sync {
    /// Begin executing a freshly created thread
    fn start(&self, thread: ThreadId) -> InvokeResult<()>;

    /// Continue a suspended thread with `value`
    fn resume(&self, thread: ThreadId, value: Value) -> InvokeResult<()>;
}
