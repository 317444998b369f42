//! One OS thread per invocation

use super::{Invocation, InvokeError, InvokeResult, Invoker};
use crate::runtime::Runtime;
use crate::thread::ThreadId;
use crate::value::Value;
use std::sync::Weak;
use std::thread;
use tracing::warn;

/// Runs every invocation on a new named OS thread
pub struct ThreadInvoker {
    runtime: Weak<Runtime>,
}

impl ThreadInvoker {
    /// Create an invoker serving `runtime`
    pub fn new(runtime: Weak<Runtime>) -> Self {
        Self { runtime }
    }

    fn dispatch(&self, invocation: Invocation) -> InvokeResult<()> {
        let runtime = self.runtime.upgrade().ok_or(InvokeError::RuntimeGone)?;
        let thread_id = invocation.thread();

        thread::Builder::new()
            .name(format!("strand-{}", thread_id))
            .spawn(move || {
                if let Err(e) = runtime.execute(invocation) {
                    warn!(thread = %thread_id, error = %e, "invocation failed");
                }
            })?;
        Ok(())
    }
}

impl Invoker for ThreadInvoker {
    fn start(&self, thread: ThreadId) -> InvokeResult<()> {
        self.dispatch(Invocation::Start(thread))
    }

    fn resume(&self, thread: ThreadId, value: Value) -> InvokeResult<()> {
        self.dispatch(Invocation::Resume(thread, value))
    }
}
