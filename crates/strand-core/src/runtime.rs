//! Execution context shared by every invocation of one program
//!
//! A [`Runtime`] bundles the executable with handles to the data controller,
//! the invoker and the foreign-function registry. [`Runtime::execute`] is one
//! execution unit's worth of work: load a thread, run it until it returns,
//! blocks or ends the program, and record the result.

use crate::foreign::ForeignRegistry;
use crate::interpreter::{Interpreter, RunOutcome};
use crate::invoker::{Invocation, Invoker};
use crate::resolver::Resolver;
use crate::store::DataController;
use crate::thread::ThreadStatus;
use crate::{VmError, VmResult};
use std::sync::{Arc, Weak};
use strand_bytecode::Executable;
use tracing::{debug, warn};

/// Runtime options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Fail a thread after this many instructions
    pub max_steps: Option<u64>,
}

/// Program execution context
pub struct Runtime {
    executable: Arc<Executable>,
    store: Arc<dyn DataController>,
    invoker: Arc<dyn Invoker>,
    foreign: ForeignRegistry,
    options: RuntimeOptions,
}

impl Runtime {
    /// Create a runtime
    ///
    /// `invoker` receives a weak handle to the runtime being built, which
    /// in-process invokers use to call back into [`Runtime::execute`].
    pub fn new<F>(
        executable: Arc<Executable>,
        store: Arc<dyn DataController>,
        foreign: ForeignRegistry,
        options: RuntimeOptions,
        invoker: F,
    ) -> Arc<Self>
    where
        F: FnOnce(Weak<Runtime>) -> Arc<dyn Invoker>,
    {
        Arc::new_cyclic(|weak| Self {
            executable,
            store,
            invoker: invoker(weak.clone()),
            foreign,
            options,
        })
    }

    /// The program
    pub fn executable(&self) -> &Arc<Executable> {
        &self.executable
    }

    /// The data controller
    pub fn store(&self) -> &Arc<dyn DataController> {
        &self.store
    }

    /// The invoker
    pub fn invoker(&self) -> &Arc<dyn Invoker> {
        &self.invoker
    }

    /// Runtime options
    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    /// A resolver over this runtime's store and invoker
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.executable, self.store.as_ref(), self.invoker.as_ref())
    }

    /// Run one invocation to completion or suspension
    ///
    /// Returns the thread's status afterwards. A failure marks the thread
    /// [`ThreadStatus::Failed`] in the store before the error is returned;
    /// its future is never resolved.
    pub fn execute(&self, invocation: Invocation) -> VmResult<ThreadStatus> {
        let id = invocation.thread();
        let mut thread = self.store.read_thread(id)?;

        match invocation {
            Invocation::Start(_) => {
                if thread.status != ThreadStatus::New {
                    return Err(VmError::NotStartable(id));
                }
                debug!(thread = %id, function = thread.function, "start");
            }
            Invocation::Resume(_, value) => {
                let point = thread.awaiting.take().ok_or(VmError::NotSuspended(id))?;
                thread.ip = point.resume_ip;
                let slot = point.slot.min(thread.stack.len());
                thread.stack.insert(slot, value);
                debug!(thread = %id, future = %point.future, ip = point.resume_ip, "resume");
            }
        }
        thread.status = ThreadStatus::Running;

        let resolver = self.resolver();
        let interpreter = Interpreter::new(
            &self.executable,
            &resolver,
            &self.foreign,
            self.options.max_steps,
        );

        let outcome = match interpreter.run(&mut thread) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(thread = %id, ip = thread.ip, error = %e, "thread failed");
                thread.status = ThreadStatus::Failed(e.to_string());
                thread.awaiting = None;
                self.store.write_thread(&thread)?;
                return Err(e);
            }
        };

        match outcome {
            RunOutcome::Returned(value) => {
                debug!(thread = %id, future = %thread.result_future, "returned");
                thread.status = ThreadStatus::Returned;
                self.store.write_thread(&thread)?;
                resolver.resolve(thread.result_future, value)?;
            }
            RunOutcome::EndedProgram(value) => {
                debug!(thread = %id, future = %thread.program_future, "program ended");
                thread.status = ThreadStatus::Halted;
                self.store.write_thread(&thread)?;
                resolver.resolve(thread.program_future, value)?;
            }
            RunOutcome::Blocked(_) => {
                // Persisted by the resolver; another unit may already own it.
            }
        }

        Ok(thread.status)
    }
}
