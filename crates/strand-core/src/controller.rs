//! VM controller: program entry and result retrieval
//!
//! [`VmController::start`] creates the root future and the root thread for
//! the executable's entry function and hands it to the invoker. The program
//! result is the root future's value, which any process can read through the
//! data controller with [`program_status`] or [`wait_for_result`].

use crate::config::{InvokerBackend, StorageBackend, VmConfig};
use crate::foreign::ForeignRegistry;
use crate::future::{FutureId, FutureState};
use crate::invoker::{Invoker, PoolInvoker, ProcessInvoker, ThreadInvoker};
use crate::runtime::{Runtime, RuntimeOptions};
use crate::store::{DataController, FileStore, MemoryStore};
use crate::thread::{ThreadId, ThreadState, ThreadStatus};
use crate::value::Value;
use crate::{VmError, VmResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strand_bytecode::{verify_executable, Executable};
use tracing::debug;

/// File name of the encoded executable inside a file store directory
pub const EXECUTABLE_FILE: &str = "program.strd";

/// The root thread of a started program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootHandle {
    /// Root thread
    pub thread: ThreadId,
    /// Root (program) future
    pub future: FutureId,
}

/// Observed state of a program
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramStatus {
    /// The root future is pending and no thread has failed
    Running,
    /// The program result
    Finished(Value),
    /// A thread of the program failed
    Failed {
        /// Failed thread
        thread: ThreadId,
        /// Error message
        message: String,
    },
}

/// `Print` output of one thread
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadOutput {
    /// Thread
    pub thread: ThreadId,
    /// Printed lines, in order
    pub lines: Vec<String>,
}

/// Final result of a program run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramResult {
    /// Value of the root future
    pub value: Value,
    /// Output of every thread that printed, by thread id
    pub outputs: Vec<ThreadOutput>,
}

/// How to wait for a program result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between polls of the root future
    pub poll_interval: Duration,
    /// Give up after this long
    pub result_timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            result_timeout: None,
        }
    }
}

/// Observe the program whose root future is `root`
pub fn program_status(store: &dyn DataController, root: FutureId) -> VmResult<ProgramStatus> {
    poll_program(store, root, &mut HashSet::new())
}

/// One status poll; threads in `settled` are known to have finished
/// cleanly and are not read again
fn poll_program(
    store: &dyn DataController,
    root: FutureId,
    settled: &mut HashSet<ThreadId>,
) -> VmResult<ProgramStatus> {
    if let FutureState::Resolved(value) = store.read_future(root)?.state {
        return Ok(ProgramStatus::Finished(value));
    }

    for id in store.program_thread_ids(root)? {
        if settled.contains(&id) {
            continue;
        }
        match store.read_thread(id)?.status {
            ThreadStatus::Failed(message) => {
                return Ok(ProgramStatus::Failed {
                    thread: id,
                    message,
                })
            }
            ThreadStatus::Returned | ThreadStatus::Halted => {
                settled.insert(id);
            }
            _ => {}
        }
    }

    Ok(ProgramStatus::Running)
}

/// Poll until the program finishes, fails or the timeout expires
pub fn wait_for_result(
    store: &dyn DataController,
    root: FutureId,
    options: WaitOptions,
) -> VmResult<Value> {
    let started = Instant::now();
    let mut settled = HashSet::new();
    loop {
        match poll_program(store, root, &mut settled)? {
            ProgramStatus::Finished(value) => return Ok(value),
            ProgramStatus::Failed { thread, message } => {
                return Err(VmError::ThreadFailed { thread, message })
            }
            ProgramStatus::Running => {}
        }

        if let Some(timeout) = options.result_timeout {
            if started.elapsed() >= timeout {
                return Err(VmError::ResultTimeout(timeout));
            }
        }
        thread::sleep(options.poll_interval);
    }
}

/// Printed output of every thread of the program
pub fn program_outputs(store: &dyn DataController, root: FutureId) -> VmResult<Vec<ThreadOutput>> {
    let mut outputs = Vec::new();
    for id in store.program_thread_ids(root)? {
        let thread = store.read_thread(id)?;
        if !thread.output.is_empty() {
            outputs.push(ThreadOutput {
                thread: id,
                lines: thread.output,
            });
        }
    }
    Ok(outputs)
}

/// Top-level entry point for running a program
pub struct VmController {
    runtime: Arc<Runtime>,
    wait: WaitOptions,
}

impl VmController {
    /// Create a controller over an existing runtime
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            wait: WaitOptions::default(),
        }
    }

    /// Set how [`VmController::wait`] polls
    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Build the runtime and its backends from a configuration
    pub fn from_config(
        executable: Executable,
        config: &VmConfig,
        foreign: ForeignRegistry,
    ) -> VmResult<Self> {
        config.validate()?;
        verify_executable(&executable)?;

        let store: Arc<dyn DataController> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File => {
                let path = config.storage.path.clone().unwrap_or_default();
                Arc::new(FileStore::open(path)?)
            }
        };

        let options = RuntimeOptions {
            max_steps: config.runtime.max_steps,
        };

        // Out-of-process workers need the executable on disk next to the store.
        let process_invoker: Option<Arc<dyn Invoker>> = match config.invoker.backend {
            InvokerBackend::Process => {
                let dir = config.storage.path.clone().unwrap_or_default();
                let program = config.invoker.program.clone().unwrap_or_default();
                let exe_path = dir.join(EXECUTABLE_FILE);
                std::fs::write(&exe_path, executable.encode())?;
                Some(Arc::new(
                    ProcessInvoker::new(program, dir, exe_path).with_max_steps(options.max_steps),
                ))
            }
            InvokerBackend::Thread | InvokerBackend::Pool => None,
        };

        let backend = config.invoker.backend;
        let workers = config.invoker.workers;
        let runtime = Runtime::new(
            Arc::new(executable),
            store,
            foreign,
            options,
            move |weak| -> Arc<dyn Invoker> {
                match (backend, process_invoker) {
                    (_, Some(invoker)) => invoker,
                    (InvokerBackend::Pool, None) => Arc::new(PoolInvoker::new(weak, workers)),
                    (_, None) => Arc::new(ThreadInvoker::new(weak)),
                }
            },
        );

        Ok(Self::new(runtime).with_wait_options(WaitOptions {
            poll_interval: config.runtime.poll_interval(),
            result_timeout: config.runtime.result_timeout(),
        }))
    }

    /// The runtime
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Create and start the root thread with `args`
    pub fn start(&self, args: Vec<Value>) -> VmResult<RootHandle> {
        let exe = self.runtime.executable();
        let store = self.runtime.store();
        let (index, entry) = exe
            .entry_function()
            .ok_or_else(|| VmError::MissingEntry(exe.entry.clone()))?;

        let future = store.create_future()?;
        let state = ThreadState::for_call(exe, index, args, future, future)?;
        let thread = store.create_thread(state)?;
        debug!(thread = %thread, future = %future, entry = %entry.name, "program started");

        self.runtime.invoker().start(thread)?;
        Ok(RootHandle { thread, future })
    }

    /// Block until the program started with `root` finishes
    pub fn wait(&self, root: &RootHandle) -> VmResult<Value> {
        wait_for_result(self.runtime.store().as_ref(), root.future, self.wait)
    }

    /// Current state of the program started with `root`
    pub fn status(&self, root: &RootHandle) -> VmResult<ProgramStatus> {
        program_status(self.runtime.store().as_ref(), root.future)
    }

    /// Start the program, wait for it, and collect its output
    pub fn run(&self, args: Vec<Value>) -> VmResult<ProgramResult> {
        let root = self.start(args)?;
        let value = self.wait(&root)?;
        let outputs = program_outputs(self.runtime.store().as_ref(), root.future)?;
        Ok(ProgramResult { value, outputs })
    }
}
