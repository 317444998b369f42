//! Fixed worker pool

use super::{Invocation, InvokeError, InvokeResult, Invoker};
use crate::runtime::Runtime;
use crate::thread::ThreadId;
use crate::value::Value;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Invoker that queues invocations for a fixed set of worker threads
pub struct PoolInvoker {
    sender: Sender<Invocation>,
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl PoolInvoker {
    /// Create a pool of `workers` threads serving `runtime`
    pub fn new(runtime: Weak<Runtime>, workers: usize) -> Self {
        let (sender, receiver) = channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handles = (0..workers.max(1))
            .map(|id| {
                let runtime = runtime.clone();
                let receiver = receiver.clone();
                let shutdown = shutdown.clone();
                thread::Builder::new()
                    .name(format!("strand-worker-{}", id))
                    .spawn(move || Self::run_loop(id, runtime, receiver, shutdown))
                    .expect("Failed to spawn worker thread")
            })
            .collect();

        Self {
            sender,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Stop the workers and wait for them to exit
    ///
    /// Invocations still queued are dropped.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);

        let current = thread::current().id();
        for handle in self.handles.lock().drain(..) {
            // A worker can end up dropping the last runtime handle itself.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }

    /// Worker thread main loop
    fn run_loop(
        id: usize,
        runtime: Weak<Runtime>,
        receiver: Receiver<Invocation>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            let invocation = match receiver.recv_timeout(Duration::from_millis(20)) {
                Ok(invocation) => invocation,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let Some(runtime) = runtime.upgrade() else {
                break;
            };
            let thread_id = invocation.thread();
            if let Err(e) = runtime.execute(invocation) {
                warn!(worker = id, thread = %thread_id, error = %e, "invocation failed");
            }
        }
        debug!(worker = id, "worker stopped");
    }

    fn dispatch(&self, invocation: Invocation) -> InvokeResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(InvokeError::ShutDown);
        }
        self.sender
            .send(invocation)
            .map_err(|_| InvokeError::ShutDown)
    }
}

impl Invoker for PoolInvoker {
    fn start(&self, thread: ThreadId) -> InvokeResult<()> {
        self.dispatch(Invocation::Start(thread))
    }

    fn resume(&self, thread: ThreadId, value: Value) -> InvokeResult<()> {
        self.dispatch(Invocation::Resume(thread, value))
    }
}

impl Drop for PoolInvoker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
