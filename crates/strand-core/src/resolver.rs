//! Spawning, awaiting and resolving futures
//!
//! The resolver is the only code that moves futures through their
//! lifecycle. It reads and updates records through the data controller and
//! asks the invoker to start or resume threads; it keeps no state of its own.
//!
//! Chaining: a future may be resolved with another future. Awaiting chases
//! through stored future values until it reaches a concrete value or a
//! pending future. Resolving with a pending future registers a
//! [`Continuation::Forward`] on the terminal future instead of storing the
//! reference, so a future only ever stores a concrete value.

use crate::future::{Continuation, FutureId, FutureState, RegisterOutcome, ResolveOutcome, Waiter};
use crate::invoker::Invoker;
use crate::store::DataController;
use crate::thread::{AwaitPoint, ThreadState, ThreadStatus};
use crate::value::Value;
use crate::{VmError, VmResult};
use strand_bytecode::Executable;
use tracing::debug;

/// Where a chase through stored futures ended
#[derive(Debug, Clone, PartialEq)]
pub enum Chase {
    /// A concrete value
    Resolved(Value),
    /// The deepest future, still pending
    Pending(FutureId),
}

/// Result of awaiting a future
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    /// The value is available now
    Immediate(Value),
    /// The thread was persisted and registered on this terminal future
    Deferred(FutureId),
}

/// Future lifecycle operations over a store and an invoker
pub struct Resolver<'a> {
    exe: &'a Executable,
    store: &'a dyn DataController,
    invoker: &'a dyn Invoker,
}

impl<'a> Resolver<'a> {
    /// Create a resolver
    pub fn new(
        exe: &'a Executable,
        store: &'a dyn DataController,
        invoker: &'a dyn Invoker,
    ) -> Self {
        Self {
            exe,
            store,
            invoker,
        }
    }

    /// Spawn `function(args)` on a new thread and return its future
    ///
    /// The child inherits the parent's program future.
    pub fn spawn(&self, parent: &ThreadState, function: u32, args: Vec<Value>) -> VmResult<FutureId> {
        let future = self.store.create_future()?;
        let state = ThreadState::for_call(self.exe, function, args, future, parent.program_future)?;
        let child = self.store.create_thread(state)?;
        debug!(parent = %parent.id, thread = %child, future = %future, function, "spawn");

        self.invoker.start(child)?;
        Ok(future)
    }

    /// Follow stored future references from `future`
    pub fn chase(&self, future: FutureId) -> VmResult<Chase> {
        let mut current = future;
        let mut visited = Vec::new();
        loop {
            if visited.contains(&current) {
                return Err(VmError::FutureCycle(current));
            }
            visited.push(current);

            match self.store.read_future(current)?.state {
                FutureState::Pending => return Ok(Chase::Pending(current)),
                FutureState::Resolved(Value::Future(inner)) => current = inner,
                FutureState::Resolved(value) => return Ok(Chase::Resolved(value)),
            }
        }
    }

    /// Await `future` on behalf of `thread`
    ///
    /// `thread.ip` must already point past the `Await` and the future must
    /// already be popped. When the terminal future is pending, the thread is
    /// persisted as blocked *before* its continuation is registered, so a
    /// resolver on another unit can resume it as soon as registration lands.
    /// After a `Deferred` outcome the caller must not write the thread again.
    pub fn await_future(&self, future: FutureId, thread: &mut ThreadState) -> VmResult<AwaitOutcome> {
        let mut current = future;
        loop {
            let terminal = match self.chase(current)? {
                Chase::Resolved(value) => return Ok(AwaitOutcome::Immediate(value)),
                Chase::Pending(terminal) => terminal,
            };

            let point = AwaitPoint {
                future: terminal,
                resume_ip: thread.ip,
                slot: thread.stack.len(),
            };
            thread.status = ThreadStatus::Blocked(terminal);
            thread.awaiting = Some(point);
            self.store.write_thread(thread)?;

            let waiter = Continuation::Resume(Waiter {
                thread: thread.id,
                resume_ip: point.resume_ip,
                slot: point.slot,
            });
            match self.store.try_register_continuation(terminal, waiter)? {
                RegisterOutcome::Registered => {
                    debug!(thread = %thread.id, future = %terminal, ip = point.resume_ip, "blocked");
                    return Ok(AwaitOutcome::Deferred(terminal));
                }
                RegisterOutcome::AlreadyResolved(value) => {
                    // Resolved between the read and the registration.
                    thread.status = ThreadStatus::Running;
                    thread.awaiting = None;
                    match value {
                        Value::Future(inner) => current = inner,
                        value => return Ok(AwaitOutcome::Immediate(value)),
                    }
                }
            }
        }
    }

    /// Resolve `future` with `value`, chasing through future values
    ///
    /// Resolving an already-resolved future is a no-op. Continuations drained
    /// by this call are fired exactly once; an invoker failure is returned
    /// after the remaining continuations have been attempted.
    pub fn resolve(&self, future: FutureId, value: Value) -> VmResult<()> {
        let mut value = value;
        loop {
            let Value::Future(inner) = value else {
                return self.complete(future, value);
            };

            let terminal = match self.chase(inner)? {
                Chase::Resolved(concrete) => return self.complete(future, concrete),
                Chase::Pending(terminal) => terminal,
            };
            if terminal == future {
                return Err(VmError::FutureCycle(future));
            }

            match self
                .store
                .try_register_continuation(terminal, Continuation::Forward(future))?
            {
                RegisterOutcome::Registered => {
                    debug!(future = %future, target = %terminal, "forwarded");
                    return Ok(());
                }
                RegisterOutcome::AlreadyResolved(resolved) => value = resolved,
            }
        }
    }

    /// Store a concrete value and fire the drained continuations
    fn complete(&self, future: FutureId, value: Value) -> VmResult<()> {
        let continuations = match self.store.try_resolve_future(future, value.clone())? {
            ResolveOutcome::Resolved(continuations) => continuations,
            ResolveOutcome::AlreadyResolved(_) => {
                debug!(future = %future, "already resolved");
                return Ok(());
            }
        };
        debug!(future = %future, continuations = continuations.len(), "resolved");

        let mut first_error = None;
        for continuation in continuations {
            let fired = match continuation {
                Continuation::Resume(waiter) => self
                    .invoker
                    .resume(waiter.thread, value.clone())
                    .map_err(VmError::from),
                Continuation::Forward(target) => self.complete(target, value.clone()),
            };
            if let Err(e) = fired {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
