//! One OS process per invocation
//!
//! Each invocation spawns the worker program, which opens the shared file
//! store, runs exactly one thread until it returns or blocks, and exits.
//! Nothing but the store is shared between processes.

use super::{InvokeResult, Invoker};
use crate::thread::ThreadId;
use crate::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// Invoker that runs each invocation in a fresh worker process
pub struct ProcessInvoker {
    program: PathBuf,
    store: PathBuf,
    executable: PathBuf,
    max_steps: Option<u64>,
    children: Mutex<Vec<Child>>,
}

impl ProcessInvoker {
    /// Create an invoker
    ///
    /// * `program` - worker binary
    /// * `store` - file store directory shared by all processes
    /// * `executable` - encoded executable the workers load
    pub fn new(
        program: impl Into<PathBuf>,
        store: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            store: store.into(),
            executable: executable.into(),
            max_steps: None,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Pass a per-thread step limit to the workers
    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Worker binary
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Number of spawned workers that have not exited yet
    pub fn running(&self) -> usize {
        let mut children = self.children.lock();
        children.retain_mut(|child| matches!(child.try_wait(), Ok(None)));
        children.len()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--store")
            .arg(&self.store)
            .arg("--executable")
            .arg(&self.executable)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        if let Some(max_steps) = self.max_steps {
            command.arg("--max-steps").arg(max_steps.to_string());
        }
        command
    }

    fn spawn(&self, mut command: Command) -> InvokeResult<()> {
        let child = command.spawn()?;
        debug!(pid = child.id(), program = %self.program.display(), "spawned worker");

        let mut children = self.children.lock();
        children.retain_mut(|child| matches!(child.try_wait(), Ok(None)));
        children.push(child);
        Ok(())
    }
}

impl Invoker for ProcessInvoker {
    fn start(&self, thread: ThreadId) -> InvokeResult<()> {
        let mut command = self.command();
        command.arg("start").arg(thread.as_u64().to_string());
        self.spawn(command)
    }

    fn resume(&self, thread: ThreadId, value: Value) -> InvokeResult<()> {
        let mut command = self.command();
        command
            .arg("resume")
            .arg(thread.as_u64().to_string())
            .arg(serde_json::to_string(&value)?);
        self.spawn(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::InvokeError;

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let invoker = ProcessInvoker::new("/nonexistent/strand-worker", "/tmp", "/tmp/x.strd");
        assert!(matches!(
            invoker.start(ThreadId::from_u64(1)),
            Err(InvokeError::Spawn(_))
        ));
        assert_eq!(invoker.running(), 0);
    }
}
