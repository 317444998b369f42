//! Data controller: storage of thread and future records
//!
//! Every cross-thread interaction goes through this interface. Thread
//! records are plain read/write (a running thread owns its record); future
//! records change only through [`DataController::try_resolve_future`] and
//! [`DataController::try_register_continuation`], which each backend must
//! implement as a single atomic step.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::future::{Continuation, FutureId, FutureRecord, RegisterOutcome, ResolveOutcome};
use crate::thread::{ThreadId, ThreadState};
use crate::value::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No such thread record
    #[error("Thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// No such future record
    #[error("Future not found: {0}")]
    FutureNotFound(FutureId),

    /// I/O failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failure
    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record lock could not be acquired in time
    #[error("Timed out acquiring lock {0}")]
    LockTimeout(PathBuf),

    /// A record on disk does not match its name
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Storage result
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage abstraction for thread and future records
pub trait DataController: Send + Sync {
    /// Persist a new thread, assigning its id
    fn create_thread(&self, state: ThreadState) -> StoreResult<ThreadId>;

    /// Read a thread record
    fn read_thread(&self, id: ThreadId) -> StoreResult<ThreadState>;

    /// Overwrite a thread record
    fn write_thread(&self, state: &ThreadState) -> StoreResult<()>;

    /// Allocate a pending future with no continuations
    fn create_future(&self) -> StoreResult<FutureId>;

    /// Read a future record
    fn read_future(&self, id: FutureId) -> StoreResult<FutureRecord>;

    /// Atomically resolve a pending future and drain its continuations
    fn try_resolve_future(&self, id: FutureId, value: Value) -> StoreResult<ResolveOutcome>;

    /// Atomically register a continuation on a pending future
    fn try_register_continuation(
        &self,
        id: FutureId,
        continuation: Continuation,
    ) -> StoreResult<RegisterOutcome>;

    /// Ids of every thread record, in ascending order
    fn thread_ids(&self) -> StoreResult<Vec<ThreadId>>;

    /// Ids of the threads belonging to the program rooted at `program`, in
    /// ascending order
    ///
    /// The default reads every thread record. Backends that index threads
    /// by program override it.
    fn program_thread_ids(&self, program: FutureId) -> StoreResult<Vec<ThreadId>> {
        let mut ids = Vec::new();
        for id in self.thread_ids()? {
            if self.read_thread(id)?.program_future == program {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
