//! In-memory data controller

use super::{DataController, StoreError, StoreResult};
use crate::future::{Continuation, FutureId, FutureRecord, RegisterOutcome, ResolveOutcome};
use crate::thread::{ThreadId, ThreadState};
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Data controller backed by concurrent maps
///
/// Each future record sits behind its own mutex, so a resolve and a
/// registration on the same future are serialized without holding a map
/// shard lock across the transition.
pub struct MemoryStore {
    threads: DashMap<ThreadId, ThreadState>,
    futures: DashMap<FutureId, Arc<Mutex<FutureRecord>>>,
    programs: DashMap<FutureId, Vec<ThreadId>>,
    next_thread: AtomicU64,
    next_future: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            threads: DashMap::new(),
            futures: DashMap::new(),
            programs: DashMap::new(),
            next_thread: AtomicU64::new(1),
            next_future: AtomicU64::new(1),
        }
    }

    fn future(&self, id: FutureId) -> StoreResult<Arc<Mutex<FutureRecord>>> {
        self.futures
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::FutureNotFound(id))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataController for MemoryStore {
    fn create_thread(&self, mut state: ThreadState) -> StoreResult<ThreadId> {
        let id = ThreadId::from_u64(self.next_thread.fetch_add(1, Ordering::Relaxed));
        state.id = id;
        let program = state.program_future;
        self.threads.insert(id, state);
        self.programs.entry(program).or_default().push(id);
        Ok(id)
    }

    fn read_thread(&self, id: ThreadId) -> StoreResult<ThreadState> {
        self.threads
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::ThreadNotFound(id))
    }

    fn write_thread(&self, state: &ThreadState) -> StoreResult<()> {
        match self.threads.get_mut(&state.id) {
            Some(mut entry) => {
                *entry = state.clone();
                Ok(())
            }
            None => Err(StoreError::ThreadNotFound(state.id)),
        }
    }

    fn create_future(&self) -> StoreResult<FutureId> {
        let id = FutureId::from_u64(self.next_future.fetch_add(1, Ordering::Relaxed));
        self.futures
            .insert(id, Arc::new(Mutex::new(FutureRecord::pending(id))));
        Ok(id)
    }

    fn read_future(&self, id: FutureId) -> StoreResult<FutureRecord> {
        Ok(self.future(id)?.lock().clone())
    }

    fn try_resolve_future(&self, id: FutureId, value: Value) -> StoreResult<ResolveOutcome> {
        Ok(self.future(id)?.lock().resolve(value))
    }

    fn try_register_continuation(
        &self,
        id: FutureId,
        continuation: Continuation,
    ) -> StoreResult<RegisterOutcome> {
        Ok(self.future(id)?.lock().register(continuation))
    }

    fn thread_ids(&self) -> StoreResult<Vec<ThreadId>> {
        let mut ids: Vec<ThreadId> = self.threads.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        Ok(ids)
    }

    fn program_thread_ids(&self, program: FutureId) -> StoreResult<Vec<ThreadId>> {
        let mut ids = self
            .programs
            .get(&program)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}
