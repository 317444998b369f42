//! Directory-backed data controller
//!
//! Records are JSON documents, one file per thread and per future:
//!
//! ```text
//! <root>/threads/<id>.json
//! <root>/futures/<id>.json
//! <root>/programs/<root future id>/<thread id>
//! <root>/counters/{thread,future}
//! <root>/locks/
//! <root>/tmp/
//! ```
//!
//! Every write goes to `tmp/` first and is renamed into place, so readers
//! never observe a partial record. Future transitions and id allocation run
//! under an exclusive lock file created with `create_new`, which makes the
//! store safe to share between independent processes.
//!
//! A lock file holds the pid of its owner. Locks are only held for a single
//! record transition, so a lock file older than the stale age (30s by
//! default) is assumed to belong to a process that died while holding it.
//! It is moved aside and removed before the acquisition is retried.

use super::{DataController, StoreError, StoreResult};
use crate::future::{Continuation, FutureId, FutureRecord, RegisterOutcome, ResolveOutcome};
use crate::thread::{ThreadId, ThreadState};
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Data controller storing records as files under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
    stale_lock_age: Duration,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in ["threads", "futures", "programs", "counters", "locks", "tmp"] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_age: DEFAULT_STALE_LOCK_AGE,
        })
    }

    /// Set how long to wait for a record lock before failing
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the age after which an existing lock file is considered abandoned
    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_lock_age = age;
        self
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_path(&self, id: ThreadId) -> PathBuf {
        self.root.join("threads").join(format!("{}.json", id.as_u64()))
    }

    fn future_path(&self, id: FutureId) -> PathBuf {
        self.root.join("futures").join(format!("{}.json", id.as_u64()))
    }

    fn program_dir(&self, program: FutureId) -> PathBuf {
        self.root.join("programs").join(program.as_u64().to_string())
    }

    fn lock(&self, name: &str) -> StoreResult<FileLock> {
        FileLock::acquire(
            self.root.join("locks").join(name),
            self.lock_timeout,
            self.stale_lock_age,
        )
    }

    fn next_id(&self, kind: &str) -> StoreResult<u64> {
        let _guard = self.lock(&format!("counter-{}.lock", kind))?;
        let path = self.root.join("counters").join(kind);
        let current = match fs::read_to_string(&path) {
            Ok(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| StoreError::Corrupt(path.display().to_string()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let next = current + 1;
        self.write_atomic(&path, next.to_string().as_bytes())?;
        Ok(next)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let tmp_path = self.root.join("tmp").join(format!(
            "{}-{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.write_atomic(path, &bytes)
    }

    fn read_record<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write a future record under its lock
    fn update_future<R>(
        &self,
        id: FutureId,
        update: impl FnOnce(&mut FutureRecord) -> R,
    ) -> StoreResult<R> {
        let _guard = self.lock(&format!("future-{}.lock", id.as_u64()))?;
        let path = self.future_path(id);
        let mut record: FutureRecord = self
            .read_record(&path)?
            .ok_or(StoreError::FutureNotFound(id))?;
        let result = update(&mut record);
        self.write_record(&path, &record)?;
        Ok(result)
    }
}

impl DataController for FileStore {
    fn create_thread(&self, mut state: ThreadState) -> StoreResult<ThreadId> {
        let id = ThreadId::from_u64(self.next_id("thread")?);
        state.id = id;
        self.write_record(&self.thread_path(id), &state)?;

        // Empty marker indexing the thread under its program
        let program_dir = self.program_dir(state.program_future);
        fs::create_dir_all(&program_dir)?;
        fs::File::create(program_dir.join(id.as_u64().to_string()))?;
        Ok(id)
    }

    fn read_thread(&self, id: ThreadId) -> StoreResult<ThreadState> {
        self.read_record(&self.thread_path(id))?
            .ok_or(StoreError::ThreadNotFound(id))
    }

    fn write_thread(&self, state: &ThreadState) -> StoreResult<()> {
        let path = self.thread_path(state.id);
        if !path.exists() {
            return Err(StoreError::ThreadNotFound(state.id));
        }
        self.write_record(&path, state)
    }

    fn create_future(&self) -> StoreResult<FutureId> {
        let id = FutureId::from_u64(self.next_id("future")?);
        self.write_record(&self.future_path(id), &FutureRecord::pending(id))?;
        Ok(id)
    }

    fn read_future(&self, id: FutureId) -> StoreResult<FutureRecord> {
        self.read_record(&self.future_path(id))?
            .ok_or(StoreError::FutureNotFound(id))
    }

    fn try_resolve_future(&self, id: FutureId, value: Value) -> StoreResult<ResolveOutcome> {
        self.update_future(id, |record| record.resolve(value))
    }

    fn try_register_continuation(
        &self,
        id: FutureId,
        continuation: Continuation,
    ) -> StoreResult<RegisterOutcome> {
        self.update_future(id, |record| record.register(continuation))
    }

    fn thread_ids(&self) -> StoreResult<Vec<ThreadId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("threads"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
                .ok_or_else(|| StoreError::Corrupt(path.display().to_string()))?;
            ids.push(ThreadId::from_u64(id));
        }
        ids.sort();
        Ok(ids)
    }

    fn program_thread_ids(&self, program: FutureId) -> StoreResult<Vec<ThreadId>> {
        let entries = match fs::read_dir(self.program_dir(program)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let id = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<u64>().ok())
                .ok_or_else(|| StoreError::Corrupt(path.display().to_string()))?;
            ids.push(ThreadId::from_u64(id));
        }
        ids.sort();
        Ok(ids)
    }
}

/// Exclusive lock held by the existence of a file
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: PathBuf, timeout: Duration, stale_after: Duration) -> StoreResult<Self> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_micros(50);
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let lock = Self { path };
                    writeln!(file, "{}", std::process::id())?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::break_if_stale(&path, stale_after)? {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout(path));
                    }
                    trace!(lock = %path.display(), "lock busy");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(5));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove the lock file at `path` if it is older than `stale_after`
    ///
    /// The file is renamed to a unique name first, so of several processes
    /// that find the same stale lock only one removes it.
    fn break_if_stale(path: &Path, stale_after: Duration) -> StoreResult<bool> {
        let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let age = modified.elapsed().unwrap_or_default();
        if age < stale_after {
            return Ok(false);
        }

        let aside = path.with_extension(format!(
            "stale-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        match fs::rename(path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }
        // Another process may have broken the lock and a new owner taken it
        // between the age check and the rename; hand a fresh lock back.
        let still_stale = fs::metadata(&aside)
            .and_then(|meta| meta.modified())
            .map(|modified| modified.elapsed().unwrap_or_default() >= stale_after)?;
        if !still_stale {
            let restored = fs::hard_link(&aside, path);
            fs::remove_file(&aside)?;
            return match restored {
                Ok(()) => Ok(false),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e.into()),
            };
        }
        let owner = fs::read_to_string(&aside).unwrap_or_default();
        warn!(
            lock = %path.display(),
            owner = owner.trim(),
            age_ms = age.as_millis() as u64,
            "breaking stale lock"
        );
        fs::remove_file(&aside)?;
        Ok(true)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Waiter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn waiter(thread: u64) -> Continuation {
        Continuation::Resume(Waiter {
            thread: ThreadId::from_u64(thread),
            resume_ip: 1,
            slot: 0,
        })
    }

    #[test]
    fn test_ids_are_sequential() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let a = store.create_future().unwrap();
        let b = store.create_future().unwrap();
        assert_eq!(b.as_u64(), a.as_u64() + 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = FileStore::open(dir.path()).unwrap();
            let id = store.create_future().unwrap();
            store.try_register_continuation(id, waiter(4)).unwrap();
            id
        };

        let store = FileStore::open(dir.path()).unwrap();
        let record = store.read_future(id).unwrap();
        assert_eq!(record.continuations, vec![waiter(4)]);
        assert_eq!(
            store.try_resolve_future(id, Value::Int(1)).unwrap(),
            ResolveOutcome::Resolved(vec![waiter(4)])
        );
        assert_eq!(store.read_future(id).unwrap().value(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_non_finite_floats_survive_reload() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut b = strand_bytecode::ExecutableBuilder::new("floats");
        b.begin_function("main", &[]);
        b.emit(strand_bytecode::Instruction::Return);
        let exe = b.build().unwrap();

        let future = store.create_future().unwrap();
        let mut state = ThreadState::for_call(&exe, 0, vec![], future, future).unwrap();
        state.stack.push(Value::Float(f64::INFINITY));
        state.stack.push(Value::Float(f64::NAN));
        let id = store.create_thread(state).unwrap();

        let stored = store.read_thread(id).unwrap();
        assert_eq!(stored.stack[0], Value::Float(f64::INFINITY));
        assert!(matches!(stored.stack[1], Value::Float(x) if x.is_nan()));

        store
            .try_resolve_future(future, Value::Float(f64::NEG_INFINITY))
            .unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.read_future(future).unwrap().value(),
            Some(&Value::Float(f64::NEG_INFINITY))
        );
    }

    fn thread_for(exe: &strand_bytecode::Executable, program: FutureId) -> ThreadState {
        ThreadState::for_call(exe, 0, vec![], program, program).unwrap()
    }

    #[test]
    fn test_threads_indexed_by_program() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut b = strand_bytecode::ExecutableBuilder::new("index");
        b.begin_function("main", &[]);
        b.emit(strand_bytecode::Instruction::Return);
        let exe = b.build().unwrap();

        let first = store.create_future().unwrap();
        let second = store.create_future().unwrap();
        let a = store.create_thread(thread_for(&exe, first)).unwrap();
        let b = store.create_thread(thread_for(&exe, second)).unwrap();
        let c = store.create_thread(thread_for(&exe, first)).unwrap();

        assert_eq!(store.program_thread_ids(first).unwrap(), vec![a, c]);
        assert_eq!(store.program_thread_ids(second).unwrap(), vec![b]);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.program_thread_ids(first).unwrap(), vec![a, c]);
        assert!(reopened
            .program_thread_ids(FutureId::from_u64(77))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_future() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.try_resolve_future(FutureId::from_u64(99), Value::Null),
            Err(StoreError::FutureNotFound(_))
        ));
    }

    #[test]
    fn test_lock_timeout() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path())
            .unwrap()
            .with_lock_timeout(Duration::from_millis(20));
        let id = store.create_future().unwrap();

        let _held = store.lock(&format!("future-{}.lock", id.as_u64())).unwrap();
        assert!(matches!(
            store.try_resolve_future(id, Value::Null),
            Err(StoreError::LockTimeout(_))
        ));
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path())
            .unwrap()
            .with_lock_timeout(Duration::from_millis(200))
            .with_stale_lock_age(Duration::from_secs(1));
        let id = store.create_future().unwrap();

        // Left behind by a process that died holding it
        let lock_path = dir
            .path()
            .join("locks")
            .join(format!("future-{}.lock", id.as_u64()));
        let mut lock_file = fs::File::create(&lock_path).unwrap();
        writeln!(lock_file, "4242").unwrap();
        lock_file
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        drop(lock_file);

        assert_eq!(
            store.try_resolve_future(id, Value::Int(3)).unwrap(),
            ResolveOutcome::Resolved(vec![])
        );
        assert_eq!(store.read_future(id).unwrap().value(), Some(&Value::Int(3)));
        assert!(!lock_path.exists());
        assert_eq!(fs::read_dir(dir.path().join("locks")).unwrap().count(), 0);
    }

    #[test]
    fn test_lock_file_records_owner() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let _held = store.lock("owner.lock").unwrap();
        let owner = fs::read_to_string(dir.path().join("locks").join("owner.lock")).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_concurrent_handles_single_winner() {
        let dir = TempDir::new().unwrap();
        let id = FileStore::open(dir.path()).unwrap().create_future().unwrap();
        let root = Arc::new(dir.path().to_path_buf());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let root = root.clone();
                thread::spawn(move || {
                    let store = FileStore::open(root.as_path()).unwrap();
                    store.try_resolve_future(id, Value::Int(i)).unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, ResolveOutcome::Resolved(_)))
            .count();
        assert_eq!(winners, 1);
    }
}
