//! Races between resolvers, waiters and store handles

use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use strand_bytecode::{Executable, ExecutableBuilder, Instruction};
use strand_core::invoker::InvokeResult;
use strand_core::{
    wait_for_result, Continuation, DataController, FileStore, ForeignRegistry, FutureState,
    Invoker, MemoryStore, RegisterOutcome, ResolveOutcome, Runtime, RuntimeOptions,
    ThreadId, ThreadInvoker, Value, WaitOptions, Waiter,
};
use tempfile::TempDir;

/// Records resumptions instead of running them
#[derive(Default)]
struct Recorder(Mutex<Vec<(ThreadId, Value)>>);

impl Invoker for Recorder {
    fn start(&self, _thread: ThreadId) -> InvokeResult<()> {
        Ok(())
    }

    fn resume(&self, thread: ThreadId, value: Value) -> InvokeResult<()> {
        self.0.lock().push((thread, value));
        Ok(())
    }
}

fn waiter(thread: u64) -> Continuation {
    Continuation::Resume(Waiter {
        thread: ThreadId::from_u64(thread),
        resume_ip: 0,
        slot: 0,
    })
}

fn wait_options() -> WaitOptions {
    WaitOptions {
        poll_interval: Duration::from_millis(1),
        result_timeout: Some(Duration::from_secs(10)),
    }
}

/// main(f): await f, then add one
fn await_argument_program() -> Executable {
    let mut b = ExecutableBuilder::new("await-argument");
    b.begin_function("main", &["f"]);
    b.load("f").emit(Instruction::Await);
    b.push_int(1).emit(Instruction::Add).emit(Instruction::Return);
    b.build().unwrap()
}

fn runtime(exe: Arc<Executable>, store: Arc<dyn DataController>) -> Arc<Runtime> {
    Runtime::new(
        exe,
        store,
        ForeignRegistry::new(),
        RuntimeOptions::default(),
        |weak| Arc::new(ThreadInvoker::new(weak)) as Arc<dyn Invoker>,
    )
}

/// Every waiter is handed to exactly one resolver
fn single_winner(store: Arc<dyn DataController>, resolvers: usize) {
    let future = store.create_future().unwrap();
    for thread in 0..4 {
        store.try_register_continuation(future, waiter(thread)).unwrap();
    }

    let barrier = Arc::new(Barrier::new(resolvers));
    let handles: Vec<_> = (0..resolvers)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.try_resolve_future(future, Value::Int(i as i64)).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<ResolveOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<&Vec<Continuation>> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            ResolveOutcome::Resolved(continuations) => Some(continuations),
            ResolveOutcome::AlreadyResolved(_) => None,
        })
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].len(), 4);

    let stored = store.read_future(future).unwrap();
    for outcome in &outcomes {
        if let ResolveOutcome::AlreadyResolved(value) = outcome {
            assert_eq!(Some(value), stored.value());
        }
    }
}

/// A waiter registered while the future resolves is fired exactly once
fn no_lost_wakeup(store: Arc<dyn DataController>, rounds: usize) {
    for round in 0..rounds {
        let future = store.create_future().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let registering = {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.try_register_continuation(future, waiter(7)).unwrap()
            })
        };
        let resolving = {
            let store = store.clone();
            thread::spawn(move || {
                barrier.wait();
                store.try_resolve_future(future, Value::Int(round as i64)).unwrap()
            })
        };

        let registered = registering.join().unwrap();
        let resolved = resolving.join().unwrap();
        let drained = match resolved {
            ResolveOutcome::Resolved(continuations) => continuations,
            ResolveOutcome::AlreadyResolved(_) => panic!("only one resolver"),
        };

        match registered {
            RegisterOutcome::Registered => assert_eq!(drained, vec![waiter(7)]),
            RegisterOutcome::AlreadyResolved(value) => {
                assert!(drained.is_empty());
                assert_eq!(value, Value::Int(round as i64));
            }
        }
    }
}

#[test]
fn test_concurrent_resolve_memory_store() {
    single_winner(Arc::new(MemoryStore::new()), 8);
}

#[test]
fn test_concurrent_resolve_file_store() {
    let dir = TempDir::new().unwrap();
    single_winner(Arc::new(FileStore::open(dir.path()).unwrap()), 4);
}

#[test]
fn test_register_resolve_race_memory_store() {
    no_lost_wakeup(Arc::new(MemoryStore::new()), 200);
}

#[test]
fn test_register_resolve_race_file_store() {
    let dir = TempDir::new().unwrap();
    no_lost_wakeup(Arc::new(FileStore::open(dir.path()).unwrap()), 25);
}

#[test]
fn test_concurrent_resolve_resumes_waiter_once() {
    let exe = await_argument_program();
    let store = MemoryStore::new();
    let recorder = Recorder::default();
    let future = store.create_future().unwrap();
    store.try_register_continuation(future, waiter(3)).unwrap();

    thread::scope(|scope| {
        for i in 0..6 {
            let (exe, store, recorder) = (&exe, &store, &recorder);
            scope.spawn(move || {
                let resolver = strand_core::Resolver::new(exe, store, recorder);
                resolver.resolve(future, Value::Int(i)).unwrap();
            });
        }
    });

    let resumed = recorder.0.lock().clone();
    assert_eq!(resumed.len(), 1);
    let stored = store.read_future(future).unwrap();
    assert_eq!(Some(&resumed[0].1), stored.value());
}

#[test]
fn test_repeated_reads_are_stable() {
    let store = MemoryStore::new();
    let future = store.create_future().unwrap();
    store.try_resolve_future(future, Value::from("done")).unwrap();

    let first = store.read_future(future).unwrap();
    for _ in 0..10 {
        assert_eq!(store.read_future(future).unwrap(), first);
    }
    assert_eq!(first.state, FutureState::Resolved(Value::from("done")));
}

#[test]
fn test_resolve_from_another_store_handle() {
    let dir = TempDir::new().unwrap();
    let exe = Arc::new(await_argument_program());

    // Two independent handles on one directory, as two processes would have
    let here: Arc<dyn DataController> = Arc::new(FileStore::open(dir.path()).unwrap());
    let there: Arc<dyn DataController> = Arc::new(FileStore::open(dir.path()).unwrap());
    let local = runtime(exe.clone(), here.clone());
    let remote = runtime(exe.clone(), there.clone());

    let awaited = here.create_future().unwrap();
    let root = here.create_future().unwrap();
    let (index, _) = exe.entry_function().unwrap();
    let state = strand_core::ThreadState::for_call(
        &exe,
        index,
        vec![Value::Future(awaited)],
        root,
        root,
    )
    .unwrap();
    let main = here.create_thread(state).unwrap();
    local.invoker().start(main).unwrap();

    let resolver = thread::spawn(move || {
        thread::sleep(Duration::from_millis(1));
        remote.resolver().resolve(awaited, Value::Int(41)).unwrap();
        remote
    });

    let value = wait_for_result(here.as_ref(), root, wait_options()).unwrap();
    assert_eq!(value, Value::Int(42));
    resolver.join().unwrap();
}
