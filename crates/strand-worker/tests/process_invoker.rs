//! Programs run with one worker process per invocation

use std::path::{Path, PathBuf};
use std::process::Command;
use strand_bytecode::{Executable, ExecutableBuilder, Instruction};
use strand_core::{
    program_status, DataController, FileStore, ForeignRegistry, InvokerBackend, ProgramStatus,
    StorageBackend, ThreadStatus, Value, VmConfig, VmController, VmError,
};
use tempfile::TempDir;

fn worker() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_strand-worker"))
}

fn config(dir: &Path) -> VmConfig {
    let mut config = VmConfig::default();
    config.runtime.poll_interval_ms = 5;
    config.runtime.result_timeout_ms = Some(30_000);
    config.storage.backend = StorageBackend::File;
    config.storage.path = Some(dir.to_path_buf());
    config.invoker.backend = InvokerBackend::Process;
    config.invoker.program = Some(worker());
    config
}

fn chain_program() -> Executable {
    let mut b = ExecutableBuilder::new("chain");
    b.begin_function("main", &[]);
    b.push_int(1).call("chain1", 1).emit(Instruction::Return);
    b.begin_function("chain1", &["x"]);
    b.load("x").push_int(1).emit(Instruction::Add);
    b.async_call("chain2", 1).emit(Instruction::Await).emit(Instruction::Return);
    b.begin_function("chain2", &["x"]);
    b.load("x").push_int(1).emit(Instruction::Add);
    b.async_call("chain3", 1).emit(Instruction::Return);
    b.begin_function("chain3", &["x"]);
    b.load("x").push_int(1).emit(Instruction::Add).emit(Instruction::Return);
    b.build().unwrap()
}

#[test]
fn test_chain_across_processes() {
    let dir = TempDir::new().unwrap();
    let controller =
        VmController::from_config(chain_program(), &config(dir.path()), ForeignRegistry::new())
            .unwrap();
    let result = controller.run(vec![]).unwrap();
    assert_eq!(result.value, Value::Int(4));

    // Every thread record was left in a terminal state by its own process
    let store = FileStore::open(dir.path()).unwrap();
    let ids = store.thread_ids().unwrap();
    assert_eq!(ids.len(), 3);
    for id in ids {
        assert_eq!(store.read_thread(id).unwrap().status, ThreadStatus::Returned);
    }
}

#[test]
fn test_result_is_readable_from_another_handle() {
    let dir = TempDir::new().unwrap();
    let controller =
        VmController::from_config(chain_program(), &config(dir.path()), ForeignRegistry::new())
            .unwrap();
    let root = controller.start(vec![]).unwrap();
    assert_eq!(controller.wait(&root).unwrap(), Value::Int(4));

    let observer = FileStore::open(dir.path()).unwrap();
    assert_eq!(
        program_status(&observer, root.future).unwrap(),
        ProgramStatus::Finished(Value::Int(4))
    );
}

#[test]
fn test_failure_in_worker_process() {
    let mut b = ExecutableBuilder::new("failure");
    b.begin_function("main", &[]);
    b.async_call("bad", 0).emit(Instruction::Await).emit(Instruction::Return);
    b.begin_function("bad", &[]);
    b.emit(Instruction::PushNull).emit(Instruction::Neg).emit(Instruction::Return);

    let dir = TempDir::new().unwrap();
    let controller =
        VmController::from_config(b.build().unwrap(), &config(dir.path()), ForeignRegistry::new())
            .unwrap();
    match controller.run(vec![]) {
        Err(VmError::ThreadFailed { message, .. }) => assert!(message.contains("Type error")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_worker_rejects_unknown_thread() {
    let dir = TempDir::new().unwrap();
    let exe_path = dir.path().join("program.strd");
    std::fs::write(&exe_path, chain_program().encode()).unwrap();

    let status = Command::new(worker())
        .arg("--store")
        .arg(dir.path())
        .arg("--executable")
        .arg(&exe_path)
        .arg("start")
        .arg("99")
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn test_worker_rejects_bad_executable() {
    let dir = TempDir::new().unwrap();
    let exe_path = dir.path().join("program.strd");
    std::fs::write(&exe_path, b"not an executable").unwrap();

    let output = Command::new(worker())
        .arg("--store")
        .arg(dir.path())
        .arg("--executable")
        .arg(&exe_path)
        .arg("start")
        .arg("1")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("decode"));
}
