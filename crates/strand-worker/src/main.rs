//! Strand execution unit
//!
//! Spawned by the process invoker once per invocation. Opens the shared file
//! store, starts or resumes exactly one thread, and exits when the thread
//! returns, blocks on a pending future, or fails. Threads it spawns or
//! resumes run in further worker processes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use strand_bytecode::{verify_executable, Executable};
use strand_core::{
    FileStore, ForeignRegistry, Invocation, Invoker, ProcessInvoker, Runtime, RuntimeOptions,
    ThreadId, Value,
};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "strand-worker")]
#[command(about = "Run one Strand thread against a file store", long_about = None)]
#[command(version)]
struct Cli {
    /// File store directory
    #[arg(long)]
    store: PathBuf,

    /// Encoded executable
    #[arg(long)]
    executable: PathBuf,

    /// Fail the thread after this many instructions
    #[arg(long)]
    max_steps: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new thread from its first instruction
    Start {
        /// Thread id
        thread: u64,
    },

    /// Continue a suspended thread with the awaited value
    Resume {
        /// Thread id
        thread: u64,
        /// Awaited value as JSON
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

impl Commands {
    fn invocation(&self) -> Result<Invocation> {
        Ok(match self {
            Commands::Start { thread } => Invocation::Start(ThreadId::from_u64(*thread)),
            Commands::Resume { thread, value } => {
                let value: Value =
                    serde_json::from_str(value).context("Failed to parse resume value")?;
                Invocation::Resume(ThreadId::from_u64(*thread), value)
            }
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand_core=info,strand_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let invocation = cli.command.invocation()?;

    let bytes = std::fs::read(&cli.executable)
        .with_context(|| format!("Failed to read {}", cli.executable.display()))?;
    let executable = Executable::decode(&bytes).context("Failed to decode executable")?;
    verify_executable(&executable).context("Executable failed verification")?;

    let store = FileStore::open(&cli.store)
        .with_context(|| format!("Failed to open store at {}", cli.store.display()))?;
    let program = std::env::current_exe().context("Failed to locate the worker binary")?;
    let invoker: Arc<dyn Invoker> = Arc::new(
        ProcessInvoker::new(program, &cli.store, &cli.executable).with_max_steps(cli.max_steps),
    );

    let runtime = Runtime::new(
        Arc::new(executable),
        Arc::new(store),
        ForeignRegistry::new(),
        RuntimeOptions {
            max_steps: cli.max_steps,
        },
        move |_| invoker,
    );

    let thread = invocation.thread();
    let status = runtime
        .execute(invocation)
        .with_context(|| format!("Thread {} failed", thread))?;
    debug!(thread = %thread, status = ?status, "invocation finished");

    Ok(())
}
