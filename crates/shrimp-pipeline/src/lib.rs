//! shrimp-pipeline: Unix-pipe-style execution pipelines.
//!
//! This crate provides:
//!
//! - **Pipeline**: a linear chain of processes, shell scripts, text and
//!   functions, drained once with `close`
//! - **Stages**: text/stream sources, process stages, buffered and streaming
//!   function stages
//! - **Command**: reusable command descriptions with check/capture/skip
//!   policies and standalone `exec`
//! - **Spawn**: the process-spawning seam, with a system implementation
//! - **WorkerPool**: explicit, bounded background execution
//! - **Lock**: file-based inter-process locks
//! - **Config**: `~/.config/shrimp/config.toml` defaults
//!
//! ```no_run
//! use shrimp_pipeline::{Pipeline, buffered};
//!
//! let mut pipeline = Pipeline::start_with_text("1 2 3\n4 5 6\n");
//! pipeline
//!     .attach("wc")?
//!     .attach(["awk", "{print $3}"])?
//!     .attach(buffered(|out: String| format!("{:0>5}", out.trim())))?;
//! assert_eq!(pipeline.close_and_get_stdout()?, "00012");
//! # Ok::<(), shrimp_pipeline::PipelineError>(())
//! ```
//!
//! # Failures
//!
//! Checked process stages (`cmd`, `shell_cmd`, or inline operands with
//! `check_inline`) fail `close` with [`PipelineError::Execution`].
//!
//! Function stages do not. A function that returns an error or panics has
//! the failure recorded in its result's `exception`, and its output is empty.
//! The next stage then simply sees empty input, so a failed transformation
//! looks like one that produced nothing. Inspect `exception`, or build the
//! pipeline with `raise_function_errors(true)` to make `close` return
//! [`PipelineError::Stage`] instead. Panics inside buffered functions run on
//! the caller's thread and are not caught.
//!
//! The library emits `tracing` events and never installs a subscriber.

pub mod command;
pub mod config;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod pool;
pub mod spawn;
pub mod stage;
pub mod stream;

pub use command::{
    ArgumentProcessor, Argv, Command, DefaultArgumentProcessor, ExecOptions, SkipConfig, cmd,
    run_process, run_process_with, shell_cmd, shell_cmd_with,
};
pub use config::{DEFAULT_SHELL, ShrimpConfig};
pub use error::{PipelineError, PipelineResult};
pub use lock::{FileLock, LockError, LockGuard, PlatformLock, acquire_file_lock};
pub use pipeline::{
    ConnectorMode, DynamicArgs, DynamicFunction, Function, Operand, Pipeline, buffered, pipe,
    start, streaming,
};
pub use pool::{BackgroundTask, PoolError, TaskId, WorkerPool};
pub use spawn::{ProcessOutput, RunningProcess, SpawnRequest, Spawner, StdinSource, SystemSpawner};
pub use stage::{FailurePolicy, FunctionOutput, Stage, StageOutput, StreamInput, StreamOutput};
pub use stream::LiveStream;

// Result types live in the leaf crate; re-export them so callers need one import.
pub use shrimp_types::{
    PipelineExecutionResult, ProcessExecutionError, ProcessExecutionResult, StageFailure,
    StageValue,
};
