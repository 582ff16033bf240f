//! Process spawning.
//!
//! Everything that starts an OS process goes through the [`Spawner`] trait,
//! so pipelines and commands can be driven by a test double that records
//! spawns instead of running anything.
//!
//! - `SystemSpawner`: default implementation over `std::process`
//! - `testing::CountingSpawner`: delegates and counts, for skip-policy tests

pub mod testing;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};

use crate::stream::{Collector, Feeder, LiveStream, read_lossy};

/// Where a spawned process reads its stdin from.
#[derive(Debug, Default)]
pub enum StdinSource {
    /// `/dev/null`.
    #[default]
    Null,
    /// The parent's stdin.
    Inherit,
    /// A string, written by a feeder thread.
    Text(String),
    /// An upstream live stream.
    Stream(LiveStream),
}

/// Everything needed to start one process.
#[derive(Debug)]
pub struct SpawnRequest {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Working directory, or the parent's when `None`.
    pub cwd: Option<PathBuf>,
    /// Variables to set on top of (or instead of) the parent environment.
    pub env: BTreeMap<String, String>,
    /// Start from the parent environment. When false the child sees only `env`.
    pub inherit_env: bool,
    /// Stdin source.
    pub stdin: StdinSource,
    /// Pipe stdout back to us. When false it goes to the parent's stdout.
    pub capture_stdout: bool,
    /// Pipe stderr back to us. When false it goes to the parent's stderr.
    pub capture_stderr: bool,
}

impl SpawnRequest {
    /// A request for `argv` with defaults: inherited env, null stdin, both
    /// streams captured.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            cwd: None,
            env: BTreeMap::new(),
            inherit_env: true,
            stdin: StdinSource::Null,
            capture_stdout: true,
            capture_stderr: true,
        }
    }

    /// The argv joined for display.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Captured stdout. Empty if not captured or handed downstream.
    pub stdout: String,
    /// Captured stderr. Empty if not captured.
    pub stderr: String,
    /// Exit code, `128 + signo` when killed by a signal.
    pub exit_code: i32,
}

/// Starts processes.
pub trait Spawner: Send + Sync {
    /// Start the process described by `request`.
    fn spawn(&self, request: SpawnRequest) -> io::Result<Box<dyn RunningProcess>>;
}

/// A process that has been started and not yet reaped.
pub trait RunningProcess: Send {
    /// Detach the live stdout so another stage can consume it.
    ///
    /// Returns `None` if stdout was not captured or was already taken.
    fn take_stdout(&mut self) -> Option<LiveStream>;

    /// Read whatever output is still ours, wait for exit and release all
    /// handles.
    fn close(&mut self) -> io::Result<ProcessOutput>;
}

/// Spawner backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&self, request: SpawnRequest) -> io::Result<Box<dyn RunningProcess>> {
        let command_line = request.command_line();
        let Some((program, args)) = request.argv.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        };

        let mut command = std::process::Command::new(program);
        command.args(args);

        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        if !request.inherit_env {
            command.env_clear();
        }
        command.envs(&request.env);

        let (stdin, feeder) = match request.stdin {
            StdinSource::Null => (Stdio::null(), None),
            StdinSource::Inherit => (Stdio::inherit(), None),
            StdinSource::Text(text) => LiveStream::from_text(text)?.into_stdio()?,
            StdinSource::Stream(stream) => stream.into_stdio()?,
        };
        command.stdin(stdin);
        command.stdout(if request.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        command.stderr(if request.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });

        tracing::debug!(command = %command_line, "spawning process");
        let spawned = command.spawn();
        // The builder still owns our copy of the stdin descriptor. Drop it now
        // so the child is the only reader and upstream EOF reaches it.
        drop(command);

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                if let Some(feeder) = feeder {
                    feeder.join();
                }
                return Err(e);
            }
        };

        let stdout = child.stdout.take().map(LiveStream::from_child);
        let stderr = match child.stderr.take() {
            Some(pipe) => match Collector::spawn("shrimp-stderr", pipe) {
                Ok(collector) => Some(collector),
                Err(e) => {
                    reap(&mut child);
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(Box::new(SystemProcess {
            child,
            stdout,
            stderr,
            feeder,
            closed: false,
        }))
    }
}

/// A child started by [`SystemSpawner`].
///
/// Dropped without `close`, the child is killed and reaped.
pub struct SystemProcess {
    child: Child,
    stdout: Option<LiveStream>,
    stderr: Option<Collector>,
    feeder: Option<Feeder>,
    closed: bool,
}

impl RunningProcess for SystemProcess {
    fn take_stdout(&mut self) -> Option<LiveStream> {
        self.stdout.take()
    }

    fn close(&mut self) -> io::Result<ProcessOutput> {
        // stderr is already being read by its collector, so reading stdout to
        // the end here cannot stall on a full stderr pipe.
        let stdout = match self.stdout.take() {
            Some(mut stream) => {
                let text = read_lossy(&mut stream);
                stream.finish();
                text?
            }
            None => String::new(),
        };

        let status = self.child.wait()?;
        self.closed = true;

        if let Some(feeder) = self.feeder.take() {
            feeder.join();
        }
        let stderr = match self.stderr.take() {
            Some(collector) => collector.collect()?,
            None => String::new(),
        };

        let exit_code = exit_code(status);
        tracing::debug!(pid = self.child.id(), exit_code, "process finished");

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!(pid = self.child.id(), "killing unclosed process");
            reap(&mut self.child);
        }
    }
}

impl fmt::Debug for SystemProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemProcess")
            .field("pid", &self.child.id())
            .field("closed", &self.closed)
            .finish()
    }
}

fn reap(child: &mut Child) {
    // Already exited is fine.
    let _ = child.kill();
    let _ = child.wait();
}

/// Map an exit status to a shell-style exit code.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            128 + status.signal().unwrap_or(0)
        }
        #[cfg(not(unix))]
        {
            -1
        }
    })
}
