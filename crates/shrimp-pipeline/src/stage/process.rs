//! External process stage.

use shrimp_types::{PipelineExecutionResult, ProcessExecutionResult, StageFailure, StageValue};

use super::{FailurePolicy, Stage, StageOutput};
use crate::command::Command;
use crate::error::{PipelineError, PipelineResult};
use crate::spawn::{RunningProcess, StdinSource};
use crate::stream::{Collector, Drainer};

enum State {
    Running {
        process: Box<dyn RunningProcess>,
        tail: Option<Collector>,
    },
    Skipped {
        result: ProcessExecutionResult,
        upstream: Option<Drainer>,
    },
    Closed,
}

/// A child process in a pipeline.
///
/// The child is spawned when the stage is created. Its stdout is always a
/// pipe so it can feed the next stage; stderr is captured only when the
/// command captures output.
pub struct ProcessStage {
    label: String,
    argv: Vec<String>,
    check: bool,
    capture_stderr: bool,
    state: State,
    result: Option<PipelineExecutionResult>,
}

impl ProcessStage {
    /// Spawn `command` reading from `stdin`, unless its skip policy applies.
    pub fn start(command: &Command, stdin: StdinSource) -> PipelineResult<Self> {
        let argv = command.build_command(&[]);
        let label = argv.join(" ");

        let state = if command.skip_config().should_skip(&[]) {
            tracing::debug!(command = %label, "process stage skipped");
            // Nothing reads the upstream output, so discard it in the
            // background; closing it would kill the producer with SIGPIPE.
            let upstream = match stdin {
                StdinSource::Stream(stream) => Some(stream.drain_in_background()?),
                _ => None,
            };
            State::Skipped {
                result: command.skip_config().skipped_result(argv.clone()),
                upstream,
            }
        } else {
            let request = command.request(argv.clone(), stdin);
            let process = command
                .spawner_ref()
                .spawn(request)
                .map_err(|source| PipelineError::Spawn {
                    command: label.clone(),
                    source,
                })?;
            State::Running {
                process,
                tail: None,
            }
        };

        Ok(Self {
            label,
            argv,
            check: command.is_checked(),
            capture_stderr: command.is_captured(),
            state,
            result: None,
        })
    }

    fn finish(&mut self) -> PipelineExecutionResult {
        let process_result = match std::mem::replace(&mut self.state, State::Closed) {
            State::Running { mut process, tail } => {
                let closed = process.close().and_then(|mut output| {
                    if let Some(collector) = tail {
                        output.stdout = collector.collect()?;
                    }
                    Ok(output)
                });
                match closed {
                    Ok(output) => ProcessExecutionResult::from_output(
                        self.argv.clone(),
                        output.exit_code,
                        output.stdout,
                        output.stderr,
                    ),
                    Err(e) => {
                        tracing::warn!(command = %self.label, "failed to close process: {}", e);
                        ProcessExecutionResult::spawn_failure(self.argv.clone(), e.to_string())
                    }
                }
            }
            State::Skipped { result, upstream } => {
                if let Some(drainer) = upstream
                    && let Err(e) = drainer.join()
                {
                    tracing::debug!(command = %self.label, "draining skipped stage input failed: {}", e);
                }
                return PipelineExecutionResult {
                    stdout: Some(result.stdout.clone()),
                    stderr: Some(result.stderr.clone()),
                    result: Some(StageValue::Process(result)),
                    exception: None,
                };
            }
            State::Closed => ProcessExecutionResult::spawn_failure(
                self.argv.clone(),
                "process stage closed twice",
            ),
        };

        let exception = if self.check {
            process_result
                .clone()
                .raise_if_not_ok()
                .err()
                .map(StageFailure::new)
        } else {
            process_result.error.as_ref().map(|e| StageFailure::msg(e.clone()))
        };

        PipelineExecutionResult {
            stdout: Some(process_result.stdout.clone()),
            stderr: self.capture_stderr.then(|| process_result.stderr.clone()),
            result: Some(StageValue::Process(process_result)),
            exception,
        }
    }
}

impl Stage for ProcessStage {
    fn describe(&self) -> &str {
        &self.label
    }

    fn produce(&mut self) -> PipelineResult<StageOutput> {
        match &mut self.state {
            State::Running { process, .. } => process
                .take_stdout()
                .map(StageOutput::Stream)
                .ok_or_else(|| PipelineError::OutputTaken {
                    stage: self.label.clone(),
                }),
            State::Skipped { result, .. } => Ok(StageOutput::Text(result.stdout.clone())),
            State::Closed => Err(PipelineError::OutputTaken {
                stage: self.label.clone(),
            }),
        }
    }

    fn start_collecting(&mut self) -> std::io::Result<()> {
        if let State::Running { process, tail } = &mut self.state
            && tail.is_none()
            && let Some(stdout) = process.take_stdout()
        {
            *tail = Some(Collector::spawn("shrimp-tail", stdout)?);
        }
        Ok(())
    }

    fn close(&mut self) -> &PipelineExecutionResult {
        if self.result.is_none() {
            let result = self.finish();
            tracing::debug!(command = %self.label, ok = result.ok(), "process stage closed");
            self.result = Some(result);
        }
        self.result.get_or_insert_default()
    }

    fn failure_policy(&self) -> FailurePolicy {
        if self.check {
            FailurePolicy::Raise
        } else {
            FailurePolicy::Capture
        }
    }
}

impl std::fmt::Debug for ProcessStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStage")
            .field("command", &self.label)
            .field("check", &self.check)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::{SkipConfig, cmd};
    use crate::spawn::testing::CountingSpawner;
    use std::sync::Arc;

    #[test]
    fn skipped_stage_never_spawns() {
        let (spawner, count) = CountingSpawner::new();
        let command = cmd("echo")
            .skip(SkipConfig::always().with_stdout("skipped!").with_code(7))
            .spawner(Arc::new(spawner));

        let mut stage = ProcessStage::start(&command, StdinSource::Null).unwrap();
        assert!(matches!(stage.produce().unwrap(), StageOutput::Text(t) if t == "skipped!"));

        let result = stage.close();
        assert_eq!(result.stdout.as_deref(), Some("skipped!"));
        assert_eq!(result.process().unwrap().exit_code, 7);
        assert!(result.ok());
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn skipped_stage_drains_live_upstream() {
        let mut upstream = ProcessStage::start(&cmd(["seq", "1", "500000"]), StdinSource::Null).unwrap();
        let StageOutput::Stream(stream) = upstream.produce().unwrap() else {
            panic!("expected a live stream");
        };

        let skipped = cmd("cat").skip(SkipConfig::always());
        let mut stage = ProcessStage::start(&skipped, StdinSource::Stream(stream)).unwrap();

        assert_eq!(stage.close().stdout.as_deref(), Some("Execution skipped"));
        let upstream_result = upstream.close();
        assert!(upstream_result.ok());
        assert_eq!(upstream_result.process().unwrap().exit_code, 0);
    }

    #[test]
    fn checked_failure_is_raised() {
        let mut stage = ProcessStage::start(&cmd("false"), StdinSource::Null).unwrap();
        assert_eq!(stage.failure_policy(), FailurePolicy::Raise);
        let result = stage.close();
        assert!(!result.ok());
        assert_eq!(result.process().unwrap().exit_code, 1);
    }

    #[test]
    fn unchecked_failure_is_plain_result() {
        let mut stage = ProcessStage::start(&cmd("false").check(false), StdinSource::Null).unwrap();
        assert_eq!(stage.failure_policy(), FailurePolicy::Capture);
        assert!(stage.close().ok());
    }

    #[test]
    fn stderr_is_none_when_not_captured() {
        let command = cmd(["sh", "-c", "echo out"]).capture(false);
        let mut stage = ProcessStage::start(&command, StdinSource::Null).unwrap();
        let result = stage.close();
        assert_eq!(result.stdout.as_deref(), Some("out\n"));
        assert!(result.stderr.is_none());
    }

    #[test]
    fn tail_collector_gathers_output() {
        let command = cmd(["sh", "-c", "seq 1 20000"]);
        let mut stage = ProcessStage::start(&command, StdinSource::Null).unwrap();
        stage.start_collecting().unwrap();
        let stdout = stage.close().stdout.clone().unwrap();
        assert!(stdout.ends_with("20000\n"));
    }
}
