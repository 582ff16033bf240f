//! Streaming function stage.
//!
//! The user function runs on its own thread with the upstream stream as
//! [`StreamInput`] and the write end of a fresh OS pipe as [`StreamOutput`].
//! The read end of that pipe is this stage's output, so the next stage sees
//! each write as soon as it is made.
//!
//! ```text
//!   upstream ──▶ StreamInput ──▶ fn (worker) ──▶ StreamOutput ──▶ [pipe] ──▶ next stage
//! ```
//!
//! When the function returns (or fails, or panics) the worker closes the
//! write end, then drains what is left of the input so upstream producers
//! can exit.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use shrimp_types::{PipelineExecutionResult, StageFailure, StageValue};

use super::{FailurePolicy, Stage, StageOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::stream::{Collector, LiveStream, panic_message, read_lossy};

/// Upstream data as seen by a streaming function.
pub struct StreamInput {
    reader: BufReader<LiveStream>,
}

impl StreamInput {
    pub(crate) fn new(stream: LiveStream) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Read everything that is left as text.
    pub fn read_remaining(&mut self) -> io::Result<String> {
        read_lossy(&mut self.reader)
    }

    /// Drain the rest of the input and release it.
    fn finish(self) {
        let mut stream = self.reader.into_inner();
        if let Err(e) = stream.drain() {
            tracing::debug!("draining function input failed: {}", e);
        }
        stream.finish();
    }
}

impl Read for StreamInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for StreamInput {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

/// Where a streaming function writes its output.
///
/// Unbuffered: every write goes straight into the pipe.
pub struct StreamOutput {
    writer: io::PipeWriter,
}

impl Write for StreamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

type Outcome = Result<Option<serde_json::Value>, StageFailure>;

/// A user function running concurrently with the rest of the pipeline.
pub struct StreamingFunctionStage {
    output: Option<LiveStream>,
    tail: Option<Collector>,
    worker: Option<JoinHandle<Outcome>>,
    policy: FailurePolicy,
    result: Option<PipelineExecutionResult>,
}

impl StreamingFunctionStage {
    /// Start `function` on a worker thread reading `input`.
    ///
    /// The function's return value is serialized into the stage result;
    /// `()` and other values serializing to null are recorded as no value.
    pub fn start<F, R>(input: LiveStream, function: F, policy: FailurePolicy) -> io::Result<Self>
    where
        F: FnOnce(&mut StreamInput, &mut StreamOutput) -> anyhow::Result<R> + Send + 'static,
        R: Serialize,
    {
        let (reader, writer) = io::pipe()?;

        let worker = thread::Builder::new()
            .name("shrimp-stream-fn".to_string())
            .spawn(move || {
                let mut input = StreamInput::new(input);
                let mut output = StreamOutput { writer };

                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| function(&mut input, &mut output)));

                // EOF for the next stage before anything else.
                drop(output);
                input.finish();

                match outcome {
                    Ok(Ok(value)) => serde_json::to_value(value)
                        .map(|v| (!v.is_null()).then_some(v))
                        .map_err(StageFailure::new),
                    Ok(Err(e)) => Err(StageFailure::new(e)),
                    Err(payload) => Err(StageFailure::msg(format!(
                        "streaming function panicked: {}",
                        panic_message(&*payload)
                    ))),
                }
            })?;

        tracing::debug!("streaming function started");
        Ok(Self {
            output: Some(LiveStream::from_pipe(reader)),
            tail: None,
            worker: Some(worker),
            policy,
            result: None,
        })
    }

    fn finish(&mut self) -> PipelineExecutionResult {
        // Read our pipe to EOF first: the worker may be blocked writing to it.
        let stdout = match (self.output.take(), self.tail.take()) {
            (Some(stream), _) => stream.read_all(),
            (None, Some(collector)) => collector.collect(),
            (None, None) => Ok(String::new()),
        };

        let outcome = match self.worker.take() {
            Some(worker) => worker.join().unwrap_or_else(|payload| {
                Err(StageFailure::msg(format!(
                    "streaming worker panicked: {}",
                    panic_message(&*payload)
                )))
            }),
            None => Ok(None),
        };

        let (stdout, read_error) = match stdout {
            Ok(text) => (text, None),
            Err(e) => (String::new(), Some(StageFailure::new(e))),
        };
        let (value, exception) = match outcome {
            Ok(value) => (value, read_error),
            Err(failure) => (None, Some(failure)),
        };
        if let Some(failure) = &exception {
            tracing::warn!("streaming function failed: {}", failure);
        }

        PipelineExecutionResult {
            stdout: Some(stdout),
            stderr: None,
            result: value.map(StageValue::Data),
            exception,
        }
    }
}

impl Stage for StreamingFunctionStage {
    fn describe(&self) -> &str {
        "streaming function"
    }

    fn produce(&mut self) -> PipelineResult<StageOutput> {
        self.output
            .take()
            .map(StageOutput::Stream)
            .ok_or_else(|| PipelineError::OutputTaken {
                stage: self.describe().to_string(),
            })
    }

    fn start_collecting(&mut self) -> io::Result<()> {
        if self.tail.is_none()
            && let Some(output) = self.output.take()
        {
            self.tail = Some(Collector::spawn("shrimp-tail", output)?);
        }
        Ok(())
    }

    fn close(&mut self) -> &PipelineExecutionResult {
        if self.result.is_none() {
            let result = self.finish();
            self.result = Some(result);
        }
        self.result.get_or_insert_default()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }
}

impl std::fmt::Debug for StreamingFunctionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFunctionStage")
            .field("policy", &self.policy)
            .field("closed", &self.result.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start<F, R>(input: &str, function: F) -> StreamingFunctionStage
    where
        F: FnOnce(&mut StreamInput, &mut StreamOutput) -> anyhow::Result<R> + Send + 'static,
        R: Serialize,
    {
        let input = LiveStream::from_text(input).unwrap();
        StreamingFunctionStage::start(input, function, FailurePolicy::Capture).unwrap()
    }

    #[test]
    fn line_by_line_transform() {
        let mut stage = start("a\nb\n", |input, output| {
            for line in input.lines() {
                writeln!(output, "<{}>", line?)?;
            }
            Ok(())
        });
        let result = stage.close();
        assert_eq!(result.stdout.as_deref(), Some("<a>\n<b>\n"));
        assert!(result.result.is_none());
        assert!(result.ok());
    }

    #[test]
    fn return_value_is_recorded() {
        let mut stage = start("1\n2\n3\n", |input, _output| {
            Ok(input.lines().count())
        });
        let result = stage.close();
        assert_eq!(result.result, Some(StageValue::Data(serde_json::json!(3))));
    }

    #[test]
    fn error_is_captured_with_partial_output() {
        let mut stage = start("", |_input, output| -> anyhow::Result<()> {
            output.write_all(b"partial")?;
            anyhow::bail!("gave up")
        });
        let result = stage.close();
        assert_eq!(result.stdout.as_deref(), Some("partial"));
        assert_eq!(result.exception.as_ref().unwrap().to_string(), "gave up");
    }

    #[test]
    fn panic_is_captured() {
        let mut stage = start("", |_input, _output| -> anyhow::Result<()> {
            panic!("kaboom")
        });
        let failure = stage.close().exception.clone().unwrap();
        assert!(failure.to_string().contains("kaboom"));
    }

    #[test]
    fn unread_large_input_does_not_block() {
        let big = "y\n".repeat(200_000);
        let mut stage = start(&big, |_input, output| {
            output.write_all(b"done")?;
            Ok(())
        });
        assert_eq!(stage.close().stdout.as_deref(), Some("done"));
    }

    #[test]
    fn large_output_with_nobody_reading_yet() {
        let mut stage = start("", |_input, output| {
            for _ in 0..100_000 {
                output.write_all(b"0123456789\n")?;
            }
            Ok(())
        });
        let stdout = stage.close().stdout.clone().unwrap();
        assert_eq!(stdout.len(), 1_100_000);
    }

    #[test]
    fn close_is_idempotent() {
        let mut stage = start("x", |input, output| {
            io::copy(input, output)?;
            Ok(())
        });
        let first = stage.close().clone();
        assert_eq!(stage.close(), &first);
    }
}
