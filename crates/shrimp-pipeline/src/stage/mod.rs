//! Pipeline stages.
//!
//! A stage produces output for the next stage and, when closed, a
//! [`PipelineExecutionResult`]. Close runs once; later calls return the
//! cached result.
//!
//! | Stage | Output | Work starts |
//! |-------|--------|-------------|
//! | [`TextStage`] | `Text` | never (already materialized) |
//! | [`StreamStage`] | `Stream` | caller-owned reader |
//! | [`ProcessStage`] | `Stream` (or `Text` when skipped) | at attach, child spawned |
//! | [`BufferedFunctionStage`] | `Text` | at attach, function ran synchronously |
//! | [`StreamingFunctionStage`] | `Stream` | at attach, worker thread started |

mod buffered;
mod process;
mod streaming;
mod text;

use std::io;

use shrimp_types::PipelineExecutionResult;

use crate::error::PipelineResult;
use crate::stream::LiveStream;

pub use buffered::{BufferedFunctionStage, FunctionOutput};
pub use process::ProcessStage;
pub use streaming::{StreamInput, StreamOutput, StreamingFunctionStage};
pub use text::{StreamStage, TextStage};

/// What a stage hands to the next one.
#[derive(Debug)]
pub enum StageOutput {
    /// Fully materialized text.
    Text(String),
    /// A live stream. Ownership moves downstream.
    Stream(LiveStream),
}

impl StageOutput {
    /// Turn the output into a stream, feeding text through an OS pipe.
    pub fn into_stream(self) -> io::Result<LiveStream> {
        match self {
            StageOutput::Text(text) => LiveStream::from_text(text),
            StageOutput::Stream(stream) => Ok(stream),
        }
    }
}

/// How the pipeline treats a stage's captured failure at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// `Pipeline::close` returns the failure as an error.
    Raise,
    /// The failure stays in the result's `exception`.
    Capture,
}

/// One unit of a pipeline.
pub trait Stage: Send {
    /// Short human-readable description, used in errors and logs.
    fn describe(&self) -> &str;

    /// Hand this stage's output downstream.
    ///
    /// Live streams can be taken once; a second call fails with
    /// `PipelineError::OutputTaken`.
    fn produce(&mut self) -> PipelineResult<StageOutput>;

    /// Start reading this stage's own output in the background.
    ///
    /// Called on the last stage before earlier stages are drained, so a
    /// tail that nobody reads cannot block the chain.
    fn start_collecting(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Finish the stage and return its result. Idempotent.
    fn close(&mut self) -> &PipelineExecutionResult;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Capture
    }
}
