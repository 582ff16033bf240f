//! Error taxonomy for pipeline construction and draining.
//!
//! Configuration errors surface from `attach`, execution errors from `close`.
//! Failures inside function stages are not errors here: they are captured in
//! the stage's `PipelineExecutionResult::exception` unless the pipeline is
//! configured to raise them.

use std::io;

use thiserror::Error;

use shrimp_types::{ProcessExecutionError, StageFailure};

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by pipeline construction and close.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A dynamically described function declared only one of the two stream
    /// parameters.
    #[error(
        "streaming function must accept both stream_input and stream_output but found only one (missing {missing}). Function args: {declared}"
    )]
    InvalidSignature {
        /// The stream parameter that was not declared.
        missing: &'static str,
        /// Comma-separated list of the declared parameters.
        declared: String,
    },

    /// A dynamic operand could not be turned into a stage.
    #[error("unsupported operand type: {kind}")]
    UnsupportedOperand {
        /// Name of the offending type.
        kind: String,
    },

    /// The pipeline was already drained.
    #[error("pipeline already closed; build a new pipeline instead of reusing it")]
    AlreadyClosed,

    /// A source can only be the first stage of a pipeline.
    #[error("pipeline already started with {stages} stage(s); a source must be attached first")]
    AlreadyStarted {
        /// Number of stages already attached.
        stages: usize,
    },

    /// A stage's live output was already handed to a downstream stage.
    #[error("{stage}: output already handed to a downstream stage")]
    OutputTaken {
        /// Description of the stage.
        stage: String,
    },

    /// An external command could not be started.
    #[error("{command}: failed to spawn: {source}")]
    Spawn {
        /// The command line that failed.
        command: String,
        #[source]
        source: io::Error,
    },

    /// Pipe or thread setup failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A checked process exited with a non-zero code.
    #[error(transparent)]
    Execution(#[from] ProcessExecutionError),

    /// A stage failure that the pipeline was configured to raise.
    #[error("{stage}: {failure}")]
    Stage {
        /// Description of the failing stage.
        stage: String,
        /// The captured failure.
        failure: StageFailure,
    },
}

impl PipelineError {
    /// Turn a captured stage failure into the error the pipeline raises.
    ///
    /// Process failures come back out as [`PipelineError::Execution`] so
    /// callers can match on the exit code and streams directly.
    pub(crate) fn raised(stage: &str, failure: &StageFailure) -> Self {
        match failure.downcast_ref::<ProcessExecutionError>() {
            Some(execution) => PipelineError::Execution(execution.clone()),
            None => PipelineError::Stage {
                stage: stage.to_string(),
                failure: failure.clone(),
            },
        }
    }
}
