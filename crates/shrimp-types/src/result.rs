//! The close-time snapshot of a pipeline stage.
//!
//! Every stage produces exactly one of these when it is closed. The last
//! stage's result is what a pipeline returns.
//!
//! **Failed transformations look like empty output.** A function stage that
//! fails records the error in `exception` and leaves `stdout` as `None`.
//! Downstream stages then see empty input. Callers that care must inspect
//! `exception` (or ask the pipeline to raise function failures).

use std::fmt;
use std::sync::Arc;

use crate::process::ProcessExecutionResult;

/// The value a stage produced besides its text streams.
#[derive(Debug, Clone, PartialEq)]
pub enum StageValue {
    /// A process stage's full execution result.
    Process(ProcessExecutionResult),
    /// The serialized return value of a streaming function.
    Data(serde_json::Value),
}

impl StageValue {
    /// The process result, if this value came from a process stage.
    pub fn as_process(&self) -> Option<&ProcessExecutionResult> {
        match self {
            StageValue::Process(result) => Some(result),
            StageValue::Data(_) => None,
        }
    }

    /// The function return value, if this value came from a function stage.
    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            StageValue::Data(value) => Some(value),
            StageValue::Process(_) => None,
        }
    }
}

/// A captured stage failure.
///
/// Shared behind an `Arc` so a cached result can be handed out repeatedly.
/// Two failures compare equal only if they are the same captured error.
#[derive(Clone)]
pub struct StageFailure(Arc<anyhow::Error>);

impl StageFailure {
    /// Capture an error.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    /// Capture a plain message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Borrow the underlying error.
    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempt to view the failure as a concrete error type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageFailure({:?})", self.0)
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl PartialEq for StageFailure {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Immutable snapshot of a closed stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineExecutionResult {
    /// Standard output of the stage, if it produced any.
    pub stdout: Option<String>,
    /// Standard error of the stage (process stages only).
    pub stderr: Option<String>,
    /// Process result or function return value.
    pub result: Option<StageValue>,
    /// Captured failure, if any.
    pub exception: Option<StageFailure>,
}

impl PipelineExecutionResult {
    /// Result of a stage that only carries text.
    pub fn text(stdout: impl Into<String>) -> Self {
        Self {
            stdout: Some(stdout.into()),
            ..Self::default()
        }
    }

    /// True if no failure was captured.
    pub fn ok(&self) -> bool {
        self.exception.is_none()
    }

    /// Stdout, or an empty string if the stage produced none.
    pub fn stdout_or_empty(&self) -> &str {
        self.stdout.as_deref().unwrap_or("")
    }

    /// The process result carried by a process stage.
    pub fn process(&self) -> Option<&ProcessExecutionResult> {
        self.result.as_ref().and_then(StageValue::as_process)
    }
}
