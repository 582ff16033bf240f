//! Buffered function stage: the whole upstream output in, one string out.

use shrimp_types::{PipelineExecutionResult, StageFailure};

use super::{FailurePolicy, Stage, StageOutput};
use crate::error::PipelineResult;

/// Values a buffered function may return.
///
/// `None` and errors both leave the stage without stdout; errors are also
/// recorded as the stage's exception.
pub trait FunctionOutput {
    fn into_output(self) -> anyhow::Result<Option<String>>;
}

impl FunctionOutput for String {
    fn into_output(self) -> anyhow::Result<Option<String>> {
        Ok(Some(self))
    }
}

impl FunctionOutput for &str {
    fn into_output(self) -> anyhow::Result<Option<String>> {
        Ok(Some(self.to_string()))
    }
}

impl FunctionOutput for Option<String> {
    fn into_output(self) -> anyhow::Result<Option<String>> {
        Ok(self)
    }
}

impl<E> FunctionOutput for Result<String, E>
where
    E: Into<anyhow::Error>,
{
    fn into_output(self) -> anyhow::Result<Option<String>> {
        self.map(Some).map_err(Into::into)
    }
}

impl<E> FunctionOutput for Result<Option<String>, E>
where
    E: Into<anyhow::Error>,
{
    fn into_output(self) -> anyhow::Result<Option<String>> {
        self.map_err(Into::into)
    }
}

/// The materialized result of a function that ran on the whole input.
///
/// The function runs synchronously when the stage is created, on the
/// caller's thread. A panic inside it is not caught.
#[derive(Debug)]
pub struct BufferedFunctionStage {
    result: PipelineExecutionResult,
    policy: FailurePolicy,
}

impl BufferedFunctionStage {
    /// Run `function` on `input` and keep what it returned.
    pub fn run<F, O>(input: String, function: F) -> Self
    where
        F: FnOnce(String) -> O,
        O: FunctionOutput,
    {
        tracing::debug!(input_len = input.len(), "running buffered function");
        let result = match function(input).into_output() {
            Ok(stdout) => PipelineExecutionResult {
                stdout,
                ..Default::default()
            },
            Err(e) => {
                tracing::warn!("buffered function failed: {:#}", e);
                PipelineExecutionResult {
                    exception: Some(StageFailure::new(e)),
                    ..Default::default()
                }
            }
        };
        Self {
            result,
            policy: FailurePolicy::Capture,
        }
    }

    /// Set how the pipeline treats this stage's failure.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Stage for BufferedFunctionStage {
    fn describe(&self) -> &str {
        "buffered function"
    }

    fn produce(&mut self) -> PipelineResult<StageOutput> {
        Ok(StageOutput::Text(self.result.stdout_or_empty().to_string()))
    }

    fn close(&mut self) -> &PipelineExecutionResult {
        &self.result
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receives_whole_input() {
        let mut stage = BufferedFunctionStage::run("a\nb\nc\n".to_string(), |s: String| {
            s.lines().count().to_string()
        });
        assert_eq!(stage.close().stdout.as_deref(), Some("3"));
    }

    #[test]
    fn error_is_captured_and_output_is_empty() {
        let mut stage = BufferedFunctionStage::run(String::new(), |_| -> anyhow::Result<String> {
            anyhow::bail!("nope")
        });
        assert!(matches!(stage.produce().unwrap(), StageOutput::Text(t) if t.is_empty()));
        let result = stage.close();
        assert!(result.stdout.is_none());
        assert_eq!(result.exception.as_ref().unwrap().to_string(), "nope");
    }

    #[test]
    fn none_means_no_stdout() {
        let mut stage = BufferedFunctionStage::run("x".to_string(), |_| None::<String>);
        let result = stage.close();
        assert!(result.stdout.is_none());
        assert!(result.ok());
    }
}
