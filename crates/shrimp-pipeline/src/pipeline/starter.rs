//! Entry points for building pipelines in one expression.

use shrimp_types::PipelineExecutionResult;

use super::{Operand, Pipeline};
use crate::error::PipelineResult;

/// An empty pipeline, ready for `then`.
///
/// ```no_run
/// use shrimp_pipeline::start;
///
/// let out = start()
///     .then("echo -n hello world").unwrap()
///     .then(["wc", "-c"]).unwrap()
///     .close_and_get_stdout().unwrap();
/// assert_eq!(out, "11\n");
/// ```
pub fn start() -> Pipeline {
    Pipeline::start_empty()
}

/// Build a pipeline from `operands`, drain it and return the result.
pub fn pipe<I>(operands: I) -> PipelineResult<PipelineExecutionResult>
where
    I: IntoIterator,
    I::Item: Into<Operand>,
{
    let mut pipeline = Pipeline::start_empty();
    pipeline.attach_all(operands)?;
    pipeline.close()
}
