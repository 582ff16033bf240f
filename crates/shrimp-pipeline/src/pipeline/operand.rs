//! Right-hand operands of `attach`.
//!
//! Strings become shell scripts, lists of words become argv commands,
//! [`Command`]s attach as they are, and functions attach as buffered or
//! streaming stages depending on how they were wrapped.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::command::{Argv, Command};
use crate::error::{PipelineError, PipelineResult};
use crate::stage::{FunctionOutput, StreamInput, StreamOutput};

/// Parameter name that marks a function as reading a live stream.
pub const STREAM_INPUT: &str = "stream_input";
/// Parameter name that marks a function as writing a live stream.
pub const STREAM_OUTPUT: &str = "stream_output";

pub(crate) type BufferedFn = Box<dyn FnOnce(String) -> anyhow::Result<Option<String>>>;
pub(crate) type StreamingFn =
    Box<dyn FnOnce(&mut StreamInput, &mut StreamOutput) -> anyhow::Result<Value> + Send>;

/// Anything that can be attached to a pipeline.
pub enum Operand {
    /// A script run with the configured shell.
    Shell(String),
    /// A program and its arguments.
    Argv(Vec<String>),
    Command(Command),
    Function(Function),
    Dynamic(DynamicFunction),
}

impl Operand {
    /// Resolve an operand described as JSON.
    ///
    /// A string is a shell script and an array of strings is an argv.
    /// Everything else is rejected.
    pub fn from_json(value: Value) -> PipelineResult<Self> {
        match value {
            Value::String(script) => Ok(Operand::Shell(script)),
            Value::Array(items) => {
                let words: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                words.map(Operand::Argv).ok_or(PipelineError::UnsupportedOperand {
                    kind: "array with non-string elements".to_string(),
                })
            }
            other => Err(PipelineError::UnsupportedOperand {
                kind: json_kind(&other).to_string(),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Shell(script) => f.debug_tuple("Shell").field(script).finish(),
            Operand::Argv(argv) => f.debug_tuple("Argv").field(argv).finish(),
            Operand::Command(command) => f.debug_tuple("Command").field(command).finish(),
            Operand::Function(function) => f.debug_tuple("Function").field(function).finish(),
            Operand::Dynamic(function) => f.debug_tuple("Dynamic").field(function).finish(),
        }
    }
}

impl From<&str> for Operand {
    fn from(script: &str) -> Self {
        Operand::Shell(script.to_string())
    }
}

impl From<String> for Operand {
    fn from(script: String) -> Self {
        Operand::Shell(script)
    }
}

impl From<Vec<String>> for Operand {
    fn from(argv: Vec<String>) -> Self {
        Operand::Argv(argv)
    }
}

impl From<Vec<&str>> for Operand {
    fn from(argv: Vec<&str>) -> Self {
        Operand::Argv(Argv::from(argv).0)
    }
}

impl<const N: usize> From<[&str; N]> for Operand {
    fn from(argv: [&str; N]) -> Self {
        Operand::Argv(Argv::from(argv).0)
    }
}

impl From<Argv> for Operand {
    fn from(argv: Argv) -> Self {
        Operand::Argv(argv.0)
    }
}

impl From<Command> for Operand {
    fn from(command: Command) -> Self {
        Operand::Command(command)
    }
}

impl From<Function> for Operand {
    fn from(function: Function) -> Self {
        Operand::Function(function)
    }
}

impl From<DynamicFunction> for Operand {
    fn from(function: DynamicFunction) -> Self {
        Operand::Dynamic(function)
    }
}

/// A function wrapped for attaching.
pub enum Function {
    /// Called once with the complete upstream output.
    Buffered(BufferedFn),
    /// Runs on a worker thread against live streams.
    Streaming(StreamingFn),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Buffered(_) => f.write_str("Function::Buffered"),
            Function::Streaming(_) => f.write_str("Function::Streaming"),
        }
    }
}

/// Wrap a function that takes the whole upstream output as one string.
pub fn buffered<F, O>(function: F) -> Function
where
    F: FnOnce(String) -> O + 'static,
    O: FunctionOutput,
{
    Function::Buffered(Box::new(move |input: String| function(input).into_output()))
}

/// Wrap a function that reads and writes live streams.
///
/// The return value is serialized into the stage result.
pub fn streaming<F, R>(function: F) -> Function
where
    F: FnOnce(&mut StreamInput, &mut StreamOutput) -> anyhow::Result<R> + Send + 'static,
    R: Serialize,
{
    Function::Streaming(Box::new(
        move |input: &mut StreamInput, output: &mut StreamOutput| -> anyhow::Result<Value> {
            let value = function(input, output)?;
            Ok(serde_json::to_value(value)?)
        },
    ))
}

/// How a function is connected to the stage before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorMode {
    Buffered,
    Streaming,
}

impl ConnectorMode {
    /// Pick the mode from declared parameter names.
    ///
    /// Both stream parameters select streaming, neither selects buffered,
    /// and exactly one is an error naming the missing one.
    pub fn from_params<S: AsRef<str>>(params: &[S]) -> PipelineResult<Self> {
        let has = |name: &str| params.iter().any(|p| p.as_ref() == name);

        match (has(STREAM_INPUT), has(STREAM_OUTPUT)) {
            (true, true) => Ok(ConnectorMode::Streaming),
            (false, false) => Ok(ConnectorMode::Buffered),
            (input, _) => Err(PipelineError::InvalidSignature {
                missing: if input { STREAM_OUTPUT } else { STREAM_INPUT },
                declared: params
                    .iter()
                    .map(|p| p.as_ref())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

/// Arguments handed to a [`DynamicFunction`].
pub enum DynamicArgs<'a> {
    /// The complete upstream output.
    Buffered(String),
    /// Live upstream input and the stage's output pipe.
    Streaming {
        stream_input: &'a mut StreamInput,
        stream_output: &'a mut StreamOutput,
    },
}

type DynamicBody = Box<dyn for<'a> FnOnce(DynamicArgs<'a>) -> anyhow::Result<Value> + Send>;

/// A function whose parameter names are only known at runtime.
///
/// The declared names decide the connector: see
/// [`ConnectorMode::from_params`].
pub struct DynamicFunction {
    params: Vec<String>,
    body: DynamicBody,
}

impl DynamicFunction {
    pub fn new<I, S, F>(params: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: for<'a> FnOnce(DynamicArgs<'a>) -> anyhow::Result<Value> + Send + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Check the declared parameters and wrap the body accordingly.
    ///
    /// A buffered body's string result becomes the stage's stdout; null
    /// means no output and any other value is rendered as JSON.
    pub fn resolve(self) -> PipelineResult<Function> {
        let body = self.body;
        match ConnectorMode::from_params(self.params.as_slice())? {
            ConnectorMode::Streaming => Ok(Function::Streaming(Box::new(
                move |stream_input: &mut StreamInput, stream_output: &mut StreamOutput| {
                    body(DynamicArgs::Streaming {
                        stream_input,
                        stream_output,
                    })
                },
            ))),
            ConnectorMode::Buffered => Ok(Function::Buffered(Box::new(
                move |input: String| -> anyhow::Result<Option<String>> {
                    Ok(match body(DynamicArgs::Buffered(input))? {
                        Value::Null => None,
                        Value::String(text) => Some(text),
                        other => Some(other.to_string()),
                    })
                },
            ))),
        }
    }
}

impl fmt::Debug for DynamicFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicFunction")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["stream_input", "stream_output"], ConnectorMode::Streaming)]
    #[case(&["stream_output", "extra", "stream_input"], ConnectorMode::Streaming)]
    #[case(&["text"], ConnectorMode::Buffered)]
    #[case(&[], ConnectorMode::Buffered)]
    fn mode_from_params(#[case] params: &[&str], #[case] expected: ConnectorMode) {
        assert_eq!(ConnectorMode::from_params(params).unwrap(), expected);
    }

    #[rstest]
    #[case(&["stream_output"], "stream_input")]
    #[case(&["stream_input", "other"], "stream_output")]
    fn one_stream_param_is_rejected(#[case] params: &[&str], #[case] missing: &str) {
        match ConnectorMode::from_params(params) {
            Err(PipelineError::InvalidSignature {
                missing: m,
                declared,
            }) => {
                assert_eq!(m, missing);
                assert_eq!(declared, params.join(", "));
            }
            other => panic!("expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn invalid_signature_message() {
        let err = ConnectorMode::from_params(&["stream_output"]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"streaming function must accept both stream_input and stream_output but found only one (missing stream_input). Function args: stream_output");
    }

    #[test]
    fn json_operands() {
        assert!(matches!(
            Operand::from_json(serde_json::json!("ls")).unwrap(),
            Operand::Shell(s) if s == "ls"
        ));
        assert!(matches!(
            Operand::from_json(serde_json::json!(["ls", "-l"])).unwrap(),
            Operand::Argv(v) if v == ["ls", "-l"]
        ));
    }

    #[rstest]
    #[case(serde_json::json!(42), "number")]
    #[case(serde_json::json!({"a": 1}), "object")]
    #[case(serde_json::json!(null), "null")]
    #[case(serde_json::json!(["ls", 1]), "array with non-string elements")]
    fn unsupported_json_operands(#[case] value: Value, #[case] kind: &str) {
        match Operand::from_json(value) {
            Err(PipelineError::UnsupportedOperand { kind: k }) => assert_eq!(k, kind),
            other => panic!("expected UnsupportedOperand, got {:?}", other),
        }
    }

    #[test]
    fn static_conversions() {
        assert!(matches!(Operand::from("echo hi"), Operand::Shell(_)));
        assert!(matches!(Operand::from(["echo", "hi"]), Operand::Argv(_)));
        assert!(matches!(
            Operand::from(buffered(|s: String| s)),
            Operand::Function(Function::Buffered(_))
        ));
    }

    #[test]
    fn dynamic_buffered_renders_values() {
        let function = DynamicFunction::new(["text"], |args| match args {
            DynamicArgs::Buffered(text) => Ok(serde_json::json!({ "len": text.len() })),
            DynamicArgs::Streaming { .. } => unreachable!(),
        });
        let Function::Buffered(body) = function.resolve().unwrap() else {
            panic!("expected buffered");
        };
        assert_eq!(body("abc".into()).unwrap().as_deref(), Some(r#"{"len":3}"#));
    }
}
