//! The captured outcome of one external command.
//!
//! Produced by standalone command execution and by process stages when a
//! pipeline is closed. A non-zero exit code is not an error by itself; callers
//! (or the `check` policy) decide via [`ProcessExecutionResult::raise_if_not_ok`].

use thiserror::Error;

/// Exit code recorded when the process could not be started at all.
///
/// Matches the shell convention for "command not found / not executable".
pub const EXECUTION_FAILED_CODE: i32 = 127;

/// The result of running an external command.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProcessExecutionResult {
    /// Full argv that was (or would have been) executed.
    pub command: Vec<String>,
    /// Captured standard output (empty when not captured).
    pub stdout: String,
    /// Captured standard error (empty when not captured).
    pub stderr: String,
    /// Exit code. Signals are reported as `128 + signo`.
    pub exit_code: i32,
    /// Spawn or I/O failure message, if the command never ran to completion.
    pub error: Option<String>,
}

impl ProcessExecutionResult {
    /// Create a result from raw output streams.
    pub fn from_output(
        command: Vec<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            error: None,
        }
    }

    /// Create a result for a command that could not be executed.
    ///
    /// The error message is also placed on stderr so that callers which only
    /// look at the streams still see why nothing ran.
    pub fn spawn_failure(command: Vec<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            command,
            stdout: String::new(),
            stderr: error.clone(),
            exit_code: EXECUTION_FAILED_CODE,
            error: Some(error),
        }
    }

    /// True if the command exited with code 0.
    pub fn is_ok(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// The command joined with spaces, for display.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Convert a failed result into a [`ProcessExecutionError`].
    pub fn raise_if_not_ok(self) -> Result<Self, ProcessExecutionError> {
        if self.is_ok() {
            return Ok(self);
        }

        let reason = match &self.error {
            Some(error) => format!("Got exception: {}", error),
            None => format!("Command returned non zero exit code: {}", self.exit_code),
        };

        Err(ProcessExecutionError {
            message: format!("Command execution failed: {}", reason),
            result: self,
        })
    }

    /// Multi-line diagnostic report headed by `message`.
    pub fn execution_report(&self, message: &str) -> String {
        let mut report = format!(
            "{}\n  Command: {}\n  Exit code: {}\n  Stdout: {:?}\n  Error: {:?}",
            message,
            self.command_line(),
            self.exit_code,
            self.stdout,
            self.stderr,
        );
        if let Some(error) = &self.error {
            report.push_str(&format!("\n  Exception: {}", error));
        }
        report
    }
}

/// A command failed while its `check` policy was enabled.
///
/// Displays as the full execution report: command, exit code, stdout and stderr.
#[derive(Debug, Clone, Error)]
#[error("{}", result.execution_report(message))]
pub struct ProcessExecutionError {
    /// One-line summary ("Command execution failed: ...").
    pub message: String,
    /// The result that triggered the failure.
    pub result: ProcessExecutionResult,
}

impl ProcessExecutionError {
    /// Exit code of the failed command.
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn zero_exit_is_ok() {
        let result = ProcessExecutionResult::from_output(argv(&["true"]), 0, "", "");
        assert!(result.is_ok());
        assert!(result.raise_if_not_ok().is_ok());
    }

    #[test]
    fn non_zero_exit_raises_with_reason() {
        let result = ProcessExecutionResult::from_output(argv(&["sh", "-c", "exit 1"]), 1, "", "");
        let err = result.raise_if_not_ok().unwrap_err();
        assert_eq!(
            err.message,
            "Command execution failed: Command returned non zero exit code: 1"
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn error_report_lists_command_and_streams() {
        let result = ProcessExecutionResult::from_output(argv(&["sh", "-c", "exit 1"]), 1, "", "");
        let err = result.raise_if_not_ok().unwrap_err();
        insta::assert_snapshot!(err.to_string(), @r#"
        Command execution failed: Command returned non zero exit code: 1
          Command: sh -c exit 1
          Exit code: 1
          Stdout: ""
          Error: ""
        "#);
    }

    #[test]
    fn spawn_failure_reports_exception() {
        let result = ProcessExecutionResult::spawn_failure(argv(&["nope"]), "No such file or directory");
        assert!(!result.is_ok());
        assert_eq!(result.exit_code, EXECUTION_FAILED_CODE);

        let err = result.raise_if_not_ok().unwrap_err();
        assert!(err.message.contains("Got exception: No such file or directory"));
        assert!(err.to_string().ends_with("  Exception: No such file or directory"));
    }
}
