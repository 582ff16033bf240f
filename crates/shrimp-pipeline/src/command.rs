//! Reusable command descriptions.
//!
//! A [`Command`] is an argv template plus execution defaults. It can be run
//! standalone with [`Command::exec`] or attached to a [`crate::Pipeline`],
//! where it becomes a process stage.
//!
//! ```no_run
//! use shrimp_pipeline::{cmd, shell_cmd, ExecOptions};
//!
//! let wc = cmd(["wc", "-c"]);
//! let res = wc.exec_with(Vec::<String>::new(), ExecOptions::stdin("1234")).unwrap();
//! assert_eq!(res.stdout.trim(), "4");
//!
//! let count = shell_cmd(r#"echo -n "$1" | wc -c"#);
//! assert_eq!(count.exec_args(["123456789"]).unwrap().stdout.trim(), "9");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shrimp_types::{ProcessExecutionError, ProcessExecutionResult};

use crate::config::{DEFAULT_SHELL, ShrimpConfig};
use crate::spawn::{SpawnRequest, Spawner, StdinSource, SystemSpawner};

/// An argv, built from a single program name or a list of words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Argv(pub Vec<String>);

impl From<&str> for Argv {
    fn from(program: &str) -> Self {
        Argv(vec![program.to_string()])
    }
}

impl From<String> for Argv {
    fn from(program: String) -> Self {
        Argv(vec![program])
    }
}

impl From<Vec<String>> for Argv {
    fn from(words: Vec<String>) -> Self {
        Argv(words)
    }
}

impl From<Vec<&str>> for Argv {
    fn from(words: Vec<&str>) -> Self {
        Argv(words.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Argv {
    fn from(words: &[&str]) -> Self {
        Argv(words.iter().map(|w| w.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Argv {
    fn from(words: [&str; N]) -> Self {
        Argv(words.iter().map(|w| w.to_string()).collect())
    }
}

/// Turns call-time arguments into argv words appended to the command.
pub trait ArgumentProcessor: Send + Sync {
    fn process_args(&self, args: &[String]) -> Vec<String>;
}

/// Appends arguments unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultArgumentProcessor;

impl ArgumentProcessor for DefaultArgumentProcessor {
    fn process_args(&self, args: &[String]) -> Vec<String> {
        args.to_vec()
    }
}

/// When to skip running a command, and what to report instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipConfig {
    pub skip: bool,
    /// Skip when the call passes no non-empty arguments.
    pub skip_when_no_args: bool,
    pub skipped_out: String,
    pub skipped_err: String,
    pub skipped_code: i32,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            skip: false,
            skip_when_no_args: false,
            skipped_out: "Execution skipped".to_string(),
            skipped_err: String::new(),
            skipped_code: 0,
        }
    }
}

impl SkipConfig {
    /// Always skip.
    pub fn always() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    /// Skip when no arguments are given.
    pub fn when_no_args() -> Self {
        Self {
            skip_when_no_args: true,
            ..Self::default()
        }
    }

    /// Exit code reported for a skipped run.
    pub fn with_code(mut self, code: i32) -> Self {
        self.skipped_code = code;
        self
    }

    /// Stdout reported for a skipped run.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.skipped_out = stdout.into();
        self
    }

    /// Stderr reported for a skipped run.
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.skipped_err = stderr.into();
        self
    }

    pub fn should_skip(&self, args: &[String]) -> bool {
        if self.skip {
            return true;
        }
        self.skip_when_no_args && args.iter().all(|arg| arg.is_empty())
    }

    /// The synthetic result of a skipped run.
    pub fn skipped_result(&self, command: Vec<String>) -> ProcessExecutionResult {
        ProcessExecutionResult::from_output(
            command,
            self.skipped_code,
            self.skipped_out.clone(),
            self.skipped_err.clone(),
        )
    }
}

impl From<bool> for SkipConfig {
    fn from(skip: bool) -> Self {
        Self {
            skip,
            ..Self::default()
        }
    }
}

/// Per-call overrides for [`Command::exec_with`].
///
/// `None` fields fall back to the command's own settings.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Text written to stdin. When `None` the child inherits our stdin.
    pub stdin: Option<String>,
    pub check: Option<bool>,
    pub capture: Option<bool>,
    pub skip: Option<SkipConfig>,
    pub cwd: Option<PathBuf>,
}

impl ExecOptions {
    /// Options that only feed `text` to stdin.
    pub fn stdin(text: impl Into<String>) -> Self {
        Self {
            stdin: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = Some(check);
        self
    }

    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_skip(mut self, skip: impl Into<SkipConfig>) -> Self {
        self.skip = Some(skip.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// A reusable external command.
#[derive(Clone)]
pub struct Command {
    argv: Vec<String>,
    check: bool,
    capture: bool,
    env: BTreeMap<String, String>,
    env_append: bool,
    cwd: Option<PathBuf>,
    skip: SkipConfig,
    argument_processor: Arc<dyn ArgumentProcessor>,
    spawner: Arc<dyn Spawner>,
}

/// A command running `argv`, checked and captured by default.
pub fn cmd(argv: impl Into<Argv>) -> Command {
    Command::new(argv)
}

/// A command running `script` with `/bin/sh -c`.
///
/// Arguments appended later become the script's `$1`, `$2`, ...
pub fn shell_cmd(script: impl Into<String>) -> Command {
    Command::shell(DEFAULT_SHELL, script)
}

/// A command running `script` with the configured shell.
///
/// Stderr capture follows `config.capture`. The command is checked like
/// any other `shell_cmd`.
pub fn shell_cmd_with(config: &ShrimpConfig, script: impl Into<String>) -> Command {
    Command::shell(config.shell.clone(), script).capture(config.capture)
}

impl Command {
    pub fn new(argv: impl Into<Argv>) -> Self {
        Self {
            argv: argv.into().0,
            check: true,
            capture: true,
            env: BTreeMap::new(),
            env_append: true,
            cwd: None,
            skip: SkipConfig::default(),
            argument_processor: Arc::new(DefaultArgumentProcessor),
            spawner: Arc::new(SystemSpawner),
        }
    }

    /// `<shell> -c <script> <shell name>`.
    pub fn shell(shell: impl Into<String>, script: impl Into<String>) -> Self {
        let shell = shell.into();
        let name = Path::new(&shell)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| shell.clone());
        Self::new(vec![shell, "-c".to_string(), script.into(), name])
    }

    /// Append fixed arguments to the argv template.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.argv.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    /// Fail on non-zero exit codes.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Capture stdout and stderr instead of inheriting them.
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start from the parent environment (default) or from nothing.
    pub fn env_append(mut self, append: bool) -> Self {
        self.env_append = append;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn skip(mut self, skip: impl Into<SkipConfig>) -> Self {
        self.skip = skip.into();
        self
    }

    pub fn argument_processor(mut self, processor: impl ArgumentProcessor + 'static) -> Self {
        self.argument_processor = Arc::new(processor);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// The argv template.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn is_checked(&self) -> bool {
        self.check
    }

    pub fn is_captured(&self) -> bool {
        self.capture
    }

    pub fn skip_config(&self) -> &SkipConfig {
        &self.skip
    }

    /// A new command with `args` processed and appended to the template.
    pub fn with_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let raw: Vec<String> = args.into_iter().map(|a| a.to_string()).collect();
        Self {
            argv: self.build_command(&raw),
            ..self.clone()
        }
    }

    /// Run with no extra arguments.
    pub fn exec(&self) -> Result<ProcessExecutionResult, ProcessExecutionError> {
        self.exec_with(Vec::<String>::new(), ExecOptions::default())
    }

    /// Run with extra arguments.
    pub fn exec_args<I, S>(&self, args: I) -> Result<ProcessExecutionResult, ProcessExecutionError>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.exec_with(args, ExecOptions::default())
    }

    /// Run with extra arguments and per-call overrides.
    ///
    /// A skipped run returns the skip result and is never checked.
    #[tracing::instrument(level = "debug", skip_all, fields(command = %self.argv.join(" ")))]
    pub fn exec_with<I, S>(
        &self,
        args: I,
        options: ExecOptions,
    ) -> Result<ProcessExecutionResult, ProcessExecutionError>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let raw: Vec<String> = args.into_iter().map(|a| a.to_string()).collect();
        let command = self.build_command(&raw);

        let skip = options.skip.as_ref().unwrap_or(&self.skip);
        if skip.should_skip(&raw) {
            tracing::debug!("execution skipped");
            return Ok(skip.skipped_result(command));
        }

        let capture = options.capture.unwrap_or(self.capture);
        let stdin = match options.stdin {
            Some(text) => StdinSource::Text(text),
            None => StdinSource::Inherit,
        };
        let mut request = self.request(command, stdin);
        request.capture_stdout = capture;
        request.capture_stderr = capture;
        if let Some(cwd) = options.cwd {
            request.cwd = Some(cwd);
        }

        let result = run_process_with(self.spawner.as_ref(), request);
        if options.check.unwrap_or(self.check) {
            result.raise_if_not_ok()
        } else {
            Ok(result)
        }
    }

    /// The spawn request for running `argv` with this command's settings.
    pub(crate) fn request(&self, argv: Vec<String>, stdin: StdinSource) -> SpawnRequest {
        SpawnRequest {
            argv,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            inherit_env: self.env_append,
            stdin,
            capture_stdout: true,
            capture_stderr: self.capture,
        }
    }

    pub(crate) fn spawner_ref(&self) -> &dyn Spawner {
        self.spawner.as_ref()
    }

    pub(crate) fn build_command(&self, args: &[String]) -> Vec<String> {
        let mut argv = self.argv.clone();
        argv.extend(self.argument_processor.process_args(args));
        argv
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("argv", &self.argv)
            .field("check", &self.check)
            .field("capture", &self.capture)
            .field("env", &self.env)
            .field("env_append", &self.env_append)
            .field("cwd", &self.cwd)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

/// Run a process to completion with the system spawner.
///
/// Never fails: a process that cannot be started is reported as a result
/// with exit code 127 and the error on stderr.
pub fn run_process(request: SpawnRequest) -> ProcessExecutionResult {
    run_process_with(&SystemSpawner, request)
}

/// Run a process to completion with `spawner`.
pub fn run_process_with(spawner: &dyn Spawner, request: SpawnRequest) -> ProcessExecutionResult {
    let argv = request.argv.clone();
    let output = spawner
        .spawn(request)
        .and_then(|mut process| process.close());

    match output {
        Ok(output) => {
            ProcessExecutionResult::from_output(argv, output.exit_code, output.stdout, output.stderr)
        }
        Err(e) => {
            tracing::debug!(command = %argv.join(" "), "process failed: {}", e);
            ProcessExecutionResult::spawn_failure(argv, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_conversions() {
        assert_eq!(Argv::from("ls").0, vec!["ls"]);
        assert_eq!(Argv::from(["ls", "-l"]).0, vec!["ls", "-l"]);
        assert_eq!(Argv::from(vec!["a".to_string()]).0, vec!["a"]);
    }

    #[test]
    fn shell_command_layout() {
        let command = Command::shell("/bin/bash", "echo $1").args(["x"]);
        assert_eq!(command.argv(), ["/bin/bash", "-c", "echo $1", "bash", "x"]);
    }

    #[test]
    fn default_processor_stringifies_and_keeps_args() {
        let derived = cmd("seq").with_args([1, 3]);
        assert_eq!(derived.argv(), ["seq", "1", "3"]);
        assert_eq!(
            DefaultArgumentProcessor.process_args(&["a b".to_string(), String::new()]),
            ["a b", ""]
        );
    }

    #[test]
    fn shell_from_config() {
        let config = ShrimpConfig {
            shell: "/bin/bash".to_string(),
            capture: false,
            ..ShrimpConfig::default()
        };
        let command = shell_cmd_with(&config, "echo hi");
        assert_eq!(command.argv(), ["/bin/bash", "-c", "echo hi", "bash"]);
        assert!(!command.is_captured());
        assert!(command.is_checked());
        assert_eq!(shell_cmd("echo hi").argv()[0], DEFAULT_SHELL);
    }

    #[test]
    fn skip_when_no_args_ignores_empty_strings() {
        let skip = SkipConfig::when_no_args();
        assert!(skip.should_skip(&[]));
        assert!(skip.should_skip(&[String::new()]));
        assert!(!skip.should_skip(&["a".to_string()]));
        assert!(!SkipConfig::default().should_skip(&[]));
        assert!(SkipConfig::from(true).should_skip(&["a".to_string()]));
    }

    #[test]
    fn with_args_runs_through_processor() {
        struct Upper;
        impl ArgumentProcessor for Upper {
            fn process_args(&self, args: &[String]) -> Vec<String> {
                args.iter().map(|a| a.to_uppercase()).collect()
            }
        }

        let base = cmd("echo").argument_processor(Upper).check(false);
        let derived = base.with_args(["a", "b"]);
        assert_eq!(derived.argv(), ["echo", "A", "B"]);
        assert!(!derived.is_checked());
        // The template itself is untouched.
        assert_eq!(base.argv(), ["echo"]);
    }

    #[test]
    fn spawn_failure_is_code_127() {
        let result = run_process(SpawnRequest::new(vec!["/nonexistent/shrimp".into()]));
        assert_eq!(result.exit_code, 127);
        assert!(result.error.is_some());
        assert!(!result.stderr.is_empty());
    }
}
