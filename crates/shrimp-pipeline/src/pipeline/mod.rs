//! The pipeline controller.
//!
//! A [`Pipeline`] is a linear chain of stages. Each `attach` connects a new
//! stage to the current tail:
//!
//! - process stages and streaming functions take the tail's output as a live
//!   stream (text is fed through an OS pipe), so they run concurrently;
//! - buffered functions close the tail first and receive its complete stdout.
//!
//! `close` drains every stage in attachment order and returns the last
//! stage's result. A pipeline is single use: attaching after close fails.

mod operand;
mod starter;

pub use operand::{
    ConnectorMode, DynamicArgs, DynamicFunction, Function, Operand, STREAM_INPUT, STREAM_OUTPUT,
    buffered, streaming,
};
pub use starter::{pipe, start};

use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use shrimp_types::PipelineExecutionResult;

use crate::command::{Command, cmd};
use crate::config::ShrimpConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::spawn::{Spawner, StdinSource, SystemSpawner};
use crate::stage::{
    BufferedFunctionStage, FailurePolicy, FunctionOutput, ProcessStage, Stage, StageOutput,
    StreamInput, StreamOutput, StreamStage, StreamingFunctionStage, TextStage,
};
use crate::stream::LiveStream;
use operand::{BufferedFn, StreamingFn};

/// An ordered chain of stages.
pub struct Pipeline {
    config: ShrimpConfig,
    spawner: Arc<dyn Spawner>,
    stages: Vec<Box<dyn Stage>>,
    closed: bool,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::with_config(ShrimpConfig::default())
    }
}

impl Pipeline {
    /// An empty pipeline with default configuration.
    pub fn start_empty() -> Self {
        Self::default()
    }

    /// An empty pipeline using `config` for inline commands and functions.
    pub fn with_config(config: ShrimpConfig) -> Self {
        Self {
            config,
            spawner: Arc::new(SystemSpawner),
            stages: Vec::new(),
            closed: false,
        }
    }

    /// An empty pipeline configured from the user's config file.
    ///
    /// See [`ShrimpConfig::load`]; a missing file gives the defaults.
    pub fn from_user_config() -> anyhow::Result<Self> {
        Ok(Self::with_config(ShrimpConfig::load()?))
    }

    /// A pipeline whose first stage outputs `text`.
    pub fn start_with_text(text: impl Into<String>) -> Self {
        let mut pipeline = Self::default();
        pipeline.push_text(text);
        pipeline
    }

    /// A pipeline whose first stage reads from `reader`.
    pub fn start_with_external_stream(reader: impl Read + Send + 'static) -> Self {
        let mut pipeline = Self::default();
        pipeline.push_external_stream(reader);
        pipeline
    }

    /// A pipeline whose first stage reads this process's stdin.
    pub fn start_with_stdin() -> Self {
        Self::start_with_external_stream(std::io::stdin())
    }

    /// Make `text` the first stage of this pipeline.
    ///
    /// Fails with [`PipelineError::AlreadyStarted`] if stages are attached.
    pub fn attach_text(&mut self, text: impl Into<String>) -> PipelineResult<&mut Self> {
        self.ensure_unstarted()?;
        self.push_text(text);
        Ok(self)
    }

    /// Make `reader` the first stage of this pipeline.
    ///
    /// Fails with [`PipelineError::AlreadyStarted`] if stages are attached.
    pub fn attach_external_stream(
        &mut self,
        reader: impl Read + Send + 'static,
    ) -> PipelineResult<&mut Self> {
        self.ensure_unstarted()?;
        self.push_external_stream(reader);
        Ok(self)
    }

    /// Make this process's stdin the first stage of this pipeline.
    pub fn attach_stdin(&mut self) -> PipelineResult<&mut Self> {
        self.attach_external_stream(std::io::stdin())
    }

    /// Spawner for string and argv operands. `Command`s keep their own.
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Make function failures fail `close` instead of being captured.
    pub fn raise_function_errors(mut self, raise: bool) -> Self {
        self.config.raise_function_errors = raise;
        self
    }

    /// Number of attached stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Attach an operand to the tail.
    pub fn attach(&mut self, operand: impl Into<Operand>) -> PipelineResult<&mut Self> {
        self.ensure_open()?;

        match operand.into() {
            Operand::Shell(script) => {
                let command = self.inline(Command::shell(self.config.shell.clone(), script));
                self.attach_command(&command)?;
            }
            Operand::Argv(argv) => {
                let command = self.inline(cmd(argv));
                self.attach_command(&command)?;
            }
            Operand::Command(command) => self.attach_command(&command)?,
            Operand::Function(function) => self.connect_function(function)?,
            Operand::Dynamic(function) => self.connect_function(function.resolve()?)?,
        }

        Ok(self)
    }

    /// Attach a function that was wrapped with [`buffered`] or [`streaming`].
    pub fn attach_function(&mut self, function: Function) -> PipelineResult<&mut Self> {
        self.attach(function)
    }

    /// Attach a function that takes the whole upstream output as a string.
    pub fn attach_buffered<F, O>(&mut self, function: F) -> PipelineResult<&mut Self>
    where
        F: FnOnce(String) -> O + 'static,
        O: FunctionOutput,
    {
        self.attach(buffered(function))
    }

    /// Attach a function that reads and writes live streams.
    pub fn attach_streaming<F, R>(&mut self, function: F) -> PipelineResult<&mut Self>
    where
        F: FnOnce(&mut StreamInput, &mut StreamOutput) -> anyhow::Result<R> + Send + 'static,
        R: Serialize,
    {
        self.attach(streaming(function))
    }

    /// Attach a function described by parameter names.
    ///
    /// Declaring exactly one of `stream_input`/`stream_output` fails here,
    /// before anything runs.
    pub fn attach_dynamic(&mut self, function: DynamicFunction) -> PipelineResult<&mut Self> {
        self.attach(function)
    }

    /// Attach every operand, left to right.
    pub fn attach_all<I>(&mut self, operands: I) -> PipelineResult<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        for operand in operands {
            self.attach(operand)?;
        }
        Ok(self)
    }

    /// By-value `attach` for chaining.
    pub fn then(mut self, operand: impl Into<Operand>) -> PipelineResult<Self> {
        self.attach(operand)?;
        Ok(self)
    }

    /// Drain every stage in order and return the last stage's result.
    ///
    /// Every stage is closed even when one fails. The first failure of a
    /// stage whose policy is to raise is then returned as the error. Calling
    /// `close` again gives the same outcome without running anything.
    #[tracing::instrument(level = "debug", skip(self), fields(stages = self.stages.len()))]
    pub fn close(&mut self) -> PipelineResult<PipelineExecutionResult> {
        if !self.closed {
            if let Some(tail) = self.stages.last_mut() {
                tail.start_collecting()?;
            }
            self.closed = true;
        }

        let mut raised = None;
        for stage in &mut self.stages {
            let policy = stage.failure_policy();
            let failure = stage.close().exception.clone();
            if let Some(failure) = failure {
                tracing::debug!(stage = stage.describe(), ?policy, "stage failed: {}", failure);
                if policy == FailurePolicy::Raise && raised.is_none() {
                    raised = Some(PipelineError::raised(stage.describe(), &failure));
                }
            }
        }

        if let Some(err) = raised {
            return Err(err);
        }

        Ok(self
            .stages
            .last_mut()
            .map(|tail| tail.close().clone())
            .unwrap_or_default())
    }

    /// Close and return the last stage's stdout, empty if it had none.
    pub fn close_and_get_stdout(&mut self) -> PipelineResult<String> {
        Ok(self.close()?.stdout.unwrap_or_default())
    }

    fn ensure_open(&self) -> PipelineResult<()> {
        if self.closed {
            return Err(PipelineError::AlreadyClosed);
        }
        Ok(())
    }

    fn ensure_unstarted(&self) -> PipelineResult<()> {
        self.ensure_open()?;
        if !self.stages.is_empty() {
            return Err(PipelineError::AlreadyStarted {
                stages: self.stages.len(),
            });
        }
        Ok(())
    }

    fn push_text(&mut self, text: impl Into<String>) {
        self.stages.push(Box::new(TextStage::new(text)));
    }

    fn push_external_stream(&mut self, reader: impl Read + Send + 'static) {
        let stream = LiveStream::from_reader(reader);
        self.stages.push(Box::new(StreamStage::new(stream)));
    }

    /// Apply pipeline defaults to a command built from an inline operand.
    fn inline(&self, command: Command) -> Command {
        command
            .check(self.config.check_inline)
            .capture(self.config.capture)
            .spawner(self.spawner.clone())
    }

    fn function_policy(&self) -> FailurePolicy {
        if self.config.raise_function_errors {
            FailurePolicy::Raise
        } else {
            FailurePolicy::Capture
        }
    }

    /// Take the tail's output, if there is a tail.
    fn tail_output(&mut self) -> PipelineResult<Option<StageOutput>> {
        self.stages.last_mut().map(|tail| tail.produce()).transpose()
    }

    fn attach_command(&mut self, command: &Command) -> PipelineResult<()> {
        let stdin = match self.tail_output()? {
            None => StdinSource::Null,
            Some(StageOutput::Text(text)) => StdinSource::Text(text),
            Some(StageOutput::Stream(stream)) => StdinSource::Stream(stream),
        };
        let stage = ProcessStage::start(command, stdin)?;
        tracing::debug!(command = stage.describe(), "attached process stage");
        self.stages.push(Box::new(stage));
        Ok(())
    }

    fn connect_function(&mut self, function: Function) -> PipelineResult<()> {
        match function {
            Function::Buffered(function) => self.connect_buffered(function),
            Function::Streaming(function) => self.connect_streaming(function),
        }
    }

    fn connect_buffered(&mut self, function: BufferedFn) -> PipelineResult<()> {
        let input = match self.stages.last_mut() {
            Some(tail) => tail.close().stdout.clone().unwrap_or_default(),
            None => String::new(),
        };

        let stage = BufferedFunctionStage::run(input, function).with_policy(self.function_policy());
        tracing::debug!("attached buffered function stage");
        self.stages.push(Box::new(stage));
        Ok(())
    }

    fn connect_streaming(&mut self, function: StreamingFn) -> PipelineResult<()> {
        let input = match self.tail_output()? {
            Some(output) => output.into_stream()?,
            None => LiveStream::empty(),
        };
        let stage = StreamingFunctionStage::start(input, function, self.function_policy())?;
        tracing::debug!("attached streaming function stage");
        self.stages.push(Box::new(stage));
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.describe()).collect();
        f.debug_struct("Pipeline")
            .field("stages", &stages)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
