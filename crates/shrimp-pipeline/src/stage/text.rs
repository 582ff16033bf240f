//! Source stages: literal text and caller-supplied streams.

use shrimp_types::{PipelineExecutionResult, StageFailure};

use super::{Stage, StageOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::stream::LiveStream;

/// A stage whose output is a fixed string.
#[derive(Debug)]
pub struct TextStage {
    text: String,
    result: Option<PipelineExecutionResult>,
}

impl TextStage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            result: None,
        }
    }
}

impl Stage for TextStage {
    fn describe(&self) -> &str {
        "text"
    }

    fn produce(&mut self) -> PipelineResult<StageOutput> {
        Ok(StageOutput::Text(self.text.clone()))
    }

    fn close(&mut self) -> &PipelineExecutionResult {
        if self.result.is_none() {
            self.result = Some(PipelineExecutionResult::text(self.text.clone()));
        }
        self.result.get_or_insert_default()
    }
}

/// A stage reading from a stream the caller owns, such as stdin.
#[derive(Debug)]
pub struct StreamStage {
    stream: Option<LiveStream>,
    result: Option<PipelineExecutionResult>,
}

impl StreamStage {
    pub fn new(stream: LiveStream) -> Self {
        Self {
            stream: Some(stream),
            result: None,
        }
    }
}

impl Stage for StreamStage {
    fn describe(&self) -> &str {
        "external stream"
    }

    fn produce(&mut self) -> PipelineResult<StageOutput> {
        self.stream
            .take()
            .map(StageOutput::Stream)
            .ok_or_else(|| PipelineError::OutputTaken {
                stage: self.describe().to_string(),
            })
    }

    fn close(&mut self) -> &PipelineExecutionResult {
        if self.result.is_none() {
            // A stream handed downstream is read there; nothing is left here.
            let result = match self.stream.take() {
                Some(stream) => match stream.read_all() {
                    Ok(text) => PipelineExecutionResult::text(text),
                    Err(e) => PipelineExecutionResult {
                        exception: Some(StageFailure::new(e)),
                        ..Default::default()
                    },
                },
                None => PipelineExecutionResult::text(""),
            };
            self.result = Some(result);
        }
        self.result.get_or_insert_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn text_stage_produces_repeatedly() {
        let mut stage = TextStage::new("abc");
        assert!(matches!(stage.produce().unwrap(), StageOutput::Text(t) if t == "abc"));
        assert!(matches!(stage.produce().unwrap(), StageOutput::Text(t) if t == "abc"));
        assert_eq!(stage.close().stdout.as_deref(), Some("abc"));
    }

    #[test]
    fn stream_stage_collects_unread_stream() {
        let mut stage = StreamStage::new(LiveStream::from_reader(Cursor::new(b"from stdin".to_vec())));
        let first = stage.close().clone();
        assert_eq!(first.stdout.as_deref(), Some("from stdin"));
        assert_eq!(stage.close(), &first);
    }

    #[test]
    fn stream_stage_hands_off_once() {
        let mut stage = StreamStage::new(LiveStream::empty());
        assert!(stage.produce().is_ok());
        assert!(matches!(
            stage.produce(),
            Err(PipelineError::OutputTaken { .. })
        ));
        assert_eq!(stage.close().stdout.as_deref(), Some(""));
    }
}
