//! Live byte streams flowing between pipeline stages.
//!
//! A [`LiveStream`] is the owned read side of whatever a stage produces:
//! a child's stdout, the read end of an OS pipe, or an external reader.
//!
//! ```text
//!   text ──▶ Feeder thread ──▶ [OS pipe] ──▶ LiveStream ──▶ child stdin
//!                                                      └──▶ StreamInput (fn)
//!   child stdout ─────────────────────────▶ LiveStream ──▶ next child stdin
//! ```
//!
//! All pipes come from `std::io::pipe`, which creates both ends close-on-exec,
//! so spawned children never inherit a stray write end and EOF propagates.
//! Writers block when the pipe buffer is full (backpressure); dropping the
//! last write end signals EOF; dropping the read end makes writes fail with
//! `BrokenPipe`.

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{ChildStdout, Stdio};
use std::thread::{self, JoinHandle};

/// Owned read side of a stage's output.
pub struct LiveStream {
    source: Source,
}

enum Source {
    Child(ChildStdout),
    Pipe {
        reader: io::PipeReader,
        feeder: Option<Feeder>,
    },
    External(Box<dyn Read + Send>),
}

impl LiveStream {
    /// Wrap a child's stdout.
    pub fn from_child(stdout: ChildStdout) -> Self {
        Self { source: Source::Child(stdout) }
    }

    /// Wrap the read end of an OS pipe.
    pub fn from_pipe(reader: io::PipeReader) -> Self {
        Self {
            source: Source::Pipe { reader, feeder: None },
        }
    }

    /// Wrap any reader supplied by the caller.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            source: Source::External(Box::new(reader)),
        }
    }

    /// A stream that is immediately at EOF.
    pub fn empty() -> Self {
        Self::from_reader(io::empty())
    }

    /// Turn materialized text into a live stream.
    ///
    /// Opens an OS pipe and starts a feeder thread that writes the text and
    /// then closes the write end, so the consumer can start reading before the
    /// whole string has been pushed.
    pub fn from_text(text: impl Into<String>) -> io::Result<Self> {
        let text = text.into();
        let (reader, writer) = io::pipe()?;
        tracing::trace!(bytes = text.len(), "feeding text into pipe");
        let feeder = Feeder::spawn("shrimp-text-feeder", writer, move |w| {
            w.write_all(text.as_bytes())
        })?;
        Ok(Self {
            source: Source::Pipe {
                reader,
                feeder: Some(feeder),
            },
        })
    }

    /// Convert into a child process stdin.
    ///
    /// Child and pipe sources hand their file descriptor over directly.
    /// External readers have no descriptor, so a pump thread copies them into
    /// a fresh pipe. The returned feeder must be joined once the child is done.
    pub fn into_stdio(self) -> io::Result<(Stdio, Option<Feeder>)> {
        match self.source {
            Source::Child(stdout) => Ok((Stdio::from(stdout), None)),
            Source::Pipe { reader, feeder } => Ok((Stdio::from(reader), feeder)),
            Source::External(mut external) => {
                let (reader, writer) = io::pipe()?;
                let pump = Feeder::spawn("shrimp-stream-pump", writer, move |w| {
                    io::copy(&mut external, w).map(|_| ())
                })?;
                Ok((Stdio::from(reader), Some(pump)))
            }
        }
    }

    /// Read everything that is left, decoding lossily as UTF-8.
    pub fn read_all(mut self) -> io::Result<String> {
        let text = read_lossy(&mut self);
        self.finish();
        text
    }

    /// Discard everything that is left so upstream producers can finish.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    /// Discard the rest of the stream on a background thread.
    ///
    /// For consumers that will never read their input: the producer keeps
    /// running to completion instead of seeing a closed pipe.
    pub fn drain_in_background(self) -> io::Result<Drainer> {
        let handle = thread::Builder::new()
            .name("shrimp-drain".to_string())
            .spawn(move || {
                let mut stream = self;
                let drained = stream.drain();
                stream.finish();
                drained
            })?;
        Ok(Drainer { handle })
    }

    /// Release the stream, joining its feeder if it has one.
    pub fn finish(self) {
        if let Source::Pipe {
            reader,
            feeder: Some(feeder),
        } = self.source
        {
            // Close our read end first so a feeder blocked on a full pipe
            // sees BrokenPipe instead of waiting forever.
            drop(reader);
            feeder.join();
        }
    }
}

impl Read for LiveStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::Child(stdout) => stdout.read(buf),
            Source::Pipe { reader, .. } => reader.read(buf),
            Source::External(reader) => reader.read(buf),
        }
    }
}

impl fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Child(_) => "child",
            Source::Pipe { .. } => "pipe",
            Source::External(_) => "external",
        };
        f.debug_struct("LiveStream").field("source", &kind).finish()
    }
}

/// A worker thread writing into the write end of an OS pipe.
///
/// The write end is dropped when the work finishes, which signals EOF.
pub struct Feeder {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Feeder {
    /// Start a feeder thread running `work` against `writer`.
    pub fn spawn<F>(name: &'static str, writer: io::PipeWriter, work: F) -> io::Result<Self>
    where
        F: FnOnce(&mut io::PipeWriter) -> io::Result<()> + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut writer = writer;
            match work(&mut writer) {
                Ok(()) => tracing::trace!(feeder = name, "feeder finished"),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::trace!(feeder = name, "feeder stopped: reader closed")
                }
                Err(e) => tracing::warn!(feeder = name, "feeder failed: {}", e),
            }
        })?;
        Ok(Self { name, handle })
    }

    /// Wait for the feeder to finish.
    pub fn join(self) {
        if let Err(payload) = self.handle.join() {
            tracing::warn!(feeder = self.name, "feeder panicked: {}", panic_message(&*payload));
        }
    }
}

impl fmt::Debug for Feeder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feeder").field("name", &self.name).finish()
    }
}

/// A thread that reads a stream to the end in the background.
///
/// Used for stderr from spawn time, and for a pipeline's tail output while
/// upstream stages are being drained, so no pipe buffer can fill up unread.
pub struct Collector {
    handle: JoinHandle<io::Result<String>>,
}

impl Collector {
    /// Start collecting `reader`.
    pub fn spawn<R>(name: &str, mut reader: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || read_lossy(&mut reader))?;
        Ok(Self { handle })
    }

    /// Wait for EOF and return everything read.
    pub fn collect(self) -> io::Result<String> {
        match self.handle.join() {
            Ok(text) => text,
            Err(payload) => Err(io::Error::other(format!(
                "collector panicked: {}",
                panic_message(&*payload)
            ))),
        }
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").finish()
    }
}

/// A thread discarding a stream, started by [`LiveStream::drain_in_background`].
pub struct Drainer {
    handle: JoinHandle<io::Result<u64>>,
}

impl Drainer {
    /// Wait for EOF and return the number of bytes discarded.
    pub fn join(self) -> io::Result<u64> {
        match self.handle.join() {
            Ok(drained) => drained,
            Err(payload) => Err(io::Error::other(format!(
                "drain panicked: {}",
                panic_message(&*payload)
            ))),
        }
    }
}

impl fmt::Debug for Drainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drainer").finish()
    }
}

/// Read a stream to EOF, replacing invalid UTF-8.
pub fn read_lossy(reader: &mut impl Read) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(match String::from_utf8(buf) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
