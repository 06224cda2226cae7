//! Per-worker stream reader.
//!
//! Each supervised process gets one reader task that drains its merged
//! stdout/stderr line by line. Signals are extracted and applied to the
//! session state *before* the line is queued in the sink, so flag and sample
//! updates never depend on the sink keeping up.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use evalrun_core::{Signal, SignalExtractor, WorkerRole};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::SinkHandle;
use crate::state::SessionState;

/// A stream of output lines, without trailing newlines.
pub type LineStream = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

/// Lines of a single reader.
pub fn lines<R>(reader: R) -> LineStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    Box::pin(LinesStream::new(BufReader::new(reader).lines()))
}

/// Lines of two readers merged into one stream, e.g. a child's stdout and
/// stderr. Each side keeps its own order.
pub fn merged_lines<O, E>(stdout: O, stderr: E) -> LineStream
where
    O: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    Box::pin(lines(stdout).merge(lines(stderr)))
}

/// Reads one worker's output until end of stream or until stopped.
pub struct StreamReader {
    role: WorkerRole,
    extractor: Arc<SignalExtractor>,
    state: Arc<SessionState>,
    sink: SinkHandle,
}

impl StreamReader {
    pub fn new(
        role: WorkerRole,
        extractor: Arc<SignalExtractor>,
        state: Arc<SessionState>,
        sink: SinkHandle,
    ) -> Self {
        Self {
            role,
            extractor,
            state,
            sink,
        }
    }

    /// Spawn the read loop. The task resolves to the number of lines consumed.
    ///
    /// Cancelling `stop` makes the reader drop its stream and exit without
    /// waiting for the worker to close it.
    pub fn spawn(self, lines: LineStream, stop: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(lines, stop))
    }

    async fn run(self, mut lines: LineStream, stop: CancellationToken) -> u64 {
        let mut count = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!(role = %self.role, lines = count, "Reader stopped");
                    break;
                }
                next = lines.next() => match next {
                    Some(Ok(line)) => {
                        count += 1;
                        self.handle_line(line);
                    }
                    Some(Err(e)) => {
                        warn!(role = %self.role, error = %e, "Error reading worker output");
                        break;
                    }
                    None => {
                        info!(role = %self.role, lines = count, "Worker output closed (EOF)");
                        break;
                    }
                },
            }
        }
        count
    }

    fn handle_line(&self, line: String) {
        for signal in self.extractor.extract(self.role, &line) {
            match signal {
                Ok(Signal::Ready(role)) => {
                    if self.state.readiness(role).set() {
                        info!(role = %role, "Readiness marker seen");
                    }
                }
                Ok(Signal::Sample { kind, value_ns }) => {
                    self.state.samples().record(kind, value_ns);
                }
                Err(e) => {
                    warn!(role = %self.role, error = %e, "Dropping timing sample");
                    self.sink.note(format!("WARNING: {} ({})", e, self.role.tag()));
                }
            }
        }
        self.sink.push(&self.role.tag(), line);
    }
}
