//! Ordered sink serialising worker output into one session log.
//!
//! Stream readers push tagged lines through cloned [`SinkHandle`]s; a single
//! consumer task writes them, in queue order, to every target (the session
//! log file and the console), flushing after each line. Lines from one
//! producer keep their relative order. Interleaving across producers follows
//! push order and is otherwise unspecified. Sequence numbers are assigned by
//! the consumer, so they always match the order lines are written in.

use std::path::{Path, PathBuf};

use evalrun_core::{LogLine, SourceTag};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tag used for lines written by the harness itself.
pub const HARNESS_TAG: &str = "EVAL";

/// Destination the consumer writes every rendered line to.
pub type SinkTarget = Box<dyn AsyncWrite + Send + Unpin>;

/// Producer side of the ordered sink.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<(SourceTag, String)>,
}

impl SinkHandle {
    /// Enqueue a line. Returns false if the consumer has already stopped.
    pub fn push(&self, tag: &SourceTag, text: impl Into<String>) -> bool {
        self.tx.send((tag.clone(), text.into())).is_ok()
    }

    /// Enqueue a line attributed to the harness.
    pub fn note(&self, text: impl Into<String>) -> bool {
        self.push(&SourceTag::new(HARNESS_TAG), text)
    }
}

/// Consumer side of the ordered sink.
pub struct LogSink {
    handle: SinkHandle,
    consumer: JoinHandle<u64>,
}

impl LogSink {
    /// Start the consumer task writing to `targets`.
    pub fn spawn(targets: Vec<SinkTarget>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(drain(rx, targets));
        Self {
            handle: SinkHandle { tx },
            consumer,
        }
    }

    /// Create `dir` if needed and start a sink writing to a new timestamped
    /// session log there and to stdout.
    pub async fn open_session(dir: &Path) -> std::io::Result<(Self, PathBuf)> {
        tokio::fs::create_dir_all(dir).await?;
        let name = format!("log_{}.txt", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(name);
        let file = tokio::fs::File::create(&path).await?;
        info!(path = %path.display(), "Opened session log");

        let targets: Vec<SinkTarget> = vec![Box::new(file), Box::new(tokio::io::stdout())];
        Ok((Self::spawn(targets), path))
    }

    /// A new producer handle.
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Drop this producer and wait until every other producer is gone and the
    /// queue is drained. Returns the number of lines written.
    pub async fn close(self) -> u64 {
        let Self { handle, consumer } = self;
        drop(handle);
        match consumer.await {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "Sink consumer task failed");
                0
            }
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<(SourceTag, String)>,
    mut targets: Vec<SinkTarget>,
) -> u64 {
    let mut written = 0u64;
    while let Some((tag, text)) = rx.recv().await {
        let line = LogLine::new(tag, text, written);
        let rendered = line.render();
        for target in targets.iter_mut() {
            let result = async {
                target.write_all(rendered.as_bytes()).await?;
                target.flush().await
            }
            .await;
            if let Err(e) = result {
                warn!(error = %e, seq = line.seq, "Failed to write log line");
            }
        }
        written += 1;
    }

    for target in targets.iter_mut() {
        target.shutdown().await.ok();
    }
    debug!(lines = written, "Sink drained");
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file_sink(dir: &Path) -> (LogSink, PathBuf) {
        let path = dir.join("session.log");
        let file = tokio::fs::File::create(&path).await.unwrap();
        (LogSink::spawn(vec![Box::new(file)]), path)
    }

    #[tokio::test]
    async fn test_single_producer_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, path) = file_sink(dir.path()).await;

        let handle = sink.handle();
        let tag = SourceTag::new("DM");
        for i in 0..200 {
            assert!(handle.push(&tag, format!("line {i}")));
        }
        drop(handle);

        assert_eq!(sink.close().await, 200);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let expected: Vec<String> = (0..200).map(|i| format!("DM  | line {i}")).collect();
        assert_eq!(content.lines().collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_their_own_order() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, path) = file_sink(dir.path()).await;

        let mut tasks = Vec::new();
        for tag in ["CC", "DM"] {
            let handle = sink.handle();
            tasks.push(tokio::spawn(async move {
                let tag = SourceTag::new(tag);
                for i in 0..100 {
                    handle.push(&tag, i.to_string());
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(sink.close().await, 200);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        for tag in ["CC  | ", "DM  | "] {
            let seen: Vec<u32> = content
                .lines()
                .filter_map(|l| l.strip_prefix(tag))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_interleaved_handles_written_in_queue_order() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, path) = file_sink(dir.path()).await;

        let checker = sink.handle();
        let manager = sink.handle();
        let (cc, dm) = (SourceTag::new("CC"), SourceTag::new("DM"));
        manager.push(&dm, "a");
        checker.push(&cc, "b");
        manager.push(&dm, "c");
        sink.handle().note("d");
        checker.push(&cc, "e");
        drop((checker, manager));

        assert_eq!(sink.close().await, 5);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            content.lines().collect::<Vec<_>>(),
            vec!["DM  | a", "CC  | b", "DM  | c", "EVAL| d", "CC  | e"]
        );
    }

    #[tokio::test]
    async fn test_harness_note_tag() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, path) = file_sink(dir.path()).await;

        sink.handle().note("----- Starting experiment exp-1 -----");
        sink.close().await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "EVAL| ----- Starting experiment exp-1 -----\n");
    }

    #[tokio::test]
    async fn test_open_session_creates_timestamped_log() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("tmp");
        let (sink, path) = LogSink::open_session(&work_dir).await.unwrap();
        sink.close().await;

        assert!(path.starts_with(&work_dir));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("log_") && name.ends_with(".txt"));
    }
}
