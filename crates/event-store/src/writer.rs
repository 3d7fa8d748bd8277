//! Single consumer of the output queue.

use std::path::{Path, PathBuf};

use devpipe_core_types::CapturedEvent;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::EsError;
use crate::metrics::WriterMetrics;

/// Returned when a writer stops, handing the queue back so the next file's writer keeps
/// draining the same ordered stream.
pub struct WriterExit {
    pub receiver: UnboundedReceiver<CapturedEvent>,
    pub path: PathBuf,
    pub outcome: Result<(), EsError>,
}

/// Appends each record as one JSON line to a single file, in queue order.
pub struct LogWriter {
    path: PathBuf,
    file: Option<File>,
    preamble: Option<CapturedEvent>,
    metrics: WriterMetrics,
}

impl LogWriter {
    pub fn new(path: impl Into<PathBuf>, metrics: WriterMetrics) -> Self {
        Self {
            path: path.into(),
            file: None,
            preamble: None,
            metrics,
        }
    }

    /// Record written before anything taken from the queue.
    pub fn with_preamble(mut self, event: CapturedEvent) -> Self {
        self.preamble = Some(event);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain `rx` into the file until cancelled or the queue closes.
    ///
    /// Cancellation is checked between records only, so the record being written always
    /// completes. Records already queued at cancellation are still written. A failed write
    /// ends the task and loses that record.
    pub async fn run(
        mut self,
        mut rx: UnboundedReceiver<CapturedEvent>,
        cancel: CancellationToken,
    ) -> WriterExit {
        let outcome = self.drain(&mut rx, &cancel).await;
        match &outcome {
            Ok(()) => debug!(target: "event-store", path = %self.path.display(), "writer stopped"),
            Err(err) => {
                self.metrics.record_error(err.to_string());
                error!(target: "event-store", path = %self.path.display(), error = %err, "writer failed");
            }
        }
        WriterExit {
            receiver: rx,
            path: self.path,
            outcome,
        }
    }

    async fn drain(
        &mut self,
        rx: &mut UnboundedReceiver<CapturedEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), EsError> {
        self.open().await?;
        if let Some(first) = self.preamble.take() {
            self.append(&first).await?;
        }
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(event) => self.append(&event).await?,
                    None => return self.finish().await,
                },
            }
        }
        while let Ok(event) = rx.try_recv() {
            self.append(&event).await?;
        }
        self.finish().await
    }

    async fn open(&mut self) -> Result<(), EsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| EsError::open(&self.path, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| EsError::open(&self.path, err))?;
        self.file = Some(file);
        self.metrics.record_open();
        info!(target: "event-store", path = %self.path.display(), "log file opened");
        Ok(())
    }

    async fn append(&mut self, event: &CapturedEvent) -> Result<(), EsError> {
        let mut line = event.to_line()?;
        line.push('\n');
        let path = &self.path;
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return Err(EsError::new(crate::EsErrorKind::WriterGone)),
        };
        file.write_all(line.as_bytes())
            .await
            .map_err(|err| EsError::write(path, err))?;
        file.flush().await.map_err(|err| EsError::write(path, err))?;
        self.metrics.record_line(line.len());
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), EsError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|err| EsError::write(&self.path, err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devpipe_core_types::EventType;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn closed_queue_ends_writer_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.jsonl");
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(CapturedEvent::now(EventType::SessionStart, None, json!({"log_file": "a"})))
            .unwrap();
        drop(tx);

        let exit = LogWriter::new(&path, WriterMetrics::default())
            .run(rx, CancellationToken::new())
            .await;
        assert!(exit.outcome.is_ok());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn unopenable_path_reports_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();
        let metrics = WriterMetrics::default();

        let exit = LogWriter::new(blocker.join("log.jsonl"), metrics.clone())
            .run(rx, CancellationToken::new())
            .await;
        assert!(matches!(
            exit.outcome.unwrap_err().kind(),
            crate::EsErrorKind::OpenFailed { .. }
        ));
        assert!(metrics.has_failed());
    }
}
