//! Control surface over a running pipeline and its log writer.

use std::path::PathBuf;

use chrono::Local;
use devpipe_core_types::{CapturedEvent, EventType};
use devpipe_event_store::{
    log_path, unique_path, LogCfg, LogWriter, WriterExit, WriterMetrics, WriterSnapshot,
};
use network_tap::TapConfig;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::metrics::{PipelineSnapshot, PipelineStats};
use crate::pipeline::{EventPipeline, PipelineInputs};
use crate::switch::LoggingSwitch;

#[derive(Clone, Debug, Default)]
pub struct MonitorSettings {
    pub pipeline: PipelineConfig,
    pub tap: TapConfig,
    pub log: LogCfg,
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
    pub logging: bool,
    pub log_file: Option<PathBuf>,
    pub pipeline: PipelineSnapshot,
    pub writer: WriterSnapshot,
}

enum WriterSlot {
    /// No writer yet; the queue is parked here.
    Idle(UnboundedReceiver<CapturedEvent>),
    Running {
        path: PathBuf,
        cancel: CancellationToken,
        task: JoinHandle<WriterExit>,
    },
    Closed,
}

/// Starts and stops logging, rotates log files and shuts the pipeline down.
pub struct Monitor {
    log_cfg: LogCfg,
    switch: LoggingSwitch,
    stats: PipelineStats,
    writer_metrics: WriterMetrics,
    writer: Mutex<WriterSlot>,
    pipeline_cancel: CancellationToken,
    pipeline_task: Mutex<Option<JoinHandle<Result<(), PipelineError>>>>,
}

impl Monitor {
    /// Spawn the pipeline task. Logging starts paused with no file selected.
    pub fn launch(settings: MonitorSettings) -> (Self, PipelineInputs) {
        let (output, queue): (UnboundedSender<CapturedEvent>, _) = mpsc::unbounded_channel();
        let switch = LoggingSwitch::default();
        let (pipeline, inputs) =
            EventPipeline::new(settings.pipeline, settings.tap, switch.clone(), output);
        let stats = pipeline.stats();
        let pipeline_cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(pipeline_cancel.clone()));
        let monitor = Self {
            log_cfg: settings.log,
            switch,
            stats,
            writer_metrics: WriterMetrics::default(),
            writer: Mutex::new(WriterSlot::Idle(queue)),
            pipeline_cancel,
            pipeline_task: Mutex::new(Some(task)),
        };
        (monitor, inputs)
    }

    pub fn switch(&self) -> &LoggingSwitch {
        &self.switch
    }

    pub fn is_logging(&self) -> bool {
        self.switch.is_active()
    }

    /// Resume logging, opening a first file when none has been selected yet.
    pub async fn start_logging(&self, name_hint: Option<&str>) -> Result<PathBuf, PipelineError> {
        let current = self.log_file().await;
        match current {
            Some(path) if !self.writer_metrics.has_failed() => {
                self.switch.start();
                info!(target: "event-pipeline", path = %path.display(), "logging resumed");
                Ok(path)
            }
            _ => self.new_log_file(name_hint).await,
        }
    }

    pub fn pause_logging(&self) {
        self.switch.pause();
        info!(target: "event-pipeline", "logging paused");
    }

    /// Close the current file and continue in a fresh one. Logging is active afterwards and the
    /// new file starts with a `SESSION_START` record.
    pub async fn new_log_file(&self, name_hint: Option<&str>) -> Result<PathBuf, PipelineError> {
        let path = unique_path(log_path(&self.log_cfg, name_hint, Local::now()));
        self.rotate_to(path).await
    }

    async fn rotate_to(&self, path: PathBuf) -> Result<PathBuf, PipelineError> {
        let mut slot = self.writer.lock().await;
        let queue = match std::mem::replace(&mut *slot, WriterSlot::Closed) {
            WriterSlot::Idle(queue) => queue,
            WriterSlot::Running { cancel, task, .. } => {
                cancel.cancel();
                let exit = task
                    .await
                    .map_err(|err| PipelineError::TaskEnded(err.to_string()))?;
                if let Err(err) = &exit.outcome {
                    warn!(target: "event-pipeline", path = %exit.path.display(), error = %err, "previous log file ended with an error");
                }
                exit.receiver
            }
            WriterSlot::Closed => return Err(PipelineError::QueueClosed),
        };

        let start = CapturedEvent::now(
            EventType::SessionStart,
            None,
            json!({"log_file": path.display().to_string()}),
        );
        self.stats.record_emitted(EventType::SessionStart);
        let writer = LogWriter::new(&path, self.writer_metrics.clone()).with_preamble(start);
        let cancel = CancellationToken::new();
        let switch = self.switch.clone();
        // started before the writer exists so a failing writer's pause is never overridden
        switch.start();
        let run = writer.run(queue, cancel.clone());
        let task = tokio::spawn(async move {
            let exit = run.await;
            if exit.outcome.is_err() {
                switch.pause();
            }
            exit
        });
        *slot = WriterSlot::Running {
            path: path.clone(),
            cancel,
            task,
        };
        info!(target: "event-pipeline", path = %path.display(), "new log file");
        Ok(path)
    }

    pub async fn log_file(&self) -> Option<PathBuf> {
        match &*self.writer.lock().await {
            WriterSlot::Running { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    /// Writer counters, including whether the last write failed.
    pub fn writer_status(&self) -> WriterSnapshot {
        self.writer_metrics.snapshot()
    }

    pub async fn stats(&self) -> MonitorStats {
        MonitorStats {
            logging: self.switch.is_active(),
            log_file: self.log_file().await,
            pipeline: self.stats.snapshot(),
            writer: self.writer_metrics.snapshot(),
        }
    }

    /// Stop the pipeline (flushing pending bundles), then let the writer drain the queue.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.pipeline_cancel.cancel();
        let pipeline = self.pipeline_task.lock().await.take();
        let pipeline_result = match pipeline {
            Some(task) => task
                .await
                .map_err(|err| PipelineError::TaskEnded(err.to_string()))
                .and_then(|result| result),
            None => Ok(()),
        };
        self.switch.pause();

        let mut slot = self.writer.lock().await;
        if let WriterSlot::Running { cancel, task, .. } =
            std::mem::replace(&mut *slot, WriterSlot::Closed)
        {
            cancel.cancel();
            let exit = task
                .await
                .map_err(|err| PipelineError::TaskEnded(err.to_string()))?;
            exit.outcome?;
        }
        pipeline_result
    }
}
