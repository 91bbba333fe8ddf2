//! Background worker: one run at a time, off the caller's task.
//!
//! [`PipelineWorker::submit`] spawns the run on the tokio runtime and hands
//! back a [`PipelineHandle`]: an event receiver, a cancel token and the
//! task's join handle. The caller never touches pipeline state directly.
//!
//! ```rust,no_run
//! use pdfocr::{PipelineConfig, PipelineEvent, PipelineWorker};
//!
//! # async fn demo() -> Result<(), pdfocr::OcrError> {
//! let config = PipelineConfig::builder().credential("sk-...").build()?;
//! let worker = PipelineWorker::new(config)?;
//! let mut handle = worker.submit("scan.pdf", None)?;
//!
//! while let Some(event) = handle.events.recv().await {
//!     match event {
//!         PipelineEvent::Progress { percent, status, .. } => println!("{percent:>3}% {status}"),
//!         PipelineEvent::Finished(report) => println!("{}", report.message),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::PipelineConfig;
use crate::convert::Pipeline;
use crate::error::OcrError;
use crate::output::RunReport;
use crate::progress::{CancelToken, PipelineEvent, ProgressReporter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs pipelines in the background, at most one at a time.
#[derive(Debug, Clone)]
pub struct PipelineWorker {
    pipeline: Arc<Pipeline>,
    busy: Arc<AtomicBool>,
}

/// Caller's side of one submitted run.
#[derive(Debug)]
pub struct PipelineHandle {
    /// Progress events, then exactly one [`PipelineEvent::Finished`].
    pub events: mpsc::UnboundedReceiver<PipelineEvent>,
    /// Request that the run stop at the next checkpoint.
    pub cancel: CancelToken,
    /// Resolves to the same report carried by the `Finished` event.
    pub task: JoinHandle<RunReport>,
}

impl PipelineHandle {
    /// Wait for the run to finish, discarding any unread events.
    pub async fn wait(self) -> Result<RunReport, OcrError> {
        self.task
            .await
            .map_err(|e| OcrError::Internal(format!("pipeline task failed: {e}")))
    }
}

impl PipelineWorker {
    pub fn new(config: PipelineConfig) -> Result<Self, OcrError> {
        Ok(Self::from_pipeline(Pipeline::new(config)?))
    }

    pub fn from_pipeline(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a run for `pdf_path`. Must be called within a tokio runtime.
    ///
    /// # Errors
    /// [`OcrError::WorkerBusy`] while a previous run has not finished.
    pub fn submit(
        &self,
        pdf_path: impl AsRef<Path>,
        output_path: Option<PathBuf>,
    ) -> Result<PipelineHandle, OcrError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OcrError::WorkerBusy);
        }

        let (reporter, events) = ProgressReporter::channel();
        let cancel = CancelToken::new();
        let pipeline = Arc::clone(&self.pipeline);
        let pdf_path = pdf_path.as_ref().to_path_buf();
        let run_cancel = cancel.clone();
        let guard = BusyGuard(Arc::clone(&self.busy));

        let task = tokio::spawn(async move {
            let report = pipeline
                .run(&pdf_path, output_path.as_deref(), &reporter, &run_cancel)
                .await;
            // Idle before `Finished` is sent.
            drop(guard);
            reporter.finish(report.clone());
            report
        });

        Ok(PipelineHandle {
            events,
            cancel,
            task,
        })
    }
}

/// Clears the busy flag when the run ends, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        debug!("Worker idle");
        self.0.store(false, Ordering::SeqCst);
    }
}
