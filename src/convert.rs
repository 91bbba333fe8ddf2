//! The pipeline orchestrator and its one-shot entry points.
//!
//! [`Pipeline::run`] walks the stages
//! `Idle → Rasterizing → Recognizing → Assembling → CleaningUp → Done`,
//! strictly forward. A fatal error skips the remaining work stages but never
//! the cleanup, and cleanup problems only ever add warnings to the report.

use crate::config::PipelineConfig;
use crate::error::{ConversionError, OcrError};
use crate::output::{RunReport, RunStats};
use crate::pipeline::assemble::{self, ResultAssembler};
use crate::pipeline::rasterize::{self, PdfiumRasterizer, Rasterizer};
use crate::pipeline::recognize::RecognitionClient;
use crate::pipeline::vision::{HttpVisionBackend, VisionBackend};
use crate::progress::{CancelToken, ProgressReporter, Stage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A configured pipeline. Cheap to share; every [`run`](Pipeline::run) is
/// independent.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    backend: Arc<dyn VisionBackend>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with the pdfium rasteriser and the HTTP vision backend.
    pub fn new(config: PipelineConfig) -> Result<Self, OcrError> {
        let backend = Arc::new(HttpVisionBackend::from_config(&config)?);
        let rasterizer = Arc::new(PdfiumRasterizer::from_config(&config));
        Ok(Self::with_stages(config, rasterizer, backend))
    }

    /// Pipeline with caller-supplied stages.
    pub fn with_stages(
        config: PipelineConfig,
        rasterizer: Arc<dyn Rasterizer>,
        backend: Arc<dyn VisionBackend>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            backend,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline for one document on the current task.
    ///
    /// `output_path` defaults to the source path with a `.md` extension.
    /// Always returns a report; a failed run has `success == false` and a
    /// `"failed: <cause>"` message. Emits progress on `progress` but not the
    /// terminal [`Finished`](crate::progress::PipelineEvent::Finished) event,
    /// which is the caller's to send.
    pub async fn run(
        &self,
        pdf_path: &Path,
        output_path: Option<&Path>,
        progress: &ProgressReporter,
        cancel: &CancelToken,
    ) -> RunReport {
        let total_start = Instant::now();
        let output_path = output_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| assemble::default_output_path(pdf_path));
        let temp_dir = rasterize::run_temp_dir(pdf_path);
        info!(
            "Starting run: {} → {}",
            pdf_path.display(),
            output_path.display()
        );

        let stem = rasterize::document_stem(pdf_path);
        // Page images already there belong to someone else; never swept.
        let preexisting = rasterize::page_images_in(&temp_dir, &stem);
        let mut stats = RunStats::default();
        let mut artifacts = Vec::new();

        let outcome = self
            .execute(
                pdf_path,
                &output_path,
                &temp_dir,
                &mut artifacts,
                &mut stats,
                progress,
                cancel,
            )
            .await;

        // ── Cleanup: always, on every path ───────────────────────────────
        progress.enter(Stage::CleaningUp, "Cleaning up temporary files");
        for leftover in rasterize::page_images_in(&temp_dir, &stem) {
            if !artifacts.contains(&leftover) && !preexisting.contains(&leftover) {
                artifacts.push(leftover);
            }
        }
        let mut warnings = rasterize::cleanup(&artifacts);
        warnings.extend(rasterize::remove_temp_dir(&temp_dir));
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        match outcome {
            Ok(unrecognized) => {
                let report = RunReport::succeeded(output_path, unrecognized, warnings, stats);
                info!(
                    "Run {}: {}/{} pages in {}ms",
                    report.message,
                    report.stats.recognized_pages,
                    report.stats.total_pages,
                    report.stats.total_duration_ms
                );
                progress.update(Stage::Done, 100, report.message.clone());
                report
            }
            Err(e) => {
                error!("Run failed: {}", e);
                let report = RunReport::failed(&e, warnings, stats);
                progress.update(Stage::Done, progress.percent(), report.message.clone());
                report
            }
        }
    }

    /// The work stages. Returns the unrecognised page ordinals.
    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        pdf_path: &Path,
        output_path: &Path,
        temp_dir: &Path,
        artifacts: &mut Vec<PathBuf>,
        stats: &mut RunStats,
        progress: &ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Vec<usize>, OcrError> {
        let assembler = ResultAssembler::from_config(&self.config, pdf_path);
        assembler.check_destination(output_path)?;
        checkpoint(cancel)?;

        // ── Rasterizing ──────────────────────────────────────────────────
        progress.enter(
            Stage::Rasterizing,
            format!("Converting {} to images", display_name(pdf_path)),
        );
        let start = Instant::now();
        let images = self
            .rasterizer
            .convert(pdf_path, temp_dir, self.config.dpi)
            .await?;
        artifacts.extend(images.iter().cloned());
        stats.rasterize_duration_ms = start.elapsed().as_millis() as u64;
        stats.total_pages = images.len();
        if images.is_empty() {
            return Err(ConversionError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: "no pages were rendered".into(),
            }
            .into());
        }
        info!(
            "Rasterised {} pages in {}ms",
            images.len(),
            stats.rasterize_duration_ms
        );
        checkpoint(cancel)?;

        // ── Recognizing ──────────────────────────────────────────────────
        progress.enter(
            Stage::Recognizing,
            format!("Recognizing {} pages", images.len()),
        );
        let start = Instant::now();
        let client = RecognitionClient::from_config(Arc::clone(&self.backend), &self.config);
        let results = client
            .recognize(&images, cancel, |done, total, _| {
                progress.recognition_progress(done, total)
            })
            .await?;
        stats.recognize_duration_ms = start.elapsed().as_millis() as u64;
        stats.recognized_pages = results.iter().filter(|r| r.is_success()).count();
        stats.failed_pages = results.len() - stats.recognized_pages;
        checkpoint(cancel)?;

        if stats.recognized_pages == 0 {
            warn!("No page was recognised; writing placeholders only");
        }

        // ── Assembling ───────────────────────────────────────────────────
        progress.enter(
            Stage::Assembling,
            format!("Writing {}", display_name(output_path)),
        );
        assembler.assemble(&results, output_path).await?;

        Ok(results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.page)
            .collect())
    }
}

fn checkpoint(cancel: &CancelToken) -> Result<(), OcrError> {
    if cancel.is_cancelled() {
        info!("Cancellation observed; skipping remaining stages");
        return Err(OcrError::Cancelled);
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Convert one PDF with `config`, on the current task.
///
/// # Errors
/// Only when the pipeline cannot be built. A run that fails is still
/// `Ok`, with `report.success == false`.
pub async fn process(
    pdf_path: impl AsRef<Path>,
    output_path: Option<&Path>,
    config: &PipelineConfig,
) -> Result<RunReport, OcrError> {
    let pipeline = Pipeline::new(config.clone())?;
    Ok(pipeline
        .run(
            pdf_path.as_ref(),
            output_path,
            &ProgressReporter::silent(),
            &CancelToken::new(),
        )
        .await)
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    pdf_path: impl AsRef<Path>,
    output_path: Option<&Path>,
    config: &PipelineConfig,
) -> Result<RunReport, OcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(pdf_path, output_path, config))
}
