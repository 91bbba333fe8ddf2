//! # pdfocr
//!
//! OCR PDF documents with a remote vision model, page by page.
//!
//! Each page is rasterised to an image with pdfium, sent to an
//! OpenAI-compatible vision endpoint (Qwen-VL by default), and the recognised
//! text is assembled into one Markdown document in page order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Rasterize  pdfium renders every page to {stem}_page_NNN.jpg
//!  ├─ 2. Recognize  concurrent vision calls, retry on transient errors
//!  ├─ 3. Assemble   ordered Markdown with page markers and placeholders
//!  ├─ 4. Clean up   delete the page images (failures are warnings)
//!  └─ 5. Report     RunReport { success, message, warnings, … }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfocr::{process, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .credential(std::env::var("DASHSCOPE_API_KEY")?)
//!         .build()?;
//!     let report = process("document.pdf", None, &config).await?;
//!     println!("{}", report.message);
//!     for warning in &report.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For runs in the background with progress events and cancellation, use
//! [`PipelineWorker`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfocr = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    PageImageFormat, PageSeparator, PipelineConfig, PipelineConfigBuilder, VisionModel,
    DEFAULT_ENDPOINT,
};
pub use convert::{process, process_sync, Pipeline};
pub use error::{
    AssemblyError, ConversionError, Disposition, OcrError, PageError, RecognitionError,
};
pub use output::{RecognitionResult, RunReport, RunStats};
pub use pipeline::assemble::ResultAssembler;
pub use pipeline::rasterize::{PdfiumRasterizer, Rasterizer};
pub use pipeline::recognize::RecognitionClient;
pub use pipeline::vision::{HttpVisionBackend, PageRequest, VisionBackend};
pub use progress::{CancelToken, PipelineEvent, ProgressReporter, Stage};
pub use worker::{PipelineHandle, PipelineWorker};
