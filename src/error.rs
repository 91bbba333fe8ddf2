//! Error types for the pdfocr library.
//!
//! The taxonomy follows the pipeline stages, and each error knows how far it
//! is allowed to travel:
//!
//! * [`ConversionError`] (fatal): the document could not be rasterised
//!   (unreadable, corrupt, encrypted, pdfium missing).
//! * [`RecognitionError`]: tagged by [`Disposition`]. Transient failures are
//!   retried, permanent ones (bad credential, malformed request) end the run,
//!   and per-item ones are recorded against a single page as a [`PageError`].
//! * [`AssemblyError`] (fatal): the output document could not be written.
//! * [`OcrError`]: what a failed run reports to its caller.
//!
//! Cleanup problems are not errors at all. They travel as plain warning
//! strings on a successful [`crate::output::RunReport`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The rasterisation stage failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The recognition stage hit a failure that retrying cannot fix.
    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    /// The assembly stage failed.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A run is already in flight on this worker.
    #[error("a run is already in progress on this worker")]
    WorkerBusy,

    /// Cancellation was requested before the run finished.
    #[error("run cancelled")]
    Cancelled,

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The document could not be turned into page images.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("file is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium could not be located or loaded.
    #[error("PDFium is unavailable: {detail}")]
    ToolchainUnavailable { detail: String },

    /// The directory for page images could not be created.
    #[error("cannot create image directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// pdfium-render returned an error for a specific page.
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A rendered page could not be written to disk.
    #[error("cannot write page image '{path}': {detail}")]
    ImageWrite { path: PathBuf, detail: String },

    /// The blocking render task died.
    #[error("render task failed: {0}")]
    TaskFailed(String),
}

/// How the caller of a recognition backend should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry with backoff.
    Transient,
    /// Do not retry; stop dispatching and fail the run.
    Permanent,
    /// Do not retry; record the failure against this page and continue.
    PerItem,
}

/// Errors from the remote recognition service.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// HTTP 401/403: the credential is wrong or lacks access.
    #[error("authentication rejected by OCR service (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },

    /// HTTP 4xx other than auth and rate limiting: the request itself is bad.
    #[error("OCR service rejected the request (HTTP {status}): {detail}")]
    InvalidRequest { status: u16, detail: String },

    /// Timeout, connection failure, HTTP 408/429/5xx.
    #[error("transient OCR service error: {detail}")]
    Transient {
        detail: String,
        retry_after_secs: Option<u64>,
    },

    /// A failure confined to one page.
    #[error(transparent)]
    PerPage(#[from] PageError),
}

impl RecognitionError {
    pub fn disposition(&self) -> Disposition {
        match self {
            RecognitionError::Transient { .. } => Disposition::Transient,
            RecognitionError::Auth { .. } | RecognitionError::InvalidRequest { .. } => {
                Disposition::Permanent
            }
            RecognitionError::PerPage(_) => Disposition::PerItem,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::RecognitionResult`]; the page is rendered as a
/// placeholder in the output and reported as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image could not be read or encoded.
    #[error("page {page}: image unreadable: {detail}")]
    ImageUnreadable { page: usize, detail: String },

    /// The service answered, but without usable text.
    #[error("page {page}: unusable response: {detail}")]
    BadResponse { page: usize, detail: String },

    /// Transient failures persisted through every retry.
    #[error("page {page}: failed after {attempts} attempts: {detail}")]
    RetriesExhausted {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// Cancellation was observed before the page was dispatched.
    #[error("page {page}: cancelled before dispatch")]
    Cancelled { page: usize },
}

/// The output document could not be produced.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Could not create the output directory or write the output file.
    #[error("failed to write output file '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output exists and overwriting is disabled.
    #[error("output file '{path}' already exists and overwrite is disabled")]
    OutputExists { path: PathBuf },

    /// Recognition results do not cover pages `1..=N` exactly once.
    #[error("page results are not contiguous: expected page {expected}, found {found}")]
    PageSequence { expected: usize, found: usize },
}
