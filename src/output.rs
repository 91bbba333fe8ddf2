//! Result types: per-page recognition results and the final run report.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Recognised text for one page, or why there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// 1-indexed page ordinal.
    pub page: usize,
    /// Recognised text; empty when the page failed.
    pub text: String,
    /// Attempts made against the service (0 when never dispatched).
    pub attempts: u32,
    /// Set when the page failed.
    pub error: Option<PageError>,
}

impl RecognitionResult {
    pub fn recognized(page: usize, text: String, attempts: u32) -> Self {
        Self {
            page,
            text,
            attempts,
            error: None,
        }
    }

    pub fn failed(page: usize, error: PageError, attempts: u32) -> Self {
        Self {
            page,
            text: String::new(),
            attempts,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Timings and counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Pages produced by rasterisation.
    pub total_pages: usize,
    /// Pages with recognised text.
    pub recognized_pages: usize,
    /// Pages rendered as placeholders.
    pub failed_pages: usize,
    pub rasterize_duration_ms: u64,
    pub recognize_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Final outcome of a pipeline run.
///
/// `success` and `warnings` are separate on purpose: a run that produced its
/// output but could not delete a temporary file is still a success, and a
/// caller never has to inspect `message` to tell the two apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    /// `"succeeded"`, `"succeeded with N pages unrecognized"`, or
    /// `"failed: <cause>"`.
    pub message: String,
    /// Non-fatal problems: unrecognised pages, cleanup failures. Always
    /// present, possibly empty.
    pub warnings: Vec<String>,
    /// Written output, when the run got that far.
    pub output_path: Option<PathBuf>,
    /// Ordinals of pages rendered as placeholders.
    pub unrecognized_pages: Vec<usize>,
    pub stats: RunStats,
}

impl RunReport {
    /// A run that wrote its output.
    pub fn succeeded(
        output_path: PathBuf,
        unrecognized_pages: Vec<usize>,
        mut warnings: Vec<String>,
        stats: RunStats,
    ) -> Self {
        let message = match unrecognized_pages.len() {
            0 => "succeeded".to_string(),
            1 => "succeeded with 1 page unrecognized".to_string(),
            n => format!("succeeded with {n} pages unrecognized"),
        };
        let mut all: Vec<String> = unrecognized_pages
            .iter()
            .map(|p| format!("page {p} unrecognized"))
            .collect();
        all.append(&mut warnings);

        Self {
            success: true,
            message,
            warnings: all,
            output_path: Some(output_path),
            unrecognized_pages,
            stats,
        }
    }

    /// A run that stopped on a fatal error.
    pub fn failed(cause: &crate::error::OcrError, warnings: Vec<String>, stats: RunStats) -> Self {
        Self {
            success: false,
            message: format!("failed: {cause}"),
            warnings,
            output_path: None,
            unrecognized_pages: Vec::new(),
            stats,
        }
    }

    /// Whether every page was recognised and nothing needed a warning.
    pub fn is_clean(&self) -> bool {
        self.success && self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;

    #[test]
    fn full_success_message() {
        let r = RunReport::succeeded("out.md".into(), vec![], vec![], RunStats::default());
        assert!(r.success);
        assert_eq!(r.message, "succeeded");
        assert!(r.is_clean());
    }

    #[test]
    fn partial_success_lists_pages_first() {
        let r = RunReport::succeeded(
            "out.md".into(),
            vec![3],
            vec!["could not delete x.jpg".into()],
            RunStats::default(),
        );
        assert!(r.success);
        assert_eq!(r.message, "succeeded with 1 page unrecognized");
        assert_eq!(r.warnings[0], "page 3 unrecognized");
        assert_eq!(r.warnings.len(), 2);
        assert!(!r.is_clean());
    }

    #[test]
    fn plural_message() {
        let r = RunReport::succeeded("o.md".into(), vec![1, 4], vec![], RunStats::default());
        assert_eq!(r.message, "succeeded with 2 pages unrecognized");
    }

    #[test]
    fn failure_message_carries_cause() {
        let r = RunReport::failed(&OcrError::Cancelled, vec![], RunStats::default());
        assert!(!r.success);
        assert_eq!(r.message, "failed: run cancelled");
        assert!(r.output_path.is_none());
    }
}
