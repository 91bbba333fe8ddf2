//! Result assembly: per-page text → one Markdown document on disk.
//!
//! Pages are written in ordinal order, whatever order they were recognised
//! in. A failed page is rendered as a visible placeholder so a reader of the
//! output alone can tell that something is missing.

use crate::config::{PageSeparator, PipelineConfig};
use crate::error::AssemblyError;
use crate::output::RecognitionResult;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Source-describing header written as YAML front matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub source: String,
    pub model: String,
}

/// Merges recognition results into the output document.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    separator: PageSeparator,
    front_matter: Option<FrontMatter>,
    overwrite: bool,
}

impl Default for ResultAssembler {
    fn default() -> Self {
        Self::new(PageSeparator::default())
    }
}

impl ResultAssembler {
    pub fn new(separator: PageSeparator) -> Self {
        Self {
            separator,
            front_matter: None,
            overwrite: true,
        }
    }

    /// Assembler for a run of `config` over the document at `source`.
    pub fn from_config(config: &PipelineConfig, source: &Path) -> Self {
        let mut assembler = Self::new(config.page_separator.clone()).with_overwrite(config.overwrite);
        if config.include_front_matter {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            assembler = assembler.with_front_matter(FrontMatter {
                source: name,
                model: config.model.as_str().to_string(),
            });
        }
        assembler
    }

    pub fn with_front_matter(mut self, front_matter: FrontMatter) -> Self {
        self.front_matter = Some(front_matter);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Fail early if the destination must not be replaced.
    pub fn check_destination(&self, output_path: &Path) -> Result<(), AssemblyError> {
        if !self.overwrite && output_path.exists() {
            return Err(AssemblyError::OutputExists {
                path: output_path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Render the document text.
    ///
    /// # Errors
    /// [`AssemblyError::PageSequence`] unless the results cover pages
    /// `1..=N` exactly once.
    pub fn render(&self, results: &[RecognitionResult]) -> Result<String, AssemblyError> {
        let mut ordered: Vec<&RecognitionResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.page);

        for (idx, r) in ordered.iter().enumerate() {
            if r.page != idx + 1 {
                return Err(AssemblyError::PageSequence {
                    expected: idx + 1,
                    found: r.page,
                });
            }
        }

        let mut doc = String::new();
        if let Some(fm) = &self.front_matter {
            doc.push_str(&render_front_matter(fm, ordered.len()));
        }

        for (idx, r) in ordered.iter().enumerate() {
            if idx > 0 {
                doc.push_str(&self.separator.render(r.page));
            }
            if r.is_success() {
                doc.push_str(r.text.trim_matches('\n'));
            } else {
                doc.push_str(&placeholder(r.page));
            }
        }

        doc.push('\n');
        Ok(doc)
    }

    /// Render `results` and write them to `output_path`.
    ///
    /// The parent directory is created if missing. The text goes to a
    /// sibling `.tmp` file first and is renamed into place, so an
    /// interrupted write never leaves a half-written output.
    pub async fn assemble(
        &self,
        results: &[RecognitionResult],
        output_path: &Path,
    ) -> Result<(), AssemblyError> {
        let doc = self.render(results)?;
        self.check_destination(output_path)?;

        let write_err = |source: std::io::Error| AssemblyError::WriteFailed {
            path: output_path.to_path_buf(),
            source,
        };

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = temp_path(output_path);
        if let Err(e) = tokio::fs::write(&tmp, doc.as_bytes()).await {
            discard_partial(&tmp).await;
            return Err(write_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, output_path).await {
            discard_partial(&tmp).await;
            return Err(write_err(e));
        }

        debug!("Wrote {} bytes via {}", doc.len(), tmp.display());
        info!("Output written: {}", output_path.display());
        Ok(())
    }
}

/// Marker written in place of a page that could not be recognised.
pub fn placeholder(page: usize) -> String {
    format!("> **[page {page} unrecognized]**")
}

/// Default output location: the source path with a `.md` extension.
pub fn default_output_path(pdf_path: &Path) -> PathBuf {
    pdf_path.with_extension("md")
}

fn temp_path(output_path: &Path) -> PathBuf {
    let mut name: OsString = output_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Best-effort removal of a temporary output after a failed write.
async fn discard_partial(tmp: &Path) {
    match tokio::fs::remove_file(tmp).await {
        Ok(()) => debug!("Removed partial output {}", tmp.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", tmp.display(), e),
    }
}

fn render_front_matter(fm: &FrontMatter, pages: usize) -> String {
    // JSON string literals are valid YAML double-quoted scalars.
    let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "---\nsource: {}\npages: {}\nmodel: {}\n---\n\n",
        quote(&fm.source),
        pages,
        quote(&fm.model)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use tempfile::TempDir;

    fn ok(page: usize) -> RecognitionResult {
        RecognitionResult::recognized(page, format!("Text of page {page}"), 1)
    }

    fn bad(page: usize) -> RecognitionResult {
        RecognitionResult::failed(
            page,
            PageError::BadResponse {
                page,
                detail: "empty".into(),
            },
            1,
        )
    }

    #[test]
    fn order_is_by_ordinal_not_arrival() {
        let asm = ResultAssembler::default();
        let sorted = asm.render(&[ok(1), ok(2), ok(3), ok(4)]).unwrap();
        for perm in [[4, 2, 1, 3], [3, 4, 1, 2], [2, 1, 4, 3]] {
            let shuffled: Vec<_> = perm.iter().map(|&p| ok(p)).collect();
            assert_eq!(asm.render(&shuffled).unwrap(), sorted);
        }
    }

    #[test]
    fn separators_only_between_pages() {
        let doc = ResultAssembler::default().render(&[ok(1), ok(2), ok(3)]).unwrap();
        assert_eq!(
            doc,
            "Text of page 1\n\n<!-- page 2 -->\n\nText of page 2\n\n<!-- page 3 -->\n\nText of page 3\n"
        );
    }

    #[test]
    fn failed_page_gets_placeholder() {
        let doc = ResultAssembler::new(PageSeparator::HorizontalRule)
            .render(&[ok(1), bad(2), ok(3)])
            .unwrap();
        let sections: Vec<&str> = doc.trim_end().split("\n\n---\n\n").collect();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[1], "> **[page 2 unrecognized]**");
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        let asm = ResultAssembler::default();
        assert!(matches!(
            asm.render(&[ok(1), ok(3)]).unwrap_err(),
            AssemblyError::PageSequence { expected: 2, found: 3 }
        ));
        assert!(matches!(
            asm.render(&[ok(1), ok(1)]).unwrap_err(),
            AssemblyError::PageSequence { expected: 2, found: 1 }
        ));
        assert!(asm.render(&[ok(2)]).is_err());
    }

    #[test]
    fn front_matter_is_deterministic() {
        let asm = ResultAssembler::default().with_front_matter(FrontMatter {
            source: "scan \"final\".pdf".into(),
            model: "qwen-vl-max-0809".into(),
        });
        let a = asm.render(&[ok(1)]).unwrap();
        let b = asm.render(&[ok(1)]).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(
            "---\nsource: \"scan \\\"final\\\".pdf\"\npages: 1\nmodel: \"qwen-vl-max-0809\"\n---\n\n"
        ));
    }

    #[test]
    fn default_output_replaces_extension() {
        assert_eq!(
            default_output_path(Path::new("/tmp/report.pdf")),
            PathBuf::from("/tmp/report.md")
        );
    }

    #[tokio::test]
    async fn writes_creates_parent_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("deeper").join("out.md");

        ResultAssembler::default()
            .assemble(&[ok(1), ok(2)], &out)
            .await
            .unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("Text of page 2"));
        assert!(!temp_path(&out).exists());
    }

    #[tokio::test]
    async fn overwrite_policy() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.md");
        std::fs::write(&out, "old").unwrap();

        let err = ResultAssembler::default()
            .with_overwrite(false)
            .assemble(&[ok(1)], &out)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::OutputExists { .. }));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "old");

        ResultAssembler::default()
            .assemble(&[ok(1)], &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "Text of page 1\n");
    }

    #[tokio::test]
    async fn unwritable_destination_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let out = blocker.join("out.md");

        let err = ResultAssembler::default()
            .assemble(&[ok(1)], &out)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::WriteFailed { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let out = dir.path().join("out.md");
        std::fs::create_dir(&out).unwrap();
        std::fs::write(out.join("keep.txt"), "x").unwrap();

        let err = ResultAssembler::default()
            .assemble(&[ok(1)], &out)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::WriteFailed { .. }), "got: {err:?}");
        assert!(!temp_path(&out).exists());
    }

    #[tokio::test]
    async fn partial_output_is_discarded() {
        let dir = TempDir::new().unwrap();
        let tmp = temp_path(&dir.path().join("out.md"));
        std::fs::write(&tmp, "half a docu").unwrap();

        discard_partial(&tmp).await;
        assert!(!tmp.exists());
        // Already gone is fine.
        discard_partial(&tmp).await;
    }
}
