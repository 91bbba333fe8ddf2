//! Input validation: make sure the source path is a readable PDF.
//!
//! Checking the `%PDF` magic bytes up front turns "pdfium could not parse
//! this" into a precise error, and avoids binding pdfium at all for files
//! that are obviously not documents.

use crate::error::ConversionError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Validate that `path` exists, is readable, and starts with `%PDF`.
pub fn validate_pdf(path: &Path) -> Result<PathBuf, ConversionError> {
    let path = path.to_path_buf();

    if !path.is_file() {
        return Err(ConversionError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConversionError::PermissionDenied { path });
        }
        Err(_) => return Err(ConversionError::FileNotFound { path }),
    };

    let mut magic = Vec::with_capacity(PDF_MAGIC.len());
    file.by_ref()
        .take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .map_err(|e| ConversionError::CorruptPdf {
            path: path.clone(),
            detail: e.to_string(),
        })?;

    if magic.as_slice() != PDF_MAGIC {
        return Err(ConversionError::NotAPdf { path, magic });
    }

    debug!("Validated PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file() {
        let err = validate_pdf(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ConversionError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        let err = validate_pdf(dir.path()).unwrap_err();
        assert!(matches!(err, ConversionError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("fake.pdf");
        std::fs::write(&p, b"GIF89a...").unwrap();
        match validate_pdf(&p).unwrap_err() {
            ConversionError::NotAPdf { magic, .. } => assert_eq!(magic, b"GIF8"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_file() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("tiny.pdf");
        std::fs::write(&p, b"%P").unwrap();
        assert!(matches!(
            validate_pdf(&p).unwrap_err(),
            ConversionError::NotAPdf { .. }
        ));
    }

    #[test]
    fn pdf_magic_accepted() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("ok.pdf");
        std::fs::write(&p, b"%PDF-1.7\n%...").unwrap();
        assert_eq!(validate_pdf(&p).unwrap(), p);
    }
}
