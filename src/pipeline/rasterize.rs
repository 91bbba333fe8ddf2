//! PDF rasterisation: render every page to an image file via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. The whole render runs
//! on the blocking pool so Tokio workers never stall on it.
//!
//! ## File naming
//!
//! Pages are written as `{stem}_page_{NNN}.{ext}`. The ordinal is zero-padded
//! to at least three digits, and wider when the document needs it, so a
//! plain lexicographic sort of the directory listing is page order.
//!
//! The rasteriser never deletes what it writes. The run that asked for the
//! images owns them and calls [`cleanup`] when it is done.

use crate::config::{PageImageFormat, PipelineConfig};
use crate::error::ConversionError;
use crate::pipeline::input;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use pdfium_locate::ToolchainResolver;
use pdfium_render::prelude::PdfRenderConfig;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const JPEG_QUALITY: u8 = 95;

/// Turns a PDF into an ordered list of page image files.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render every page of `pdf_path` into `output_dir` at `dpi`.
    ///
    /// `output_dir` is created recursively if missing. Returns one path per
    /// page, in page order.
    async fn convert(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, ConversionError>;
}

/// [`Rasterizer`] backed by pdfium.
pub struct PdfiumRasterizer {
    resolver: Arc<dyn ToolchainResolver>,
    toolchain_dir: Option<PathBuf>,
    password: Option<String>,
    max_rendered_pixels: u32,
    format: PageImageFormat,
}

impl PdfiumRasterizer {
    pub fn new(resolver: Arc<dyn ToolchainResolver>) -> Self {
        Self {
            resolver,
            toolchain_dir: None,
            password: None,
            max_rendered_pixels: PipelineConfig::default().max_rendered_pixels,
            format: PageImageFormat::default(),
        }
    }

    /// Rasteriser for `config`, using the platform's toolchain resolver.
    ///
    /// Debug builds also probe the source tree for a bundled pdfium.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let source_dir = cfg!(debug_assertions).then(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
        Self {
            resolver: pdfium_locate::platform_resolver(source_dir),
            toolchain_dir: config.toolchain_dir.clone(),
            password: config.password.clone(),
            max_rendered_pixels: config.max_rendered_pixels,
            format: config.image_format,
        }
    }

    /// Use the pdfium in `dir` and skip discovery.
    pub fn with_toolchain_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.toolchain_dir = Some(dir.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_format(mut self, format: PageImageFormat) -> Self {
        self.format = format;
        self
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn convert(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let pdf_path = input::validate_pdf(pdf_path)?;

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ConversionError::OutputDir {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        let job = RenderJob {
            pdf_path,
            output_dir: output_dir.to_path_buf(),
            dpi,
            toolchain_dir: self.toolchain_dir.clone(),
            resolver: Arc::clone(&self.resolver),
            password: self.password.clone(),
            max_rendered_pixels: self.max_rendered_pixels,
            format: self.format,
        };

        tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| ConversionError::TaskFailed(e.to_string()))?
    }
}

/// Everything the blocking render needs, owned so it can cross threads.
struct RenderJob {
    pdf_path: PathBuf,
    output_dir: PathBuf,
    dpi: u32,
    toolchain_dir: Option<PathBuf>,
    resolver: Arc<dyn ToolchainResolver>,
    password: Option<String>,
    max_rendered_pixels: u32,
    format: PageImageFormat,
}

impl RenderJob {
    fn run(self) -> Result<Vec<PathBuf>, ConversionError> {
        let lib_dir = self.toolchain_dir.clone().or_else(|| self.resolver.resolve());
        match &lib_dir {
            Some(dir) => debug!("Binding pdfium from {}", dir.display()),
            None => debug!("Binding system pdfium"),
        }
        let pdfium = pdfium_locate::bind_pdfium(lib_dir.as_deref()).map_err(|e| {
            ConversionError::ToolchainUnavailable {
                detail: e.to_string(),
            }
        })?;

        let password = self.password.as_deref();
        let document = pdfium
            .load_pdf_from_file(&self.pdf_path, password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        ConversionError::WrongPassword {
                            path: self.pdf_path.clone(),
                        }
                    } else {
                        ConversionError::PasswordRequired {
                            path: self.pdf_path.clone(),
                        }
                    }
                } else {
                    ConversionError::CorruptPdf {
                        path: self.pdf_path.clone(),
                        detail: err_str,
                    }
                }
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(ConversionError::CorruptPdf {
                path: self.pdf_path.clone(),
                detail: "document has no pages".into(),
            });
        }
        info!("PDF loaded: {} pages, rendering at {} DPI", total, self.dpi);

        let cap = pixel_cap(self.max_rendered_pixels);
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(cap)
            .set_maximum_height(cap);

        let stem = document_stem(&self.pdf_path);
        let mut paths = Vec::with_capacity(total);

        for (idx, page) in pages.iter().enumerate() {
            let ordinal = idx + 1;
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ConversionError::RasterisationFailed {
                    page: ordinal,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            let path = self
                .output_dir
                .join(page_file_name(&stem, ordinal, total, self.format));
            save_page_image(&image, &path, self.format)?;
            debug!(
                "Rendered page {}/{} → {}x{} px, {}",
                ordinal,
                total,
                image.width(),
                image.height(),
                path.display()
            );
            paths.push(path);
        }

        Ok(paths)
    }
}

fn save_page_image(
    image: &DynamicImage,
    path: &Path,
    format: PageImageFormat,
) -> Result<(), ConversionError> {
    let write_err = |detail: String| ConversionError::ImageWrite {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::create(path).map_err(|e| write_err(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    match format {
        PageImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
        }
        PageImageFormat::Png => image.write_to(&mut writer, ImageFormat::Png),
    }
    .map_err(|e| write_err(e.to_string()))?;
    writer.flush().map_err(|e| write_err(e.to_string()))
}

/// pdfium takes the edge cap as `i32`; larger values saturate.
fn pixel_cap(px: u32) -> i32 {
    i32::try_from(px).unwrap_or(i32::MAX)
}

// ── Naming ───────────────────────────────────────────────────────────────

/// File stem of the document, used to prefix its page images.
pub fn document_stem(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Image file name for page `ordinal` of a `total`-page document.
pub fn page_file_name(stem: &str, ordinal: usize, total: usize, format: PageImageFormat) -> String {
    let width = total.to_string().len().max(3);
    format!(
        "{stem}_page_{ordinal:0width$}.{ext}",
        ext = format.extension()
    )
}

/// Temporary directory for the page images of `pdf_path`.
///
/// Lives next to the document and is named after it, so runs on different
/// documents never share a directory.
pub fn run_temp_dir(pdf_path: &Path) -> PathBuf {
    let parent = pdf_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}_pages", document_stem(pdf_path)))
}

/// Page images of `stem` currently in `dir`, sorted by name (= page order).
pub fn page_images_in(dir: &Path, stem: &str) -> Vec<PathBuf> {
    let prefix = format!("{stem}_page_");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect();
    paths.sort();
    paths
}

// ── Cleanup ──────────────────────────────────────────────────────────────

/// Delete each path, best effort.
///
/// A file that cannot be deleted is logged and reported, and the remaining
/// files are still attempted. Already-missing files are not a problem.
pub fn cleanup(paths: &[PathBuf]) -> Vec<String> {
    let mut warnings = Vec::new();
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to delete temporary file {}: {}", path.display(), e);
                warnings.push(format!(
                    "could not delete temporary file '{}': {}",
                    path.display(),
                    e
                ));
            }
        }
    }
    warnings
}

/// Remove the (hopefully empty) temporary directory.
pub fn remove_temp_dir(dir: &Path) -> Option<String> {
    match std::fs::remove_dir(dir) {
        Ok(()) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to remove temporary directory {}: {}", dir.display(), e);
            Some(format!(
                "could not remove temporary directory '{}': {}",
                dir.display(),
                e
            ))
        }
    }
}
