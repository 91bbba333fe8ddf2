//! Configuration types for a pipeline run.
//!
//! Every knob lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. A run clones the config once at start and never
//! mutates it, so the same config can be shared across workers.

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default OpenAI-compatible endpoint (DashScope compatible mode).
pub const DEFAULT_ENDPOINT: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Configuration for one PDF → text conversion.
///
/// # Example
/// ```rust
/// use pdfocr::{PipelineConfig, VisionModel};
///
/// let config = PipelineConfig::builder()
///     .credential("sk-test")
///     .model(VisionModel::QwenVlMax)
///     .dpi(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// API credential sent as a bearer token. Required.
    pub credential: String,

    /// Vision model used for recognition. Default: `qwen-vl-plus-0809`.
    pub model: VisionModel,

    /// Base URL of the OpenAI-compatible API. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Rasterisation resolution. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 5000.
    ///
    /// A 300-DPI render of an A0 poster would be ~10 000 × 14 000 px; the cap
    /// scales such pages down while leaving ordinary pages at full DPI.
    pub max_rendered_pixels: u32,

    /// Format of the temporary page images. Default: JPEG.
    pub image_format: PageImageFormat,

    /// Pages recognised at the same time. Default: 4.
    pub concurrency: usize,

    /// Retries per page after a transient service error. Default: 3.
    pub max_retries: u32,

    /// Initial backoff in milliseconds; doubles after each retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout for one recognition request, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_OCR_PROMPT`].
    pub system_prompt: Option<String>,

    /// Marker placed between pages in the output. Default: HTML comment.
    pub page_separator: PageSeparator,

    /// Prepend YAML front matter (source, pages, model). Default: false.
    pub include_front_matter: bool,

    /// Run the text clean-up rules on recognised pages. Default: true.
    pub clean_output: bool,

    /// Replace an existing output file. Default: true.
    pub overwrite: bool,

    /// Directory holding the pdfium library; skips toolchain discovery.
    pub toolchain_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            model: VisionModel::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            dpi: 300,
            max_rendered_pixels: 5000,
            image_format: PageImageFormat::default(),
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            temperature: 0.1,
            max_tokens: 4096,
            password: None,
            system_prompt: None,
            page_separator: PageSeparator::default(),
            include_front_matter: false,
            clean_output: true,
            overwrite: true,
            toolchain_dir: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("credential", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("image_format", &self.image_format)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("page_separator", &self.page_separator)
            .field("overwrite", &self.overwrite)
            .field("toolchain_dir", &self.toolchain_dir)
            .finish_non_exhaustive()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.config.credential = credential.into();
        self
    }

    pub fn model(mut self, model: VisionModel) -> Self {
        self.config.model = model;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_format(mut self, format: PageImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_front_matter(mut self, v: bool) -> Self {
        self.config.include_front_matter = v;
        self
    }

    pub fn clean_output(mut self, v: bool) -> Self {
        self.config.clean_output = v;
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn toolchain_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.toolchain_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrError> {
        let c = &self.config;
        if c.credential.trim().is_empty() {
            return Err(OcrError::InvalidConfig("an API credential is required".into()));
        }
        if !(72..=600).contains(&c.dpi) {
            return Err(OcrError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(OcrError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.endpoint.trim().is_empty() {
            return Err(OcrError::InvalidConfig("endpoint must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Vision model used for recognition.
///
/// The named variants are the models the tool is tuned for; any other model
/// served by the endpoint can be used through [`VisionModel::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum VisionModel {
    /// `qwen-vl-plus-0809` (default).
    #[default]
    QwenVlPlus,
    /// `qwen-vl-max-0809`.
    QwenVlMax,
    /// Any other model identifier.
    Custom(String),
}

impl VisionModel {
    /// The named models, in menu order.
    pub const KNOWN: [VisionModel; 2] = [VisionModel::QwenVlPlus, VisionModel::QwenVlMax];

    /// Identifier sent to the API.
    pub fn as_str(&self) -> &str {
        match self {
            VisionModel::QwenVlPlus => "qwen-vl-plus-0809",
            VisionModel::QwenVlMax => "qwen-vl-max-0809",
            VisionModel::Custom(id) => id,
        }
    }
}

impl fmt::Display for VisionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisionModel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(Self::KNOWN
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .unwrap_or_else(|| VisionModel::Custom(s.to_string())))
    }
}

impl From<String> for VisionModel {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(model) => model,
            Err(never) => match never {},
        }
    }
}

impl From<VisionModel> for String {
    fn from(model: VisionModel) -> Self {
        model.as_str().to_string()
    }
}

/// Image format of the temporary page files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageImageFormat {
    /// JPEG at quality 95 (default). Small uploads, no visible loss at 300 DPI.
    #[default]
    Jpeg,
    /// Lossless PNG.
    Png,
}

impl PageImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PageImageFormat::Jpeg => "jpg",
            PageImageFormat::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            PageImageFormat::Jpeg => "image/jpeg",
            PageImageFormat::Png => "image/png",
        }
    }
}

/// Marker placed between consecutive pages in the assembled output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// HTML comment naming the page that follows: `<!-- page N -->` (default).
    #[default]
    Comment,
    /// Horizontal rule: `---`.
    HorizontalRule,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before page `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
