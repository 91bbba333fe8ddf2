//! Remote vision backend: one page image in, recognised text out.
//!
//! [`VisionBackend`] is the narrow contract the recognition client depends
//! on. [`HttpVisionBackend`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint that accepts `data:` image URLs.
//!
//! ## Error classification
//!
//! Every failure is mapped onto a [`RecognitionError`] whose
//! [`disposition`](RecognitionError::disposition) tells the caller what to do:
//!
//! | Failure | Variant | Disposition |
//! |---------|---------|-------------|
//! | HTTP 401 / 403 | `Auth` | permanent |
//! | HTTP 408 / 429 / 5xx, timeout, connection | `Transient` | retry |
//! | other HTTP 4xx | `InvalidRequest` | permanent |
//! | unreadable image, empty or unparsable answer | `PerPage` | fail the page |

use crate::config::PipelineConfig;
use crate::error::{OcrError, PageError, RecognitionError};
use crate::pipeline::encode;
use crate::prompts;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const USER_INSTRUCTION: &str = "Transcribe this page.";
const MAX_DETAIL_CHARS: usize = 300;

/// One page submitted for recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-indexed page ordinal.
    pub page: usize,
    /// Rasterised page image.
    pub image_path: PathBuf,
}

/// A service that turns a page image into text.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Recognise a single page. Called concurrently for different pages.
    async fn recognize_page(&self, request: &PageRequest) -> Result<String, RecognitionError>;
}

/// [`VisionBackend`] for OpenAI-compatible chat completion APIs.
pub struct HttpVisionBackend {
    client: reqwest::Client,
    url: String,
    credential: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for HttpVisionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVisionBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpVisionBackend {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| OcrError::Internal(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: chat_completions_url(&config.endpoint),
            credential: config.credential.clone(),
            model: config.model.as_str().to_string(),
            system_prompt: prompts::system_prompt(config.system_prompt.as_deref()).to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl VisionBackend for HttpVisionBackend {
    async fn recognize_page(&self, request: &PageRequest) -> Result<String, RecognitionError> {
        let image_url = encode::encode_page_file(request.page, &request.image_path).await?;
        let body = build_request(
            &self.model,
            &self.system_prompt,
            &image_url,
            self.temperature,
            self.max_tokens,
        );

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.credential)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let text = resp.text().await.map_err(classify_transport)?;
        let content = parse_response(request.page, &text)?;
        debug!("Page {}: {} chars recognised", request.page, content.len());
        Ok(content)
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(
    model: &'a str,
    system_prompt: &'a str,
    image_url: &'a str,
    temperature: f32,
    max_tokens: u32,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system_prompt),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                    ContentPart::Text {
                        text: USER_INSTRUCTION,
                    },
                ]),
            },
        ],
        temperature,
        max_tokens,
    }
}

/// `{endpoint}/chat/completions`, tolerating a trailing slash or a full URL.
pub fn chat_completions_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn parse_response(page: usize, body: &str) -> Result<String, RecognitionError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| PageError::BadResponse {
        page,
        detail: format!("invalid JSON: {e}"),
    })?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(PageError::BadResponse {
            page,
            detail: "empty response".into(),
        }
        .into());
    }
    Ok(content)
}

// ── Classification ───────────────────────────────────────────────────────

/// Map a non-success HTTP status onto a [`RecognitionError`].
pub fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> RecognitionError {
    let detail = error_detail(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RecognitionError::Auth {
            status: status.as_u16(),
            detail,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RecognitionError::Transient {
            detail: format!("HTTP {}: {}", status.as_u16(), detail),
            retry_after_secs: retry_after,
        },
        s if s.is_server_error() => RecognitionError::Transient {
            detail: format!("HTTP {}: {}", status.as_u16(), detail),
            retry_after_secs: retry_after,
        },
        s => RecognitionError::InvalidRequest {
            status: s.as_u16(),
            detail,
        },
    }
}

/// Map a transport-level failure onto a [`RecognitionError`].
///
/// Only a request that could not even be built is treated as permanent;
/// everything else reqwest reports (timeouts, refused connections, resets,
/// truncated bodies) is worth another attempt.
fn classify_transport(err: reqwest::Error) -> RecognitionError {
    if err.is_builder() {
        return RecognitionError::InvalidRequest {
            status: 0,
            detail: err.to_string(),
        };
    }
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    RecognitionError::Transient {
        detail: format!("{kind}: {err}"),
        retry_after_secs: None,
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Human-readable detail from an error body: the OpenAI-style
/// `error.message` when present, otherwise the start of the body.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    if let Ok(env) = serde_json::from_str::<Envelope>(body) {
        return env.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    trimmed.chars().take(MAX_DETAIL_CHARS).collect()
}
