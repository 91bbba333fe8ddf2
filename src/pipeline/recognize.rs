//! Recognition client: drive a [`VisionBackend`] over every page image.
//!
//! ## Concurrency
//!
//! Pages are dispatched through `buffer_unordered(concurrency)`, so results
//! arrive in completion order. They are sorted by ordinal before being
//! returned; nothing downstream relies on call order.
//!
//! ## Retry strategy
//!
//! Each backend error carries a [`Disposition`]:
//!
//! * `Transient`: sleep `retry_backoff_ms * 2^(attempt-1)` (capped at 30 s,
//!   or the server's `Retry-After` when that is longer) and try again, up to
//!   `max_retries` times. With 500 ms base and 3 retries the waits are
//!   500 ms → 1 s → 2 s.
//! * `PerItem`: the page fails, the others carry on.
//! * `Permanent`: no retry and no further dispatch. Pages already in flight
//!   are awaited, then the error is returned and ends the run.

use crate::config::PipelineConfig;
use crate::error::{Disposition, PageError, RecognitionError};
use crate::output::RecognitionResult;
use crate::pipeline::clean;
use crate::pipeline::vision::{PageRequest, VisionBackend};
use crate::progress::CancelToken;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_BACKOFF_MS: u64 = 30_000;
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Submits page images to a [`VisionBackend`] with retry and bounded
/// concurrency. Holds no state between calls.
pub struct RecognitionClient {
    backend: Arc<dyn VisionBackend>,
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    clean_output: bool,
}

impl RecognitionClient {
    pub fn new(backend: Arc<dyn VisionBackend>) -> Self {
        Self::from_config(backend, &PipelineConfig::default())
    }

    pub fn from_config(backend: Arc<dyn VisionBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            clean_output: config.clean_output,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_clean_output(mut self, v: bool) -> Self {
        self.clean_output = v;
        self
    }

    /// Recognise every image, returning one result per path in page order.
    ///
    /// `image_paths[i]` is page `i + 1`. `on_page(done, total, result)` is
    /// called as each page finishes, in completion order.
    ///
    /// # Errors
    /// Only a permanent backend failure (bad credential, rejected request)
    /// is returned as `Err`. Every other failure is recorded on its page.
    pub async fn recognize<F>(
        &self,
        image_paths: &[PathBuf],
        cancel: &CancelToken,
        mut on_page: F,
    ) -> Result<Vec<RecognitionResult>, RecognitionError>
    where
        F: FnMut(usize, usize, &RecognitionResult) + Send,
    {
        let total = image_paths.len();
        info!(
            "Recognising {} pages (concurrency {})",
            total, self.concurrency
        );

        // Set by the first permanent failure: nothing new is dispatched, but
        // calls already in flight are awaited.
        let halted = AtomicBool::new(false);
        let halted = &halted;

        let mut pending = stream::iter(image_paths.to_vec().into_iter().enumerate())
            .map(move |(idx, path)| {
                let page = idx + 1;
                async move {
                    if cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
                        debug!("Page {}: not dispatched", page);
                        return Ok(RecognitionResult::failed(
                            page,
                            PageError::Cancelled { page },
                            0,
                        ));
                    }
                    self.recognize_one(page, path).await
                }
            })
            .buffer_unordered(self.concurrency);

        let mut results = Vec::with_capacity(total);
        let mut fatal: Option<RecognitionError> = None;
        while let Some(outcome) = pending.next().await {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    if fatal.is_none() {
                        warn!("Stopping dispatch after permanent failure: {}", e);
                        halted.store(true, Ordering::SeqCst);
                        fatal = Some(e);
                    }
                    continue;
                }
            };
            if let Some(err) = &result.error {
                warn!("{}", err);
            }
            on_page(results.len() + 1, total, &result);
            results.push(result);
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        results.sort_by_key(|r| r.page);
        let ok = results.iter().filter(|r| r.is_success()).count();
        info!("Recognition finished: {}/{} pages recognised", ok, total);
        Ok(results)
    }

    async fn recognize_one(
        &self,
        page: usize,
        image_path: PathBuf,
    ) -> Result<RecognitionResult, RecognitionError> {
        let request = PageRequest { page, image_path };
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.backend.recognize_page(&request).await {
                Ok(text) => return Ok(self.finish_page(page, text, attempt)),
                Err(e) => e,
            };

            match err.disposition() {
                Disposition::Permanent => {
                    warn!("Page {}: permanent failure: {}", page, err);
                    return Err(err);
                }
                Disposition::PerItem => {
                    let page_err = match err {
                        RecognitionError::PerPage(pe) => pe,
                        other => PageError::BadResponse {
                            page,
                            detail: other.to_string(),
                        },
                    };
                    return Ok(RecognitionResult::failed(page, page_err, attempt));
                }
                Disposition::Transient => {
                    if attempt > self.max_retries {
                        return Ok(RecognitionResult::failed(
                            page,
                            PageError::RetriesExhausted {
                                page,
                                attempts: attempt,
                                detail: err.to_string(),
                            },
                            attempt,
                        ));
                    }
                    let retry_after = match &err {
                        RecognitionError::Transient {
                            retry_after_secs, ..
                        } => *retry_after_secs,
                        _ => None,
                    };
                    let delay = backoff_delay(self.retry_backoff_ms, attempt, retry_after);
                    warn!(
                        "Page {}: retry {}/{} after {}ms ({})",
                        page,
                        attempt,
                        self.max_retries,
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn finish_page(&self, page: usize, text: String, attempts: u32) -> RecognitionResult {
        let text = if self.clean_output {
            clean::clean_page_text(&text)
        } else {
            text
        };
        if text.trim().is_empty() {
            return RecognitionResult::failed(
                page,
                PageError::BadResponse {
                    page,
                    detail: "no text left after clean-up".into(),
                },
                attempts,
            );
        }
        RecognitionResult::recognized(page, text, attempts)
    }
}

/// Wait before retry number `attempt` (1-based).
pub fn backoff_delay(base_ms: u64, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let exp_ms = base_ms.saturating_mul(1u64 << shift).min(MAX_BACKOFF_MS);
    let server_ms = retry_after_secs
        .filter(|s| *s <= MAX_RETRY_AFTER_SECS)
        .map(|s| s * 1000)
        .unwrap_or(0);
    Duration::from_millis(exp_ms.max(server_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Script = dyn Fn(usize, u32) -> Result<String, RecognitionError> + Send + Sync;

    /// Backend whose answer depends on (page, attempt).
    struct ScriptedBackend {
        script: Box<Script>,
        attempts: Mutex<HashMap<usize, u32>>,
        calls: AtomicUsize,
        delay_for: fn(usize) -> u64,
    }

    impl ScriptedBackend {
        fn new(script: impl Fn(usize, u32) -> Result<String, RecognitionError> + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                attempts: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                delay_for: |_| 0,
            }
        }

        fn with_delay(mut self, delay_for: fn(usize) -> u64) -> Self {
            self.delay_for = delay_for;
            self
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        async fn recognize_page(&self, request: &PageRequest) -> Result<String, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let attempt = {
                let mut map = self.attempts.lock().unwrap();
                let n = map.entry(request.page).or_insert(0);
                *n += 1;
                *n
            };
            let delay = (self.delay_for)(request.page);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            (self.script)(request.page, attempt)
        }
    }

    fn paths(n: usize) -> Vec<PathBuf> {
        (1..=n).map(|p| PathBuf::from(format!("doc_page_{p:03}.jpg"))).collect()
    }

    fn client(backend: Arc<ScriptedBackend>) -> RecognitionClient {
        RecognitionClient::new(backend).with_retries(3, 1)
    }

    #[tokio::test]
    async fn results_are_in_page_order_despite_completion_order() {
        // Later pages finish first.
        let backend = Arc::new(
            ScriptedBackend::new(|page, _| Ok(format!("text {page}")))
                .with_delay(|page| (7 - page as u64) * 15),
        );
        let mut completion = Vec::new();
        let results = client(backend)
            .with_concurrency(6)
            .recognize(&paths(6), &CancelToken::new(), |_, _, r| completion.push(r.page))
            .await
            .unwrap();

        let pages: Vec<usize> = results.iter().map(|r| r.page).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(results[3].text, "text 4");
        assert_ne!(completion, pages, "completion order should differ");
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let backend = Arc::new(ScriptedBackend::new(|page, attempt| {
            if page == 2 && attempt < 3 {
                Err(RecognitionError::Transient {
                    detail: "HTTP 503".into(),
                    retry_after_secs: None,
                })
            } else {
                Ok(format!("page {page}"))
            }
        }));
        let results = client(backend.clone())
            .recognize(&paths(3), &CancelToken::new(), |_, _, _| {})
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(results[1].attempts, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| {
            Err(RecognitionError::Transient {
                detail: "timeout".into(),
                retry_after_secs: None,
            })
        }));
        let results = RecognitionClient::new(backend.clone())
            .with_retries(2, 1)
            .recognize(&paths(1), &CancelToken::new(), |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(
            results[0].error,
            Some(PageError::RetriesExhausted {
                page: 1,
                attempts: 3,
                detail: "transient OCR service error: timeout".into(),
            })
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_page_failure_is_isolated() {
        let backend = Arc::new(ScriptedBackend::new(|page, _| {
            if page == 3 {
                Err(PageError::BadResponse {
                    page,
                    detail: "empty response".into(),
                }
                .into())
            } else {
                Ok(format!("page {page}"))
            }
        }));
        let results = client(backend.clone())
            .recognize(&paths(5), &CancelToken::new(), |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        assert!(!results[2].is_success());
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 4);
        // Per-page failures are not retried.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn auth_failure_stops_dispatch() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| {
            Err(RecognitionError::Auth {
                status: 401,
                detail: "bad key".into(),
            })
        }));
        let err = client(backend.clone())
            .with_concurrency(1)
            .recognize(&paths(4), &CancelToken::new(), |_, _, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, RecognitionError::Auth { status: 401, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inflight_pages_finish_after_permanent_failure() {
        // Page 1 is rejected quickly while page 2 is still being recognised.
        let backend = Arc::new(
            ScriptedBackend::new(|page, _| {
                if page == 1 {
                    Err(RecognitionError::Auth {
                        status: 401,
                        detail: "bad key".into(),
                    })
                } else {
                    Ok(format!("page {page}"))
                }
            })
            .with_delay(|page| if page == 1 { 20 } else { 200 }),
        );
        let mut finished = Vec::new();
        let err = client(backend.clone())
            .with_concurrency(2)
            .recognize(&paths(4), &CancelToken::new(), |_, _, r| {
                if r.is_success() {
                    finished.push(r.page)
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RecognitionError::Auth { .. }));
        assert_eq!(finished, vec![2], "page 2 was awaited");
        // Pages 3 and 4 were never sent.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_pages_are_not_dispatched() {
        let backend = Arc::new(ScriptedBackend::new(|page, _| Ok(format!("page {page}"))));
        let cancel = CancelToken::new();
        cancel.cancel();
        let results = client(backend.clone())
            .recognize(&paths(3), &cancel, |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(results
            .iter()
            .all(|r| matches!(r.error, Some(PageError::Cancelled { .. }))));
    }

    #[tokio::test]
    async fn progress_callback_counts_up() {
        let backend = Arc::new(ScriptedBackend::new(|page, _| Ok(format!("page {page}"))));
        let mut seen = Vec::new();
        client(backend)
            .recognize(&paths(4), &CancelToken::new(), |done, total, _| seen.push((done, total)))
            .await
            .unwrap();
        assert_eq!(seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[tokio::test]
    async fn answers_are_cleaned_when_enabled() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| Ok("```markdown\nHello  \n```".into())));
        let cleaned = client(backend.clone())
            .recognize(&paths(1), &CancelToken::new(), |_, _, _| {})
            .await
            .unwrap();
        assert_eq!(cleaned[0].text, "Hello");

        let raw = client(backend)
            .with_clean_output(false)
            .recognize(&paths(1), &CancelToken::new(), |_, _, _| {})
            .await
            .unwrap();
        assert_eq!(raw[0].text, "```markdown\nHello  \n```");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(500, 1, None), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2, None), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3, None), Duration::from_millis(2000));
        assert_eq!(backoff_delay(500, 40, None), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn backoff_honours_retry_after() {
        assert_eq!(backoff_delay(500, 1, Some(5)), Duration::from_secs(5));
        assert_eq!(backoff_delay(500, 1, Some(3600)), Duration::from_millis(500));
    }
}
