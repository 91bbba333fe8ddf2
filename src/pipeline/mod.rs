//! Pipeline stages for PDF-to-text recognition.
//!
//! Each submodule implements exactly one step, so each can be tested alone
//! and swapped out (a different renderer, a different service) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ encode ──▶ vision ──▶ recognize ──▶ clean ──▶ assemble
//! (%PDF)    (pdfium)      (base64)   (HTTP)     (retry, order)  (rules)  (Markdown)
//! ```
//!
//! 1. [`input`]     checks the path exists and starts with `%PDF`
//! 2. [`rasterize`] renders every page to an image file; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]    wraps a page image in a base64 `data:` URL
//! 4. [`vision`]    one chat-completions call per page, with error
//!    classification
//! 5. [`recognize`] bounded concurrency, retry/backoff, page ordering
//! 6. [`clean`]     deterministic text clean-up rules
//! 7. [`assemble`]  ordered merge with separators and placeholders, atomic
//!    write

pub mod assemble;
pub mod clean;
pub mod encode;
pub mod input;
pub mod rasterize;
pub mod recognize;
pub mod vision;
