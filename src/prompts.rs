//! System prompt for page recognition.
//!
//! Callers can override it via [`crate::config::PipelineConfig::system_prompt`];
//! the constant here is used only when no override is provided.

/// Default system prompt sent with every page image.
pub const DEFAULT_OCR_PROMPT: &str = r#"You are an OCR engine. Transcribe the text in the page image exactly as it appears.

Follow these rules precisely:

1. TEXT
   - Preserve ALL text content completely and accurately, in its original language
   - Keep the reading order a human would use for the page
   - Do not translate, summarise or correct the wording

2. STRUCTURE
   - Render headings, lists and emphasis as Markdown
   - Convert tables to GFM pipe tables
   - Render mathematical expressions as LaTeX: $inline$ and $$display$$

3. WHAT TO IGNORE
   - Page numbers and running headers/footers
   - Decorative lines and borders

4. OUTPUT
   - Output ONLY the transcribed content
   - Do NOT wrap the output in code fences
   - Do NOT add commentary or explanations
   - If the page contains no text, output nothing"#;

/// The prompt to send: the override if set, otherwise [`DEFAULT_OCR_PROMPT`].
pub fn system_prompt(override_prompt: Option<&str>) -> &str {
    override_prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_OCR_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_unless_blank() {
        assert_eq!(system_prompt(Some("Read it.")), "Read it.");
        assert_eq!(system_prompt(Some("   ")), DEFAULT_OCR_PROMPT);
        assert_eq!(system_prompt(None), DEFAULT_OCR_PROMPT);
    }

    #[test]
    fn default_prompt_forbids_fences() {
        assert!(DEFAULT_OCR_PROMPT.contains("code fences"));
    }
}
