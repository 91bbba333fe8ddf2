//! Deterministic clean-up of recognised page text.
//!
//! Vision models occasionally wrap their answer in a code fence or mix line
//! endings even when told not to. These rules fix such quirks without
//! touching the content itself.
//!
//! Order matters: fences are stripped before line endings are normalised so
//! the fence regex sees the raw answer, and blank-line collapsing runs after
//! trailing whitespace is gone so whitespace-only lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every clean-up rule to one page of recognised text.
///
/// The result has no leading or trailing blank lines; the assembler owns
/// spacing between pages.
pub fn clean_page_text(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|text)?[ \t]*\r?\n(.*?)\r?\n```\s*$")
        .expect("fence regex is valid")
});

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n{3,}").expect("blank-line regex is valid")
});

/// At most one empty line in a row.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_outer_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_outer_fences("```\nplain\n```\n"), "plain");
    }

    #[test]
    fn inner_code_blocks_survive() {
        let input = "Intro\n```rust\nfn main() {}\n```\nOutro";
        assert_eq!(strip_outer_fences(input), input);
    }

    #[test]
    fn line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn invisible_chars() {
        assert_eq!(
            remove_invisible_chars("hello\u{200B}world\u{FEFF}foo\u{00AD}bar"),
            "helloworldfoobar"
        );
    }

    #[test]
    fn blank_runs_collapse_to_one_empty_line() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn full_clean() {
        let input = "```markdown\r\n# Title  \r\n\r\n\r\n   \r\n\r\nBody\u{200B} text \r\n```";
        assert_eq!(clean_page_text(input), "# Title\n\nBody text");
    }

    #[test]
    fn clean_is_idempotent() {
        let once = clean_page_text("```\n\n\nText\n\n\n\nMore   \n```");
        assert_eq!(clean_page_text(&once), once);
    }
}
