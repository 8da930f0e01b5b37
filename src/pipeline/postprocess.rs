//! Post-processing: deterministic cleanup of emitted Markdown.
//!
//! Text pulled out of PDF content streams carries artefacts that are harmless
//! in the PDF but noisy in Markdown: CR line endings from OCR output, runs of
//! blank lines where layout gaps were, zero-width and soft-hyphen characters,
//! stray control bytes from byte-per-char font decoding, and headings glued
//! to the preceding paragraph.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule sees `\n` only;
//! the final-newline pass runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to emitted Markdown.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip control characters other than `\n` and `\t`
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Ensure heading lines have a blank line before them
/// 6. Collapse 3+ consecutive blank lines down to 1
/// 7. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_control_chars(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = normalise_heading_spacing(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

/// Join a line-wrapped hyphenated word (`exam-` + `ple`) when merging lines
/// of one paragraph.
pub fn join_wrapped(prev: &mut String, next: &str) {
    let next = next.trim();
    if next.is_empty() {
        return;
    }
    if prev.is_empty() {
        prev.push_str(next);
        return;
    }
    let hyphenated = prev.ends_with('-')
        && prev[..prev.len() - 1]
            .chars()
            .last()
            .is_some_and(char::is_alphabetic)
        && next.chars().next().is_some_and(char::is_lowercase);
    if hyphenated {
        prev.pop();
    } else if !prev.ends_with(' ') {
        prev.push(' ');
    }
    prev.push_str(next);
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip control characters ─────────────────────────────────────────

fn remove_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} \S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if RE_HEADING.is_match(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_control_chars() {
        assert_eq!(remove_control_chars("a\u{0001}b\tc\n"), "ab\tc\n");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("he\u{200B}llo\u{00AD}"), "hello");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace("a  \nb\t"), "a\nb");
    }

    #[test]
    fn test_heading_spacing() {
        let out = normalise_heading_spacing("para\n# Title\nbody");
        assert_eq!(out, "para\n\n# Title\nbody\n");
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        let out = normalise_heading_spacing("para\n#hashtag");
        assert_eq!(out, "para\n#hashtag\n");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("abc\n\n\n"), "abc\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_join_wrapped_hyphenation() {
        let mut s = String::from("exam-");
        join_wrapped(&mut s, "ple text");
        assert_eq!(s, "example text");
    }

    #[test]
    fn test_join_wrapped_keeps_real_dash() {
        let mut s = String::from("2019-");
        join_wrapped(&mut s, "2020");
        assert_eq!(s, "2019- 2020");

        let mut s = String::from("self-");
        join_wrapped(&mut s, "Contained");
        assert_eq!(s, "self- Contained");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "# Title\r\nintro  \r\n\r\n\r\n\r\n## Part\u{200B}\r\ntext";
        let out = clean_markdown(input);
        assert_eq!(out, "# Title\nintro\n\n## Part\ntext\n");
    }
}
