//! Approximate token counts for the `usage` block.
//!
//! This is a heuristic, not a tokenizer. It counts standalone words, standalone
//! digit runs, CJK characters and (for code or JSON) punctuation, then blends
//! that structural estimate with a flat `chars / 4` estimate. The blend is
//! continuous and non-decreasing in both inputs, so repeating a text never
//! lowers its count.

use std::sync::LazyLock;

use regex::Regex;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]{2,}\b").expect("valid word regex"));
static DIGIT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9]+\b").expect("valid digit regex"));
static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid code block regex"));
static JSON_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[^{}]*\}|\[[^\[\]]*\]").expect("valid json-like regex")
});

/// Texts this short always count as one token.
const SHORT_TEXT_CHARS: usize = 5;
const CHARS_PER_TOKEN: f64 = 4.0;
const CJK_CHARS_PER_TOKEN: f64 = 2.0;
const SYMBOLS_PER_TOKEN: f64 = 6.0;
/// Above this ratio of structural to flat estimate, the structural side is damped.
const DAMPING_RATIO: f64 = 1.5;

pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count();
    if chars <= SHORT_TEXT_CHARS {
        return 1;
    }

    let words = word_count(text) as f64;
    let digit_runs = digit_run_count(text) as f64;
    let cjk = text.chars().filter(|c| is_cjk(*c)).count() as f64;

    let mut structural = words + digit_runs + cjk / CJK_CHARS_PER_TOKEN;
    if CODE_BLOCK_RE.is_match(text) || JSON_LIKE_RE.is_match(text) {
        let symbols = text
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace() && !is_cjk(*c))
            .count() as f64;
        structural += symbols / SYMBOLS_PER_TOKEN;
    }

    let flat = chars as f64 / CHARS_PER_TOKEN;
    let blended = if structural <= DAMPING_RATIO * flat {
        0.7 * structural + 0.3 * flat
    } else {
        // Meets the branch above at structural == 1.5 * flat.
        0.5 * structural + 0.6 * flat
    };

    (blended.round() as usize).max(1)
}

/// Letter-only words of two or more characters, bounded on both sides.
fn word_count(text: &str) -> usize {
    WORD_RE.find_iter(text).count()
}

fn digit_run_count(text: &str) -> usize {
    DIGIT_RUN_RE.find_iter(text).count()
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}
