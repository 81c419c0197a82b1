//! Turns raw Gemini CLI stdout into plain assistant text.

/// Substituted when nothing survives sanitization.
pub const EMPTY_OUTPUT_FALLBACK: &str = "I apologize, I couldn't generate a response.";

const DECORATION_CHARS: &[char] = &['-', '_', '=', '*', '~', ' '];

/// Phrases from the CLI's startup tips and session summary.
const BANNER_PHRASES: &[&str] = &[
    "tips for getting",
    "ask questions",
    "/help",
    "interaction summary",
    "session id",
    "wall time",
    "performance",
    "success rate",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Also drop lines mentioning known banner phrases.
    pub strip_banner_phrases: bool,
}

/// Drops blank lines, separator rules and terminal box art, then joins the
/// remaining trimmed lines with single spaces. Never fails; may return "".
pub fn sanitize_output(raw: &str, options: SanitizeOptions) -> String {
    let kept: Vec<&str> = raw
        .split(is_line_break)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_decoration_line(line))
        .filter(|line| !line.chars().any(is_box_char))
        .filter(|line| !(options.strip_banner_phrases && mentions_banner(line)))
        .collect();

    let joined = kept.join(" ");
    let joined = joined.trim();
    // Lines that pass individually may join into one that does not.
    if is_decoration_line(joined) || (options.strip_banner_phrases && mentions_banner(joined)) {
        return String::new();
    }
    joined.to_string()
}

/// [`sanitize_output`], substituting [`EMPTY_OUTPUT_FALLBACK`] for empty results.
pub fn sanitize_or_fallback(raw: &str, options: SanitizeOptions) -> String {
    let cleaned = sanitize_output(raw, options);
    if cleaned.is_empty() {
        EMPTY_OUTPUT_FALLBACK.to_string()
    } else {
        cleaned
    }
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r'
            | '\u{0b}'
            | '\u{0c}'
            | '\u{1c}'
            | '\u{1d}'
            | '\u{1e}'
            | '\u{85}'
            | '\u{2028}'
            | '\u{2029}'
    )
}

fn is_decoration_line(line: &str) -> bool {
    line.chars().count() > 3 && line.chars().all(|c| DECORATION_CHARS.contains(&c))
}

/// Box Drawing, Block Elements and the shading glyphs (U+2500..U+259F).
fn is_box_char(c: char) -> bool {
    ('\u{2500}'..='\u{259f}').contains(&c)
}

fn mentions_banner(line: &str) -> bool {
    let lower = line.to_lowercase();
    BANNER_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
