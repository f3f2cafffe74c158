//! Literal escaping for the text dialects.
//!
//! Literal parentheses are replaced by private-use placeholders while
//! fragments are assembled, so the paren-depth scan in
//! [`super::grouping`] only ever sees structural parentheses. Placeholders
//! are restored once the final text is produced.

use crate::filter::PatternSyntax;

const OPEN_PLACEHOLDER: char = '\u{E000}';
const CLOSE_PLACEHOLDER: char = '\u{E001}';

/// Replace literal parentheses with placeholders.
pub fn shield_parens(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '(' => OPEN_PLACEHOLDER,
            ')' => CLOSE_PLACEHOLDER,
            other => other,
        })
        .collect()
}

/// Undo [`shield_parens`].
pub fn restore_parens(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            OPEN_PLACEHOLDER => '(',
            CLOSE_PLACEHOLDER => ')',
            other => other,
        })
        .collect()
}

/// Single-quoted string literal with embedded quotes doubled and
/// parentheses shielded.
pub fn quote(text: &str) -> String {
    format!("'{}'", shield_parens(&text.replace('\'', "''")))
}

/// Like pattern rewritten to `%`/`_` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern {
    pub text: String,
    /// Whether the translated text holds any `%` or `_`.
    pub has_wildcard: bool,
}

/// Translate a stored like pattern to the SQL-style wildcard alphabet.
///
/// The escape character makes the following character literal; a trailing
/// escape character is kept as-is. A `%` or `_` already in the stored
/// pattern is passed through and matches as a backend wildcard, so it also
/// counts towards `has_wildcard`.
pub fn translate_like(pattern: &str, syntax: &PatternSyntax) -> LikePattern {
    let mut text = String::with_capacity(pattern.len());
    let mut escaped = false;

    for c in pattern.chars() {
        if escaped {
            text.push(c);
            escaped = false;
        } else if c == syntax.escape_char {
            escaped = true;
        } else if c == syntax.wild_card {
            text.push('%');
        } else if c == syntax.single_char {
            text.push('_');
        } else {
            text.push(c);
        }
    }
    if escaped {
        text.push(syntax.escape_char);
    }
    let has_wildcard = text.contains(['%', '_']);

    LikePattern { text, has_wildcard }
}

/// Escape text for XML element content and attribute values.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
