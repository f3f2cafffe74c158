//! Paren-depth scan used to merge independently compiled text fragments.
//!
//! A fragment's top-level sub-expressions are the spans where the paren
//! depth leaves zero and returns to it. Merging flattens sub-expressions of
//! every input that already use the target operator and joins the result
//! with that operator, wrapping the join in one outer pair only when it has
//! more than one member.

use crate::entry::GroupOp;

/// Top-level structure of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevel<'a> {
    /// Top-level sub-expressions, each a balanced paren group. A fragment
    /// that could not be split is its own single part.
    pub parts: Vec<&'a str>,
    /// Keyword joining the parts, when there is more than one.
    pub joiner: Option<GroupOp>,
    /// Whether the parts were found inside one enclosing paren pair.
    pub wrapped: bool,
    /// Whether the fragment is not a sequence of paren groups at all.
    pub opaque: bool,
}

fn keyword(gap: &str) -> Option<GroupOp> {
    match gap.trim() {
        k if k.eq_ignore_ascii_case("AND") => Some(GroupOp::And),
        k if k.eq_ignore_ascii_case("OR") => Some(GroupOp::Or),
        _ => None,
    }
}

/// Scan a run of paren groups joined by one consistent keyword. Returns
/// `None` for anything else.
fn scan(text: &str) -> Option<(Vec<&str>, Option<GroupOp>)> {
    let mut parts = Vec::new();
    let mut joiner = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut gap_start = 0usize;

    for (i, c) in text.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    let gap = &text[gap_start..i];
                    if parts.is_empty() {
                        if !gap.trim().is_empty() {
                            return None;
                        }
                    } else {
                        let op = keyword(gap)?;
                        if joiner.is_some_and(|j| j != op) {
                            return None;
                        }
                        joiner = Some(op);
                    }
                    start = i;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    parts.push(&text[start..=i]);
                    gap_start = i + 1;
                }
            }
            _ => {}
        }
    }

    if depth != 0 || parts.is_empty() || !text[gap_start..].trim().is_empty() {
        return None;
    }
    Some((parts, joiner))
}

/// Split a fragment into its top-level sub-expressions.
///
/// A fragment enclosed in one paren pair is looked into, so `(A AND B)`
/// splits into `[A, B]` while `(x = 1)` stays whole.
pub fn split_top_level(fragment: &str) -> TopLevel<'_> {
    let text = fragment.trim();
    match scan(text) {
        Some((parts, _)) if parts.len() == 1 => {
            let inner = &text[1..text.len() - 1];
            match scan(inner) {
                Some((inner_parts, Some(joiner))) if inner_parts.len() > 1 => TopLevel {
                    parts: inner_parts,
                    joiner: Some(joiner),
                    wrapped: true,
                    opaque: false,
                },
                _ => TopLevel {
                    parts: vec![text],
                    joiner: None,
                    wrapped: false,
                    opaque: false,
                },
            }
        }
        Some((parts, joiner)) => TopLevel {
            parts,
            joiner,
            wrapped: false,
            opaque: false,
        },
        None => TopLevel {
            parts: vec![text],
            joiner: None,
            wrapped: false,
            opaque: true,
        },
    }
}

/// Merge fragments under one operator.
///
/// Empty fragments contribute nothing. Returns an empty string when nothing
/// remains, the lone sub-expression unwrapped when one remains, and
/// `(a OP b ...)` otherwise.
pub fn group_fragments<S: AsRef<str>>(fragments: &[S], op: GroupOp) -> String {
    let mut members: Vec<String> = Vec::new();

    for fragment in fragments {
        let fragment = fragment.as_ref().trim();
        if fragment.is_empty() {
            continue;
        }
        let split = split_top_level(fragment);
        if split.opaque {
            members.push(format!("({fragment})"));
        } else if split.parts.len() == 1 || split.joiner == Some(op) {
            members.extend(split.parts.iter().map(|p| p.to_string()));
        } else if split.wrapped {
            members.push(fragment.to_string());
        } else {
            members.push(format!("({fragment})"));
        }
    }

    match members.len() {
        0 => String::new(),
        1 => members.swap_remove(0),
        _ => format!("({})", members.join(&format!(" {} ", op.keyword()))),
    }
}

/// Whether paren depth returns to zero exactly once, at the end of the text.
pub fn is_single_group(text: &str) -> bool {
    let mut depth = 0usize;
    let mut closes = 0usize;
    let mut last_close = None;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                let Some(next) = depth.checked_sub(1) else {
                    return false;
                };
                depth = next;
                if depth == 0 {
                    closes += 1;
                    last_close = Some(i);
                }
            }
            _ if depth == 0 => return false,
            _ => {}
        }
    }
    depth == 0 && closes == 1 && last_close.is_some_and(|i| i + 1 == text.len())
}
