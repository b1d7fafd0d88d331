//! Draft compilation and optimization windowing.

use std::collections::BTreeMap;

use crate::error::CompilationError;
use crate::parse::{placeholder_re, placeholder_tokens, WRITE_ITEMS_MARKER};

/// Default optimization window, in characters.
pub const DEFAULT_WINDOW_CHARS: usize = 1500;

/// Substitute every `{name}` in `template` with its paragraph.
///
/// Substitution is a single pass, so braces inside paragraph text are left
/// alone. All missing names are reported together. The result has leftover
/// `撰写内容包括：` markers removed and runs of blank lines collapsed.
pub fn compile_draft(
    template: &str,
    paragraphs: &BTreeMap<String, String>,
) -> Result<String, CompilationError> {
    let missing: Vec<String> = placeholder_tokens(template)
        .into_iter()
        .filter(|name| !paragraphs.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(CompilationError::MissingParagraphs(missing));
    }

    let substituted = placeholder_re().replace_all(template, |caps: &regex::Captures| {
        let name = caps[1].trim();
        paragraphs.get(name).cloned().unwrap_or_default()
    });

    Ok(tidy(&substituted.replace(WRITE_ITEMS_MARKER, "")))
}

/// Trim trailing whitespace per line and collapse blank-line runs to one.
fn tidy(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = false;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !blank_run && !out.is_empty() {
                out.push("");
            }
            blank_run = true;
        } else {
            out.push(line);
            blank_run = false;
        }
    }
    while out.last() == Some(&"") {
        out.pop();
    }
    out.join("\n")
}

/// `ceil(chars / window_chars)`.
pub fn window_count(draft: &str, window_chars: usize) -> usize {
    let w = window_chars.max(1);
    draft.chars().count().div_ceil(w)
}

/// Split `draft` into consecutive windows of `window_chars` characters.
///
/// The last window may be shorter; concatenating the windows gives the
/// draft back. An empty draft has no windows.
pub fn partition_windows(draft: &str, window_chars: usize) -> Vec<String> {
    let w = window_chars.max(1);
    let chars: Vec<char> = draft.chars().collect();
    chars.chunks(w).map(|c| c.iter().collect()).collect()
}

/// Window `i` of `draft`, if it exists.
pub fn window_at(draft: &str, window_chars: usize, i: usize) -> Option<String> {
    let w = window_chars.max(1);
    let window: String = draft.chars().skip(i.checked_mul(w)?).take(w).collect();
    if window.is_empty() {
        None
    } else {
        Some(window)
    }
}
