//! Helpers for cleaning up raw model responses.

/// Strip a surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
///
/// Text without a leading fence is returned trimmed and otherwise untouched.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    if !text.starts_with("```") {
        return text;
    }
    let Some(newline) = text.find('\n') else {
        return text;
    };
    let body = &text[newline + 1..];
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Truncate `text` to at most `max` bytes on a char boundary, appending `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
