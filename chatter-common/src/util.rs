//! String helpers shared by chatter crates.

/// Take at most `max_chars` characters from the start of `s`.
///
/// Works on character boundaries, so multi-byte text (emoji, CJK) is never split.
pub fn take_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Collapse line breaks into single spaces for one-line previews.
pub fn flatten_lines(s: &str) -> String {
    s.replace("\r\n", " ").replace('\n', " ")
}
