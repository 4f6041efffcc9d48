//! Small helpers for fixed-capacity strings.

use heapless::String;

/// Copy as much of `value` as fits into a `String<N>`, never splitting a character.
#[must_use]
pub fn truncated<const N: usize>(value: &str) -> String<N> {
    let mut out = String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// HTML-escape `value` into a `String<N>`, dropping whatever does not fit.
#[must_use]
pub fn escape_html<const N: usize>(value: &str) -> String<N> {
    let mut escaped = String::<N>::new();
    for ch in value.chars() {
        let pushed = match html_entity(ch) {
            Some(entity) => escaped.push_str(entity),
            None => escaped.push(ch),
        };
        if pushed.is_err() {
            break;
        }
    }
    escaped
}

/// The HTML entity standing in for `ch`, if it must be escaped.
#[must_use]
pub const fn html_entity(ch: char) -> Option<&'static str> {
    match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&#39;"),
        _ => None,
    }
}
