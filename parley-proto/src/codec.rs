//! `TAG:field:field` line codec and base64 field helpers.

use std::borrow::Cow;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// A line split into its tag text and raw payload.
///
/// The tag is kept as text because lines with unknown tags are still valid
/// input: they are displayed as chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Text before the first `:` (the whole line if there is no colon).
    pub tag: &'a str,
    /// Everything after the first `:`, untouched.
    pub payload: &'a str,
}

/// Joins `tag` and `fields` into one protocol line (without the newline).
///
/// Callers must base64-encode any field that may contain `:` or `\n`.
pub fn encode(tag: &str, fields: &[&str]) -> String {
    let cap = tag.len() + fields.iter().map(|f| f.len() + 1).sum::<usize>();
    let mut line = String::with_capacity(cap);
    line.push_str(tag);
    for field in fields {
        line.push(':');
        line.push_str(field);
    }
    line
}

/// Splits a protocol line at its first colon.
///
/// Never fails: payloads may themselves contain colons and are returned
/// verbatim.
pub fn decode(line: &str) -> Frame<'_> {
    match line.split_once(':') {
        Some((tag, payload)) => Frame { tag, payload },
        None => Frame {
            tag: line,
            payload: "",
        },
    }
}

/// Replaces `\r` and `\n` with spaces so a plain-text field stays on one line.
pub fn one_line(text: &str) -> Cow<'_, str> {
    if text.contains(['\r', '\n']) {
        Cow::Owned(text.replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(text)
    }
}

/// Base64-encodes arbitrary bytes for use as a line field.
pub fn b64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

/// Decodes a base64 field, returning `None` if it is malformed.
pub fn unb64(field: &str) -> Option<Vec<u8>> {
    STANDARD.decode(field.trim()).ok()
}

/// Decodes a base64 field that must hold UTF-8 text.
pub fn unb64_str(field: &str) -> Option<String> {
    String::from_utf8(unb64(field)?).ok()
}
