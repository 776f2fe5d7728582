//! Transfer encodings for envelope parts.

use base64::Engine;

/// Longest encoded line permitted by RFC 2045, excluding the CRLF.
pub const MAX_LINE_LENGTH: usize = 76;

/// Rewrites bare `\n` and bare `\r` line endings as `\r\n`.
#[must_use]
pub fn normalize_line_endings(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len() + text.len() / 32);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                normalized.push_str("\r\n");
            }
            '\n' => normalized.push_str("\r\n"),
            _ => normalized.push(c),
        }
    }

    normalized
}

/// Quoted-printable encodes a text body. Line breaks survive as hard CRLF
/// breaks; long lines receive soft breaks.
#[must_use]
pub fn quoted_printable(text: &str) -> String {
    quoted_printable::encode_to_str(normalize_line_endings(text).as_bytes())
}

/// Base64 encodes `data`, wrapped at [`MAX_LINE_LENGTH`] columns with CRLF.
#[must_use]
pub fn base64_wrapped(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);

    // The base64 alphabet is pure ASCII, so every byte offset is a char boundary.
    let mut rest = encoded.as_str();
    while rest.len() > MAX_LINE_LENGTH {
        let (line, tail) = rest.split_at(MAX_LINE_LENGTH);
        wrapped.push_str(line);
        wrapped.push_str("\r\n");
        rest = tail;
    }
    wrapped.push_str(rest);

    wrapped
}
