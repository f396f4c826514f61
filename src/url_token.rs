//! URL token encoding.
//!
//! A base64 variant that is safe in URLs and cookie values. Instead of `=`
//! padding, the encoded string carries one trailing digit giving the number
//! of padding characters that were removed, and `+`/`/` are replaced with
//! `-`/`_`.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Encode bytes as a URL token. Empty input encodes to an empty string.
pub fn encode(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let b64 = STANDARD.encode(data);
    let body = b64.trim_end_matches('=');
    let padding = b64.len() - body.len();

    let mut out = String::with_capacity(body.len() + 1);
    for c in body.chars() {
        out.push(match c {
            '+' => '-',
            '/' => '_',
            c => c,
        });
    }
    out.push((b'0' + padding as u8) as char);
    out
}

/// Decode a URL token. Returns `None` if the padding marker or the base64
/// body is malformed. An empty string decodes to an empty vector.
pub fn decode(token: &str) -> Option<Vec<u8>> {
    if token.is_empty() {
        return Some(Vec::new());
    }

    // The marker is ASCII, so slicing it off always lands on a char boundary.
    let padding = match token.as_bytes()[token.len() - 1] {
        c @ b'0'..=b'2' => (c - b'0') as usize,
        _ => return None,
    };
    let body = &token[..token.len() - 1];

    let mut b64 = String::with_capacity(body.len() + padding);
    for c in body.chars() {
        b64.push(match c {
            '-' => '+',
            '_' => '/',
            c => c,
        });
    }
    b64.extend(std::iter::repeat('=').take(padding));

    STANDARD.decode(b64.as_bytes()).ok()
}
