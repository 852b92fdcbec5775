use std::borrow::Cow;

use crate::http::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not valid UTF-8
    InvalidRequest,
    MissingMethod,
    MissingTarget,
    MissingVersion,
}

/// Parses the request line at the start of `buf`.
///
/// Only the first line is looked at. A missing line terminator is tolerated,
/// so the whole of `buf` is taken as the request line when it has no `\n`.
pub fn parse_http_request(buf: &[u8]) -> Result<Request, ParseError> {
    let line_end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());

    let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| ParseError::InvalidRequest)?;
    let mut parts = line.split_whitespace();

    let method = parts.next().ok_or(ParseError::MissingMethod)?;
    let target = parts.next().ok_or(ParseError::MissingTarget)?;
    let version = parts.next().ok_or(ParseError::MissingVersion)?;

    let path = percent_decode_path(strip_query(target)).into_owned();

    Ok(Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        path,
    })
}

/// Position of the blank line that ends the header block.
pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Drops everything from the first `?`.
pub fn strip_query(target: &str) -> &str {
    target.split_once('?').map_or(target, |(path, _)| path)
}

/// Percent-decodes a path. Plus signs are kept; malformed escapes are left
/// as they are.
pub fn percent_decode_path(s: &str) -> Cow<'_, str> {
    if !s.contains('%') {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                decoded.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
