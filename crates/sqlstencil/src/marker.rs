//! Marker tokens written into rendered text in place of bound values.
//!
//! A marker is `U+FDD0`, the decimal capture index, then `U+FDD1`. Both code
//! points are Unicode noncharacters and form the library's reserved character
//! set: template source may not contain them, and the formatter treats any
//! occurrence that is not a well-formed marker as a collision.

use std::fmt::Write as _;

/// Opens a marker token.
pub const MARKER_OPEN: char = '\u{FDD0}';

/// Closes a marker token.
pub const MARKER_CLOSE: char = '\u{FDD1}';

/// Returns the marker token for the capture at `index`.
pub fn encode(index: usize) -> String {
    let mut token = String::with_capacity(8);
    token.push(MARKER_OPEN);
    let _ = write!(token, "{}", index);
    token.push(MARKER_CLOSE);
    token
}

/// Returns `true` if `ch` belongs to the reserved marker character set.
pub fn is_reserved(ch: char) -> bool {
    ch == MARKER_OPEN || ch == MARKER_CLOSE
}

/// Returns the byte offset of the first reserved character in `text`.
pub fn find_reserved(text: &str) -> Option<usize> {
    text.char_indices()
        .find(|(_, ch)| is_reserved(*ch))
        .map(|(pos, _)| pos)
}

/// A piece of marked text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Literal text between markers.
    Text(&'a str),
    /// A marker referencing the capture at this index.
    Marker(usize),
}

/// Splits marked text into literal runs and markers, left to right.
///
/// Fails on a stray close character, an unterminated marker, or a marker body
/// that is not a decimal index.
pub fn segments(text: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut out = Vec::new();
    let mut rest = text;
    let mut offset = 0;

    while let Some(pos) = find_reserved(rest) {
        let ch = rest[pos..].chars().next().unwrap_or(MARKER_OPEN);
        if ch == MARKER_CLOSE {
            return Err(format!("stray marker terminator at byte {}", offset + pos));
        }
        if pos > 0 {
            out.push(Segment::Text(&rest[..pos]));
        }

        let body_start = pos + MARKER_OPEN.len_utf8();
        let Some(body_len) = rest[body_start..].find(MARKER_CLOSE) else {
            return Err(format!("unterminated marker at byte {}", offset + pos));
        };
        let body = &rest[body_start..body_start + body_len];
        let index = body
            .parse::<usize>()
            .ok()
            .filter(|_| body.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| format!("malformed marker at byte {}", offset + pos))?;
        out.push(Segment::Marker(index));

        let consumed = body_start + body_len + MARKER_CLOSE.len_utf8();
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    Ok(out)
}
