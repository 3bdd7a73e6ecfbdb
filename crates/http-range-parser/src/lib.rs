//! Parser for HTTP `Range` request headers
//!
//! Turns a header such as `bytes=0-499, -500` into normalized inclusive byte
//! ranges, validated against the length of the resource being served.

use std::fmt;

/// Unit prefix every supported range header must start with
const BYTES_UNIT: &str = "bytes=";

/// An inclusive byte range within a resource of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether the range covers every byte of a resource of `size` bytes
    pub fn is_whole(&self, size: u64) -> bool {
        size > 0 && self.start == 0 && self.end == size - 1
    }

    /// Value for the `Content-Range` response header
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Error for a malformed or unsatisfiable range header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRange(String);

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid range: {}", self.0)
    }
}

impl std::error::Error for InvalidRange {}

fn invalid(spec: &str) -> InvalidRange {
    InvalidRange(spec.to_string())
}

/// Parse a decimal offset; signs and whitespace inside the number are rejected
fn parse_offset(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse a single `start-end`, `start-` or `-suffix` spec
fn parse_spec(spec: &str, size: u64) -> Result<ByteRange, InvalidRange> {
    let (start, end) = spec.split_once('-').ok_or_else(|| invalid(spec))?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // -N: the last N bytes, clamped to the resource size
        let suffix = parse_offset(end).ok_or_else(|| invalid(spec))?;
        let suffix = suffix.min(size);
        if suffix == 0 {
            return Err(invalid(spec));
        }
        return Ok(ByteRange {
            start: size - suffix,
            end: size - 1,
        });
    }

    let start = parse_offset(start).ok_or_else(|| invalid(spec))?;
    if start >= size {
        return Err(invalid(spec));
    }

    if end.is_empty() {
        return Ok(ByteRange {
            start,
            end: size - 1,
        });
    }

    let end = parse_offset(end).ok_or_else(|| invalid(spec))?;
    if end >= size || end < start {
        return Err(invalid(spec));
    }

    Ok(ByteRange { start, end })
}

/// Parse a `Range` header against a resource of `size` bytes.
///
/// An empty header yields no ranges, meaning the whole resource should be
/// served. End offsets past the resource are rejected rather than clamped.
/// As soon as one spec covers the whole resource, parsing stops and that
/// range is returned alone.
pub fn parse(header: &str, size: u64) -> Result<Vec<ByteRange>, InvalidRange> {
    if header.is_empty() {
        return Ok(Vec::new());
    }

    let specs = header
        .strip_prefix(BYTES_UNIT)
        .ok_or_else(|| invalid(header))?;

    let mut ranges = Vec::new();
    for spec in specs.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }

        let range = parse_spec(spec, size)?;
        if range.is_whole(size) {
            return Ok(vec![range]);
        }
        ranges.push(range);
    }

    Ok(ranges)
}
