// Range response framing: recovers the byte span a response actually serves.

use crate::engine::pending::Interval;
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the server answered `*`.
    pub total: Option<u64>,
}

/// Parse a `Content-Range` value of the form `bytes <from>-<to>/<total|*>`.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?;
    // Require at least one separator between the unit and the span.
    let span_and_total = rest.strip_prefix(|c: char| c == ' ' || c == '=')?.trim_start();
    let (span, total) = span_and_total.split_once('/')?;
    let (start, end) = span.trim().split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end.trim().parse::<u64>().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    Some(ContentRange { start, end, total })
}

/// Determine the interval of the resource covered by a response body.
///
/// Without a `Content-Range` header the body is taken to be the whole
/// resource, `[0, declared_length - 1]`. Any disagreement with the buffer's
/// fixed `length` is a protocol error.
pub fn served_interval(
    content_range: Option<&str>,
    declared_length: Option<u64>,
    length: u64,
) -> Result<Interval, StreamError> {
    let (start, end, total) = match content_range {
        Some(value) => {
            let parsed = parse_content_range(value).ok_or_else(|| {
                StreamError::protocol(format!("malformed Content-Range {:?}", value))
            })?;
            (parsed.start, parsed.end, parsed.total)
        }
        None => {
            let declared = declared_length.unwrap_or(length);
            if declared == 0 {
                return Err(StreamError::protocol("empty response without Content-Range"));
            }
            (0, declared - 1, Some(declared))
        }
    };

    if let Some(total) = total {
        if total != length {
            return Err(StreamError::protocol(format!(
                "resource length {} does not match buffer length {}",
                total, length
            )));
        }
    }
    if start > end {
        return Err(StreamError::protocol(format!(
            "inverted range {}-{}",
            start, end
        )));
    }
    if end >= length {
        return Err(StreamError::protocol(format!(
            "range {}-{} exceeds buffer length {}",
            start, end, length
        )));
    }
    Ok(Interval::new(start, end))
}
