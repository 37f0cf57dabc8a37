//! Parsing of the `Range` request header.
//!
//! Only a single `bytes=<start>-<end>` range is supported, `<end>` may be left out to
//! read until the end of the file.
//!
//! See <https://developer.mozilla.org/en-US/docs/Web/HTTP/Range_requests>

use axum::http::HeaderValue;

/// Prefix of a byte range header value
const BYTES_UNIT: &str = "bytes=";

/// An inclusive window of bytes within a file of `total` bytes
///
/// Always `start <= end < total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
    total: u64,
}

impl ByteRange {
    #[inline]
    pub const fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub const fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Number of bytes in the window
    #[inline]
    pub const fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header of a partial response
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Range not satisfiable for {total} bytes: {reason}")]
pub struct InvalidRange {
    pub reason: &'static str,
    pub total: u64,
}

impl InvalidRange {
    /// Value for the `Content-Range` header of a 416 response
    pub fn content_range(&self) -> String {
        format!("bytes */{}", self.total)
    }
}

/// Strictly parse a position, `u64::from_str` would also accept a leading `+`
fn parse_position(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    value.parse().ok()
}

/// Parse the `Range` header against a file of `total` bytes
///
/// No header means the whole file is wanted, `Ok(None)`. An `<end>` past the end of the
/// file is clamped to the last byte.
///
/// # Errors
///
/// Will return an error for anything that is not a single satisfiable byte range.
pub fn parse_range(header: Option<&HeaderValue>, total: u64) -> Result<Option<ByteRange>, InvalidRange> {
    let Some(header) = header else {
        return Ok(None);
    };

    let err = |reason| Err(InvalidRange { reason, total });

    let Ok(value) = header.to_str() else {
        return err("header is not valid ASCII");
    };

    let Some(ranges) = value.trim().strip_prefix(BYTES_UNIT) else {
        return err("unit is not bytes");
    };

    if ranges.contains(',') {
        return err("multiple ranges are not supported");
    }

    let Some((start, end)) = ranges.split_once('-') else {
        return err("missing `-`");
    };

    let Some(start) = parse_position(start) else {
        return err("start is not a number");
    };

    if start >= total {
        return err("start is beyond the end of the file");
    }

    let end = if end.is_empty() {
        total - 1
    } else {
        let Some(end) = parse_position(end) else {
            return err("end is not a number");
        };

        if start > end {
            return err("start is after end");
        }

        end.min(total - 1)
    };

    tracing::trace!("Range start: {start}, end: {end}, total: {total}");

    Ok(Some(ByteRange { start, end, total }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str, total: u64) -> Result<Option<ByteRange>, InvalidRange> {
        parse_range(Some(&HeaderValue::from_str(value).unwrap()), total)
    }

    fn window(value: &str, total: u64) -> (u64, u64) {
        let range = parse(value, total).unwrap().unwrap();
        (range.start(), range.end())
    }

    #[test]
    fn no_header_is_whole_file() {
        assert_eq!(parse_range(None, 1000), Ok(None));
        assert_eq!(parse_range(None, 0), Ok(None));
    }

    #[test]
    fn explicit_range() {
        let range = parse("bytes=500-699", 1000).unwrap().unwrap();

        assert_eq!((range.start(), range.end(), range.total()), (500, 699, 1000));
        assert_eq!(range.length(), 200);
        assert_eq!(range.content_range(), "bytes 500-699/1000");
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        assert_eq!(window("bytes=999-", 1000), (999, 999));
        assert_eq!(window("bytes=0-", 1000), (0, 999));
    }

    #[test]
    fn single_byte_ranges() {
        assert_eq!(window("bytes=0-0", 1000), (0, 0));
        assert_eq!(window("bytes=999-999", 1000), (999, 999));
        assert_eq!(parse("bytes=0-0", 1).unwrap().unwrap().length(), 1);
    }

    #[test]
    fn end_past_file_is_clamped() {
        assert_eq!(window("bytes=900-5000", 1000), (900, 999));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(window("  bytes=10-20 ", 1000), (10, 20));
    }

    #[test]
    fn unsatisfiable_ranges() {
        for value in ["bytes=1000-", "bytes=1000-1200", "bytes=5000-6000", "bytes=700-500"] {
            let err = parse(value, 1000).unwrap_err();
            assert_eq!(err.total, 1000, "{value}");
            assert_eq!(err.content_range(), "bytes */1000");
        }
    }

    #[test]
    fn empty_file_has_no_satisfiable_range() {
        assert!(parse("bytes=0-", 0).is_err());
        assert!(parse("bytes=0-0", 0).is_err());
    }

    #[test]
    fn malformed_ranges() {
        for value in [
            "",
            "bytes=",
            "bytes=-",
            "bytes=-500",
            "bytes=abc-10",
            "bytes=10-abc",
            "bytes=+10-20",
            "bytes=10-+20",
            "bytes= 10-20",
            "bytes=10",
            "items=0-10",
            "0-10",
            "bytes=0-10,20-30",
            "bytes=18446744073709551616-",
        ] {
            assert!(parse(value, 1000).is_err(), "{value:?} should be rejected");
        }
    }

    #[test]
    fn non_ascii_header_is_rejected() {
        let header = HeaderValue::from_bytes(b"bytes=\xff-10").unwrap();

        assert_eq!(
            parse_range(Some(&header), 1000).unwrap_err().reason,
            "header is not valid ASCII"
        );
    }

    #[test]
    fn every_valid_window_has_requested_length() {
        let total = 17;

        for start in 0..total {
            for end in start..total {
                let range = parse(&format!("bytes={start}-{end}"), total).unwrap().unwrap();
                assert_eq!(range.length(), end - start + 1);
                assert!(range.start() <= range.end() && range.end() < range.total());
            }
        }
    }
}
