//! HTTP `Range` header resolution
//!
//! Turns an optional `Range: bytes=<start>-<end>` header and a known object
//! size into an inclusive byte window with `0 <= start <= end < size`.
//!
//! The default [`RangePolicy::Permissive`] never fails. A header it cannot
//! use (wrong unit, several ranges, garbage) selects the whole object, an
//! unparsable or missing start reads as `0`, a missing end reads as the last
//! byte, an end past the object is clamped and a start past the object falls
//! back to `0`. [`RangePolicy::Strict`] differs only in the last case and
//! reports `RangeNotSatisfiable` instead.
//!
//! `bytes=-N` is read as "from 0 to N", not as an RFC 7233 suffix range.

use crate::error::{Result, StreamError};
use crate::models::ByteRange;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How to treat a range whose start lies beyond the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Fall back to starting at byte 0
    #[default]
    Permissive,
    /// Reject with 416 Range Not Satisfiable
    Strict,
}

/// Start and end as written in the header, before clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Parse `bytes=<start>-<end>`
///
/// Returns `None` when the header does not have that shape at all. Each bound
/// that is empty or not a number comes back as `None`.
pub fn parse_range_header(header: &str) -> Option<RequestedRange> {
    let header = header.trim();
    let (unit, spec) = header.split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || spec.contains(',') {
        return None;
    }

    let (start, end) = spec.split_once('-')?;
    if end.contains('-') {
        return None;
    }

    Some(RequestedRange {
        start: start.trim().parse::<u64>().ok(),
        end: end.trim().parse::<u64>().ok(),
    })
}

/// Resolves `Range` headers against object sizes
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeResolver {
    policy: RangePolicy,
}

impl RangeResolver {
    pub fn new(policy: RangePolicy) -> Self {
        RangeResolver { policy }
    }

    pub fn policy(&self) -> RangePolicy {
        self.policy
    }

    /// Resolve a `Range` header against an object of `total_size` bytes
    ///
    /// # Returns
    /// * `Ok(Some(range))` with `0 <= start <= end < total_size`
    /// * `Ok(None)` for an empty object, which has no byte window
    /// * `Err(StreamError::RangeNotSatisfiable)` only under the strict policy,
    ///   when the requested start is at or beyond `total_size`
    pub fn resolve(&self, header: Option<&str>, total_size: u64) -> Result<Option<ByteRange>> {
        let full = match ByteRange::full(total_size) {
            Some(full) => full,
            None => return Ok(None),
        };
        let last = full.end;

        let header = match header.map(str::trim) {
            Some(h) if !h.is_empty() => h,
            _ => return Ok(Some(full)),
        };

        let requested = match parse_range_header(header) {
            Some(requested) => requested,
            None => {
                debug!("Ignoring malformed Range header '{}', serving whole object", header);
                return Ok(Some(full));
            }
        };

        let mut start = requested.start.unwrap_or(0);
        let end = requested.end.map_or(last, |end| end.min(last));

        if start >= total_size {
            match self.policy {
                RangePolicy::Strict => {
                    return Err(StreamError::RangeNotSatisfiable {
                        start,
                        size: total_size,
                    })
                }
                RangePolicy::Permissive => {
                    debug!(
                        "Range start {} beyond size {}, falling back to 0",
                        start, total_size
                    );
                    start = 0;
                }
            }
        }

        if end < start {
            debug!("Range '{}' ends before it starts, serving whole object", header);
            return Ok(Some(full));
        }

        Ok(Some(ByteRange { start, end }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissive(header: Option<&str>, size: u64) -> ByteRange {
        RangeResolver::default().resolve(header, size).unwrap().unwrap()
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(
            parse_range_header("bytes=10-20"),
            Some(RequestedRange { start: Some(10), end: Some(20) })
        );
        assert_eq!(
            parse_range_header("bytes=500000-"),
            Some(RequestedRange { start: Some(500000), end: None })
        );
        assert_eq!(
            parse_range_header("BYTES = x-7"),
            Some(RequestedRange { start: None, end: Some(7) })
        );
        assert_eq!(parse_range_header("items=0-1"), None);
        assert_eq!(parse_range_header("bytes=0-1,5-6"), None);
        assert_eq!(parse_range_header("bytes=0"), None);
        assert_eq!(parse_range_header("bytes=1-2-3"), None);
    }

    #[test]
    fn test_no_header_is_whole_object() {
        assert_eq!(permissive(None, 100), ByteRange { start: 0, end: 99 });
        assert_eq!(permissive(Some("   "), 100), ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn test_open_ended_range() {
        assert_eq!(
            permissive(Some("bytes=500000-"), 1_000_000),
            ByteRange { start: 500_000, end: 999_999 }
        );
    }

    #[test]
    fn test_end_is_clamped() {
        assert_eq!(permissive(Some("bytes=10-5000"), 100), ByteRange { start: 10, end: 99 });
    }

    #[test]
    fn test_start_beyond_size_falls_back_to_zero() {
        assert_eq!(permissive(Some("bytes=100-"), 100), ByteRange { start: 0, end: 99 });
        assert_eq!(permissive(Some("bytes=150-160"), 100), ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn test_unparsable_bounds() {
        assert_eq!(permissive(Some("bytes=abc-10"), 100), ByteRange { start: 0, end: 10 });
        assert_eq!(permissive(Some("bytes=-10"), 100), ByteRange { start: 0, end: 10 });
        assert_eq!(permissive(Some("bytes=5-xyz"), 100), ByteRange { start: 5, end: 99 });
    }

    #[test]
    fn test_malformed_header_is_whole_object() {
        for header in ["garbage", "bytes 0-10", "bytes=0-1,4-5", "bits=0-10"] {
            assert_eq!(
                permissive(Some(header), 100),
                ByteRange { start: 0, end: 99 },
                "{}",
                header
            );
        }
    }

    #[test]
    fn test_reversed_range_is_whole_object() {
        assert_eq!(permissive(Some("bytes=50-10"), 100), ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn test_empty_object_has_no_range() {
        assert_eq!(RangeResolver::default().resolve(Some("bytes=0-10"), 0).unwrap(), None);
        assert_eq!(RangeResolver::new(RangePolicy::Strict).resolve(None, 0).unwrap(), None);
    }

    #[test]
    fn test_strict_rejects_start_beyond_size() {
        let strict = RangeResolver::new(RangePolicy::Strict);
        let err = strict.resolve(Some("bytes=100-"), 100).unwrap_err();
        assert_eq!(err, StreamError::RangeNotSatisfiable { start: 100, size: 100 });

        assert_eq!(
            strict.resolve(Some("bytes=10-5000"), 100).unwrap(),
            Some(ByteRange { start: 10, end: 99 })
        );
        assert_eq!(
            strict.resolve(Some("garbage"), 100).unwrap(),
            Some(ByteRange { start: 0, end: 99 })
        );
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: RangePolicy = serde_yaml::from_str("strict").unwrap();
        assert_eq!(policy, RangePolicy::Strict);
        assert_eq!(RangePolicy::default(), RangePolicy::Permissive);
    }
}
