// Property: for any Range header and any non-empty object, the resolved
// window satisfies 0 <= start <= end < total_size, and the permissive
// fallbacks (whole object, clamped end, start reset to 0) hold.

use media_stream::models::ByteRange;
use media_stream::range_resolver::{RangePolicy, RangeResolver};
use media_stream::StreamError;
use proptest::prelude::*;

fn resolve(header: Option<&str>, total_size: u64) -> ByteRange {
    RangeResolver::default()
        .resolve(header, total_size)
        .expect("permissive resolution never fails")
        .expect("non-empty object always has a window")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A missing or blank header selects the whole object
    #[test]
    fn prop_no_header_is_whole_object(
        total_size in 1u64..=u64::MAX / 2,
        blanks in "[ \t]{0,4}",
    ) {
        let expected = ByteRange { start: 0, end: total_size - 1 };
        prop_assert_eq!(resolve(None, total_size), expected);
        prop_assert_eq!(resolve(Some(&blanks), total_size), expected);
    }

    /// An end at or beyond the object is clamped to the last byte
    #[test]
    fn prop_end_is_clamped(
        total_size in 1u64..10_000_000,
        start_frac in 0.0f64..1.0,
        overshoot in 0u64..10_000_000,
    ) {
        let start = ((total_size as f64) * start_frac) as u64;
        let start = start.min(total_size - 1);
        let end = total_size - 1 + overshoot;

        let header = format!("bytes={}-{}", start, end);
        let range = resolve(Some(&header), total_size);
        prop_assert_eq!(range.start, start);
        prop_assert_eq!(range.end, total_size - 1);
    }

    /// A start at or beyond the object falls back to 0
    #[test]
    fn prop_start_beyond_size_falls_back_to_zero(
        total_size in 1u64..10_000_000,
        beyond in 0u64..10_000_000,
        open_ended in any::<bool>(),
    ) {
        let start = total_size + beyond;
        let header = if open_ended {
            format!("bytes={}-", start)
        } else {
            format!("bytes={}-{}", start, start + 10)
        };

        let range = resolve(Some(&header), total_size);
        prop_assert_eq!(range.start, 0);
        prop_assert_eq!(range.end, total_size - 1);
    }

    /// Valid in-bounds headers are served exactly
    #[test]
    fn prop_valid_range_is_exact(
        total_size in 1u64..10_000_000,
        a in 0.0f64..1.0,
        b in 0.0f64..1.0,
    ) {
        let x = (((total_size - 1) as f64) * a) as u64;
        let y = (((total_size - 1) as f64) * b) as u64;
        let (start, end) = (x.min(y), x.max(y));

        let header = format!("bytes={}-{}", start, end);
        prop_assert_eq!(resolve(Some(&header), total_size), ByteRange { start, end });
    }

    /// Whatever the header, the result is a valid window
    #[test]
    fn prop_any_header_yields_valid_window(
        total_size in 1u64..=u64::MAX / 2,
        header in ".{0,40}",
    ) {
        let range = resolve(Some(&header), total_size);
        prop_assert!(range.start <= range.end);
        prop_assert!(range.end < total_size);
    }

    /// Byte-ish headers built from digits, dashes and commas are never an error
    #[test]
    fn prop_bytes_like_header_yields_valid_window(
        total_size in 1u64..1_000_000,
        spec in "[0-9]{0,8}-?[0-9]{0,8}(,[0-9]{0,3}-[0-9]{0,3})?",
    ) {
        let header = format!("bytes={}", spec);
        let range = resolve(Some(&header), total_size);
        prop_assert!(range.fits_within(total_size));
    }

    /// Strict policy only differs for a start beyond the object
    #[test]
    fn prop_strict_rejects_start_beyond_size(
        total_size in 1u64..10_000_000,
        beyond in 0u64..10_000_000,
    ) {
        let strict = RangeResolver::new(RangePolicy::Strict);
        let start = total_size + beyond;
        let header = format!("bytes={}-", start);

        let err = strict.resolve(Some(&header), total_size).unwrap_err();
        prop_assert_eq!(err, StreamError::RangeNotSatisfiable { start, size: total_size });

        let in_bounds = format!("bytes={}-", total_size - 1);
        prop_assert_eq!(
            strict.resolve(Some(&in_bounds), total_size).unwrap(),
            Some(ByteRange { start: total_size - 1, end: total_size - 1 })
        );
    }
}

#[test]
fn test_empty_object_has_no_window() {
    assert_eq!(RangeResolver::default().resolve(None, 0).unwrap(), None);
    assert_eq!(RangeResolver::default().resolve(Some("bytes=0-"), 0).unwrap(), None);
}
