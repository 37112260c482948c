//! `Range: bytes=A-B?` parsing and block alignment.

use crate::error::CastError;

/// A parsed `Range: bytes=A-B?` header: block-aligned fetch start, bytes to
/// skip from that aligned start, and an optional explicit upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRange {
    pub aligned_offset: u64,
    pub skip: u64,
    pub cap: Option<u64>,
}

/// Parses `bytes=A-B?` and aligns `A` down to the nearest multiple of
/// `block_size`. `B` is optional; its absence means open-ended.
pub fn parse_http_range(range: &str, block_size: u64) -> Result<ParsedRange, CastError> {
    let rest = range
        .strip_prefix("bytes=")
        .ok_or(CastError::BadRange)?;

    let (offset_str, cap_str) = rest.split_once('-').ok_or(CastError::BadRange)?;

    if offset_str.is_empty() || !offset_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CastError::BadRange);
    }
    let offset: u64 = offset_str.parse().map_err(|_| CastError::BadRange)?;

    let cap = if cap_str.is_empty() {
        None
    } else if cap_str.bytes().all(|b| b.is_ascii_digit()) {
        cap_str.parse().ok()
    } else {
        None
    };

    let aligned_offset = (offset / block_size) * block_size;
    let skip = offset - aligned_offset;

    Ok(ParsedRange {
        aligned_offset,
        skip,
        cap,
    })
}

/// Admission bounds for a parsed range against a known document `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmittedRange {
    pub read_after: u64,
    pub upper: u64,
    pub size: u64,
}

impl AdmittedRange {
    pub fn is_partial(&self) -> bool {
        self.read_after > 0 || self.upper != self.size
    }
}

/// Validates a parsed range against the document size, following the literal
/// source behavior: an explicit cap that *exceeds* the file size is rejected
/// (400), not clamped; a cap smaller than the file size is honored.
pub fn admit_range(parsed: ParsedRange, size: u64) -> Result<AdmittedRange, CastError> {
    if parsed.skip > size {
        // never occurs for a parse that reached this point, guarded defensively
        return Err(CastError::Internal("skip exceeds document size".into()));
    }
    let read_after = parsed.aligned_offset + parsed.skip;
    if read_after > size {
        return Err(CastError::BadRange);
    }
    if let Some(cap) = parsed.cap {
        if size < cap {
            return Err(CastError::BadRange);
        }
    }
    let upper = parsed.cap.unwrap_or(size);
    Ok(AdmittedRange {
        read_after,
        upper,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_range_alignment_scenario() {
        let block_size = 1_048_576u64;
        let parsed = parse_http_range("bytes=1500000-", block_size).unwrap();
        assert_eq!(parsed.aligned_offset, 1_048_576);
        assert_eq!(parsed.skip, 451_424);
        assert_eq!(parsed.cap, None);
    }

    #[test]
    fn aligned_is_multiple_of_block_size() {
        for a in [0u64, 1, 1_048_575, 1_048_576, 5_000_000] {
            let parsed = parse_http_range(&format!("bytes={}-", a), 1_048_576).unwrap();
            assert_eq!(parsed.aligned_offset % 1_048_576, 0);
            assert!(parsed.aligned_offset <= a);
            assert!(parsed.skip < 1_048_576);
        }
    }

    #[test]
    fn rejects_missing_bytes_prefix() {
        assert!(parse_http_range("0-100", 1024).is_err());
    }

    #[test]
    fn rejects_non_digit_offset() {
        assert!(parse_http_range("bytes=abc-100", 1024).is_err());
    }

    #[test]
    fn cap_smaller_than_size_is_honored() {
        let parsed = parse_http_range("bytes=0-500", 1024).unwrap();
        let admitted = admit_range(parsed, 1000).unwrap();
        assert_eq!(admitted.upper, 500);
        assert!(admitted.is_partial());
    }

    #[test]
    fn cap_exceeding_size_is_rejected() {
        let parsed = parse_http_range("bytes=0-2000", 1024).unwrap();
        assert!(admit_range(parsed, 1000).is_err());
    }

    #[test]
    fn no_range_header_is_full_body_and_not_partial() {
        let admitted = admit_range(
            ParsedRange {
                aligned_offset: 0,
                skip: 0,
                cap: None,
            },
            1000,
        )
        .unwrap();
        assert_eq!(admitted.upper, 1000);
        assert!(!admitted.is_partial());
    }

    #[test]
    fn read_after_past_size_is_rejected() {
        let parsed = parse_http_range("bytes=2000-", 1024).unwrap();
        assert!(admit_range(parsed, 1000).is_err());
    }
}
