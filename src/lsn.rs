//! Log-sequence number codec
//!
//! A position in the write-ahead log, textual form `segment/offset` (two
//! hexadecimal words separated by a slash). Kept as a structured pair
//! rather than a single 64-bit integer so the database's textual form
//! round-trips losslessly and there is no ambiguity at segment boundaries.

use std::cmp::Ordering;
use std::fmt;

use tracing::warn;

/// Bytes per segment id: 255 segments of 16 MiB each, per the source formula.
const BYTES_PER_SEGMENT: u64 = 0xFF000000;

/// A log-sequence number: `segment_id / record_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lsn {
    pub segment: u32,
    pub offset: u32,
}

impl Lsn {
    /// The sentinel value published when this node has no usable position
    /// to contribute (e.g. a failed publish). Always loses any comparison.
    pub const ZERO: Lsn = Lsn { segment: 0, offset: 0 };

    pub fn new(segment: u32, offset: u32) -> Self {
        Self { segment, offset }
    }

    /// Parse `"HHHHHHHH/HHHHHHHH"` into a structured LSN.
    ///
    /// Accepts exactly two hex fields separated by `/`; anything else is
    /// rejected. On parse failure the caller is expected to log a warning
    /// and treat the value as [`Lsn::ZERO`] for that site — this function
    /// itself only returns the parse error.
    pub fn parse(text: &str) -> Result<Lsn, crate::Error> {
        let mut parts = text.splitn(2, '/');
        let (seg, off) = match (parts.next(), parts.next()) {
            (Some(seg), Some(off)) if !off.contains('/') => (seg, off),
            _ => return Err(crate::Error::LsnParse(text.to_string())),
        };

        let segment = u32::from_str_radix(seg, 16)
            .map_err(|_| crate::Error::LsnParse(text.to_string()))?;
        let offset = u32::from_str_radix(off, 16)
            .map_err(|_| crate::Error::LsnParse(text.to_string()))?;

        Ok(Lsn { segment, offset })
    }

    /// Parse, falling back to the zero sentinel and a logged warning on
    /// malformed input — used at every site that reads an LSN off the wire
    /// or out of the database, per the "Parse error" policy in the error
    /// taxonomy.
    pub fn parse_or_zero(text: &str) -> Lsn {
        match Self::parse(text) {
            Ok(lsn) => lsn,
            Err(_) => {
                warn!("could not parse transaction log location \"{}\"", text);
                Lsn::ZERO
            }
        }
    }

    /// Absolute byte offset: `segment * 0xFF000000 + offset`.
    pub fn to_bytes(self) -> u64 {
        (self.segment as u64) * BYTES_PER_SEGMENT + (self.offset as u64)
    }
}

impl fmt::Display for Lsn {
    /// Inverse of `parse`: uppercase hex, no zero-padding beyond what the
    /// source produces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.segment, self.offset)
    }
}

impl PartialOrd for Lsn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lsn {
    /// Lexicographic: first by segment id, then by record offset.
    fn cmp(&self, other: &Self) -> Ordering {
        self.segment.cmp(&other.segment).then(self.offset.cmp(&other.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let lsn = Lsn::parse("1/A0B0C0D0").unwrap();
        assert_eq!(lsn, Lsn::new(1, 0xA0B0C0D0));
        assert_eq!(lsn.to_bytes(), 0xFFA0B0C0D0);
        assert_eq!(lsn.to_string(), "1/A0B0C0D0");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Lsn::parse("not-an-lsn").is_err());
        assert!(Lsn::parse("1/2/3").is_err());
        assert!(Lsn::parse("1").is_err());
        assert!(Lsn::parse("G/0").is_err());
    }

    #[test]
    fn test_parse_or_zero_sentinel() {
        assert_eq!(Lsn::parse_or_zero("garbage"), Lsn::ZERO);
        assert_eq!(Lsn::parse_or_zero("0/0"), Lsn::ZERO);
    }

    #[test]
    fn test_comparison_total_order() {
        let a = Lsn::new(2, 0);
        let b = Lsn::new(2, 0x100);
        let c = Lsn::new(1, 0xFFFFFFFF);

        assert!(a < b);
        assert!(c < a);
        assert!(c < b);
        assert_eq!(a.cmp(&a), Ordering::Equal);

        // antisymmetry
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn test_equal_lsns_have_equal_bytes() {
        let a = Lsn::new(5, 0x10);
        let b = Lsn::new(5, 0x10);
        assert_eq!(a, b);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_byte_offset_formula() {
        // 2 segments in, plus a small offset
        let lsn = Lsn::new(2, 0x100);
        assert_eq!(lsn.to_bytes(), 2u64 * 0xFF000000 + 0x100);
    }
}
