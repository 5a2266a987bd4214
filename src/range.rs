use thiserror::Error;

/// A satisfiable single byte range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset.
    pub end: u64,
}

/// Why a `Range` header cannot be served.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The header has no `unit=` prefix.
    #[error("malformed range header")]
    Malformed,

    /// No listed range overlaps the resource.
    #[error("range not satisfiable")]
    Unsatisfiable,

    /// More than one satisfiable range was requested.
    #[error("multiple ranges are not supported")]
    MultipleRanges,

    /// The range unit is not `bytes`.
    #[error("unsupported range unit: {0}")]
    UnsupportedUnit(String),
}

impl ByteRange {
    /// Parses a `Range` header against a resource of `len` bytes.
    ///
    /// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. An end past the
    /// resource is clamped; ranges that start past it are dropped.
    pub fn parse(header: &str, len: u64) -> Result<Self, RangeError> {
        let (unit, specs) = header.split_once('=').ok_or(RangeError::Malformed)?;

        let ranges: Vec<ByteRange> = specs
            .split(',')
            .filter_map(|spec| parse_spec(spec.trim(), len))
            .collect();

        let range = match ranges.as_slice() {
            [] => return Err(RangeError::Unsatisfiable),
            [range] => *range,
            _ => return Err(RangeError::MultipleRanges),
        };

        let unit = unit.trim();
        if !unit.eq_ignore_ascii_case("bytes") {
            return Err(RangeError::UnsupportedUnit(unit.to_string()));
        }
        Ok(range)
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a satisfiable range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

fn parse_spec(spec: &str, len: u64) -> Option<ByteRange> {
    let last = len.checked_sub(1)?;
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    let (start, end) = match (start.is_empty(), end.is_empty()) {
        (true, true) => return None,
        // Suffix: the last `end` bytes.
        (true, false) => {
            let suffix: u64 = end.parse().ok()?;
            (len.saturating_sub(suffix), last)
        }
        (false, true) => (start.parse().ok()?, last),
        (false, false) => (start.parse().ok()?, end.parse::<u64>().ok()?.min(last)),
    };

    (start <= end).then_some(ByteRange { start, end })
}
