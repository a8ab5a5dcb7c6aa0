//! Record model.
//!
//! A record is one newline-delimited line of a source file. Its first [`PREFIX_WIDTH`] bytes are the
//! timestamp prefix and the only sort key. On output the identifier of the originating source is spliced in
//! right after the prefix: `prefix ++ source_id ++ "," ++ remainder`.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::sync::Arc;

/// Width of the timestamp prefix in bytes.
pub const PREFIX_WIDTH: usize = 24;

/// Separator written between the source identifier and the record remainder.
pub const SOURCE_SEPARATOR: u8 = b',';

/// Splits the next newline-delimited line out of `buffer` starting at `cursor`.
///
/// Returns the line (without the terminator) and the cursor positioned right after the terminator.
/// Returns [`None`] if the remaining bytes contain no newline, which means the window ran out in the
/// middle of a record, not that the stream ended.
pub fn extract_next(buffer: &[u8], cursor: usize) -> Option<(&[u8], usize)> {
    let rest = buffer.get(cursor..)?;
    let pos = rest.iter().position(|&b| b == b'\n')?;

    Some((&rest[..pos], cursor + pos + 1))
}

/// Record validity predicate.
///
/// Lines rejected by the filter are dropped silently, the stream still advances past them.
pub trait RecordFilter: Send + Sync {
    /// Checks whether the raw line is a record worth merging.
    fn accept(&self, line: &[u8]) -> bool;
}

impl<F> RecordFilter for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn accept(&self, line: &[u8]) -> bool {
        self(line)
    }
}

/// Accepts every well-formed line.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RecordFilter for AcceptAll {
    fn accept(&self, _line: &[u8]) -> bool {
        true
    }
}

/// Accepts lines containing a literal marker, e.g. a year or an event type.
#[derive(Debug, Clone)]
pub struct MarkerFilter {
    marker: Vec<u8>,
}

impl MarkerFilter {
    /// Creates a filter keeping lines that contain `marker`. An empty marker keeps every line.
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        MarkerFilter { marker: marker.into() }
    }
}

impl RecordFilter for MarkerFilter {
    fn accept(&self, line: &[u8]) -> bool {
        if self.marker.is_empty() {
            return true;
        }
        line.windows(self.marker.len()).any(|w| w == self.marker.as_slice())
    }
}

/// Accepts lines whose timestamp prefix lies in `[from, to)`.
/// Bounds are compared bytewise against the prefix, so they are expected in the same textual format.
#[derive(Debug, Clone, Default)]
pub struct PrefixRangeFilter {
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
}

impl PrefixRangeFilter {
    /// Creates a filter keeping prefixes not less than `from` and less than `to`. A missing bound is open.
    pub fn new(from: Option<impl Into<Vec<u8>>>, to: Option<impl Into<Vec<u8>>>) -> Self {
        PrefixRangeFilter {
            from: from.map(Into::into),
            to: to.map(Into::into),
        }
    }
}

impl RecordFilter for PrefixRangeFilter {
    fn accept(&self, line: &[u8]) -> bool {
        let prefix = &line[..line.len().min(PREFIX_WIDTH)];

        let after_from = match &self.from {
            Some(from) => prefix >= from.as_slice(),
            None => true,
        };
        let before_to = match &self.to {
            Some(to) => prefix < to.as_slice(),
            None => true,
        };

        after_from && before_to
    }
}

/// Line is too short to carry a timestamp prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecordError {
    /// Actual line length.
    pub len: usize,
}

impl Error for MalformedRecordError {}

impl Display for MalformedRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record of {} bytes is shorter than the {} bytes timestamp prefix",
            self.len, PREFIX_WIDTH
        )
    }
}

/// A timestamped line with its provenance.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    line: Vec<u8>,
    // None for lines already carrying their source tag (run files)
    source: Option<Arc<str>>,
}

impl Record {
    /// Builds a record from a raw source line, to be tagged with `source_id` on output.
    pub fn tag(line: &[u8], source_id: Arc<str>) -> Result<Self, MalformedRecordError> {
        Self::check(line)?;

        Ok(Record {
            line: line.to_vec(),
            source: Some(source_id),
        })
    }

    /// Builds a record from a line that has already been tagged, which is written out unchanged.
    pub fn tagged(line: &[u8]) -> Result<Self, MalformedRecordError> {
        Self::check(line)?;

        Ok(Record {
            line: line.to_vec(),
            source: None,
        })
    }

    fn check(line: &[u8]) -> Result<(), MalformedRecordError> {
        if line.len() < PREFIX_WIDTH {
            return Err(MalformedRecordError { len: line.len() });
        }
        Ok(())
    }

    /// Sort key.
    pub fn prefix(&self) -> &[u8] {
        &self.line[..PREFIX_WIDTH]
    }

    /// Everything after the prefix, as it appeared in the input line.
    pub fn remainder(&self) -> &[u8] {
        &self.line[PREFIX_WIDTH..]
    }

    /// Source identifier to be spliced in on output, if the line is not tagged yet.
    pub fn source_id(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Number of bytes [`Record::write_to`] appends.
    pub fn encoded_len(&self) -> usize {
        match &self.source {
            Some(source) => self.line.len() + source.len() + 2,
            None => self.line.len() + 1,
        }
    }

    /// Serializes the output line, including the trailing newline.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        match &self.source {
            Some(source) => {
                out.extend_from_slice(self.prefix());
                out.extend_from_slice(source.as_bytes());
                out.push(SOURCE_SEPARATOR);
                out.extend_from_slice(self.remainder());
            }
            None => out.extend_from_slice(&self.line),
        }
        out.push(b'\n');
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encoded = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut encoded);
        encoded.pop();
        write!(f, "Record({:?})", String::from_utf8_lossy(&encoded))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rstest::*;

    use super::{
        extract_next, AcceptAll, MalformedRecordError, MarkerFilter, PrefixRangeFilter, Record, RecordFilter,
    };

    #[rstest]
    #[case(b"abc\ndef\n", 0, Some((&b"abc"[..], 4)))]
    #[case(b"abc\ndef\n", 4, Some((&b"def"[..], 8)))]
    #[case(b"abc\ndef", 4, None)]
    #[case(b"\nx", 0, Some((&b""[..], 1)))]
    #[case(b"abc\n", 4, None)]
    #[case(b"abc\n", 10, None)]
    fn test_extract_next(#[case] buffer: &[u8], #[case] cursor: usize, #[case] expected: Option<(&[u8], usize)>) {
        assert_eq!(extract_next(buffer, cursor), expected);
    }

    #[rstest]
    #[case(b"2021-01-01 10:00:00.000000,1.5,100", true)]
    #[case(b"2020-12-31 23:59:59.999999,1.5,100", false)]
    #[case(b"garbage", false)]
    fn test_marker_filter(#[case] line: &[u8], #[case] expected: bool) {
        assert_eq!(MarkerFilter::new("2021").accept(line), expected);
        assert!(AcceptAll.accept(line));
    }

    #[rstest]
    #[case(b"2021-01-01 09:59:59.999999,x", false)]
    #[case(b"2021-01-01 10:00:00.000000,x", true)]
    #[case(b"2021-01-01 10:59:59.999999,x", true)]
    #[case(b"2021-01-01 11:00:00.000000,x", false)]
    fn test_prefix_range_filter(#[case] line: &[u8], #[case] expected: bool) {
        let filter = PrefixRangeFilter::new(Some("2021-01-01 10"), Some("2021-01-01 11"));
        assert_eq!(filter.accept(line), expected);
    }

    #[test]
    fn test_open_filters() {
        assert!(MarkerFilter::new("").accept(b"anything"));

        let from_only = PrefixRangeFilter::new(Some("2021"), None::<&str>);
        assert!(from_only.accept(b"2999-01-01 00:00:00.000000,x"));
        assert!(!from_only.accept(b"2020-12-31 23:59:59.999999,x"));

        let to_only = PrefixRangeFilter::new(None::<&str>, Some("2021"));
        assert!(to_only.accept(b"1970-01-01 00:00:00.000000,x"));
        assert!(!to_only.accept(b"2021-01-01 00:00:00.000000,x"));
    }

    #[test]
    fn test_closure_filter() {
        let filter = |line: &[u8]| line.starts_with(b"2021");
        assert!(filter.accept(b"2021-01-01"));
        assert!(!RecordFilter::accept(&filter, b"2022-01-01"));
    }

    #[test]
    fn test_tag() {
        let record = Record::tag(b"2021-01-01 10:00:00.00000,1.5,100", Arc::from("MSFT")).unwrap();
        assert_eq!(record.prefix(), b"2021-01-01 10:00:00.0000");
        assert_eq!(record.remainder(), b"0,1.5,100");
        assert_eq!(record.source_id(), Some("MSFT"));

        let mut out = Vec::new();
        record.write_to(&mut out);
        assert_eq!(out, b"2021-01-01 10:00:00.0000MSFT,0,1.5,100\n");
        assert_eq!(out.len(), record.encoded_len());
    }

    #[test]
    fn test_tagged_passthrough() {
        let line = b"2021-01-01 10:00:00.0000MSFT,0,1.5,100";
        let record = Record::tagged(line).unwrap();
        assert_eq!(record.source_id(), None);

        let mut out = Vec::new();
        record.write_to(&mut out);
        assert_eq!(&out[..line.len()], line);
        assert_eq!(out.len(), record.encoded_len());
    }

    #[test]
    fn test_malformed() {
        assert_eq!(
            Record::tag(b"2021-01-01", Arc::from("A")),
            Err(MalformedRecordError { len: 10 })
        );
        assert!(Record::tagged(b"").is_err());
        // exactly the prefix width is a record with an empty remainder
        assert!(Record::tagged(&[b'0'; super::PREFIX_WIDTH]).is_ok());
    }
}
