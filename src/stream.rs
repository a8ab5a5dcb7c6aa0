//! Record streams over mapped files.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log;

use crate::reader::MappedReader;
use crate::record::{AcceptAll, Record, RecordFilter};

/// Stream failure identifying the file it happened in.
#[derive(Debug)]
pub struct StreamError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

/// How lines of a stream become records.
#[derive(Clone)]
pub enum Provenance {
    /// Raw source file, records are tagged with the source identifier.
    Source(Arc<str>),
    /// Run file, lines are already tagged and written out unchanged.
    Run,
}

/// Iterator of valid records of a single sorted file.
///
/// Empty lines, lines rejected by the filter and lines shorter than the timestamp prefix are skipped.
pub struct RecordStream {
    reader: MappedReader,
    provenance: Provenance,
    filter: Arc<dyn RecordFilter>,
    accepted: u64,
    skipped: u64,
    exhausted: bool,
}

impl RecordStream {
    /// Creates a stream over a raw source file.
    pub fn source(reader: MappedReader, source_id: Arc<str>, filter: Arc<dyn RecordFilter>) -> Self {
        RecordStream::new(reader, Provenance::Source(source_id), filter)
    }

    /// Creates a stream over a run file.
    pub fn run(reader: MappedReader) -> Self {
        RecordStream::new(reader, Provenance::Run, Arc::new(AcceptAll))
    }

    fn new(reader: MappedReader, provenance: Provenance, filter: Arc<dyn RecordFilter>) -> Self {
        RecordStream {
            reader,
            provenance,
            filter,
            accepted: 0,
            skipped: 0,
            exhausted: false,
        }
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    /// Number of records yielded so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Number of lines dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Returns the next valid record or [`None`] once the file is consumed.
    pub fn next_record(&mut self) -> Result<Option<Record>, StreamError> {
        if self.exhausted {
            return Ok(None);
        }

        loop {
            let line = match self.reader.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.exhausted = true;
                    log::debug!(
                        "{}: exhausted ({} records, {} lines skipped)",
                        self.reader.path().display(),
                        self.accepted,
                        self.skipped
                    );
                    return Ok(None);
                }
                Err(err) => {
                    return Err(StreamError {
                        path: self.reader.path().to_path_buf(),
                        source: err,
                    })
                }
            };

            if line.is_empty() || !self.filter.accept(line) {
                self.skipped += 1;
                continue;
            }

            let record = match &self.provenance {
                Provenance::Source(source_id) => Record::tag(line, source_id.clone()),
                Provenance::Run => Record::tagged(line),
            };

            match record {
                Ok(record) => {
                    self.accepted += 1;
                    return Ok(Some(record));
                }
                Err(err) => {
                    self.skipped += 1;
                    log::trace!("{}: line skipped: {}", self.reader.path().display(), err);
                }
            }
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::sync::Arc;

    use rstest::*;

    use super::RecordStream;
    use crate::reader::MappedReader;
    use crate::record::{MarkerFilter, Record, RecordFilter};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn encode(records: &[Record]) -> Vec<u8> {
        let mut out = Vec::new();
        for record in records {
            record.write_to(&mut out);
        }
        out
    }

    #[rstest]
    fn test_source_stream_skips_invalid(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("IBM.txt");
        fs::write(
            &path,
            "2021-01-01 10:00:00.0000,1\n\
             \n\
             2020-12-31 23:59:59.9999,2\n\
             2021 short\n\
             header line without a timestamp\n\
             2021-01-01 10:00:01.0000,3",
        )
        .unwrap();

        let filter: Arc<dyn RecordFilter> = Arc::new(MarkerFilter::new("2021"));
        let mut stream = RecordStream::source(MappedReader::open(&path, 1).unwrap(), Arc::from("IBM"), filter);
        let records: Result<Vec<Record>, _> = stream.by_ref().collect();
        let records = records.unwrap();

        assert_eq!(
            encode(&records),
            b"2021-01-01 10:00:00.0000IBM,,1\n2021-01-01 10:00:01.0000IBM,,3\n"
        );
        assert_eq!(stream.accepted(), 2);
        assert_eq!(stream.skipped(), 4);
        assert!(stream.next().is_none());
    }

    #[rstest]
    fn test_run_stream_passthrough(tmp_dir: tempfile::TempDir) {
        let content = b"2021-01-01 10:00:00.0000IBM,,1\n2021-01-01 10:00:01.0000MSFT,,2\n";
        let path = tmp_dir.path().join("output_0.dat");
        fs::write(&path, content).unwrap();

        let stream = RecordStream::run(MappedReader::open(&path, 1).unwrap());
        let records: Result<Vec<Record>, _> = stream.collect();

        assert_eq!(encode(&records.unwrap()), content);
    }
}
