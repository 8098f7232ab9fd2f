//! Delimiter-terminated record reader and writer.

use std::io::{self, prelude::*};

/// A single record: an opaque byte sequence that does not contain the delimiter.
pub type Record = Vec<u8>;

/// Default record delimiter.
pub const DEFAULT_DELIMITER: u8 = b'\n';

/// Default number of bytes requested from the underlying source on each refill.
pub const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Source of records. Exhaustion is reported as `Ok(None)` and is never an error.
pub trait ReadLine {
    /// Returns the next record, or `None` once the source is exhausted.
    fn read_line(&mut self) -> io::Result<Option<Record>>;
}

impl<T: ReadLine + ?Sized> ReadLine for &mut T {
    fn read_line(&mut self) -> io::Result<Option<Record>> {
        (**self).read_line()
    }
}

impl<T: ReadLine + ?Sized> ReadLine for Box<T> {
    fn read_line(&mut self) -> io::Result<Option<Record>> {
        (**self).read_line()
    }
}

/// Buffered record decoder.
///
/// Records may straddle any number of physical reads from the underlying source.
/// Trailing bytes not followed by a delimiter are returned once as a final record.
pub struct LineReader<R> {
    inner: R,
    delimiter: u8,
    refill_size: usize,
    buf: Vec<u8>,
    // start of the unconsumed part of `buf`
    pos: usize,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    /// Creates a reader with the default refill size.
    pub fn new(inner: R) -> Self {
        LineReader::with_capacity(DEFAULT_BUF_SIZE, inner)
    }

    /// Creates a reader requesting `capacity` bytes from `inner` per refill.
    ///
    /// # Arguments
    /// * `capacity` - Refill increment in bytes, values below 1 are raised to 1
    /// * `inner` - Underlying byte source
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        let refill_size = capacity.max(1);
        LineReader {
            inner,
            delimiter: DEFAULT_DELIMITER,
            refill_size,
            buf: Vec::with_capacity(refill_size),
            pos: 0,
            eof: false,
        }
    }

    /// Sets the record delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Returns the next record, `Ok(None)` on exhaustion.
    pub fn read_line(&mut self) -> io::Result<Option<Record>> {
        let delimiter = self.delimiter;
        // buf[pos..scanned] is known to be delimiter-free
        let mut scanned = self.pos;

        loop {
            if let Some(offset) = self.buf[scanned..].iter().position(|&b| b == delimiter) {
                let end = scanned + offset;
                let record = self.buf[self.pos..end].to_vec();
                self.pos = end + 1;
                return Ok(Some(record));
            }

            if self.eof {
                if self.pos == self.buf.len() {
                    return Ok(None);
                }
                let record = self.buf[self.pos..].to_vec();
                self.pos = self.buf.len();
                return Ok(Some(record));
            }

            let pending = self.buf.len() - self.pos;
            self.fill_buf()?;
            scanned = pending;
        }
    }

    /// Checks that the source reached its end and every buffered byte was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.eof && self.pos == self.buf.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps the reader, dropping any buffered bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }

    // Moves the unconsumed tail to the front of the buffer and appends one read from the source.
    fn fill_buf(&mut self) -> io::Result<()> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let filled = self.buf.len();
        self.buf.resize(filled + self.refill_size, 0);

        loop {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) => {
                    self.buf.truncate(filled);
                    self.eof = true;
                    log::trace!("line source exhausted ({} bytes pending)", filled);
                    return Ok(());
                }
                Ok(read) => {
                    self.buf.truncate(filled + read);
                    log::trace!("line buffer refilled ({} bytes read)", read);
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buf.truncate(filled);
                    return Err(err);
                }
            }
        }
    }
}

impl<R: Read> ReadLine for LineReader<R> {
    fn read_line(&mut self) -> io::Result<Option<Record>> {
        LineReader::read_line(self)
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}

/// What [`LineWriter`] does with a value containing the delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimiterPolicy {
    /// Each delimiter-separated segment is written as its own record.
    Split,
    /// The value is rejected with [`io::ErrorKind::InvalidInput`] and nothing is written.
    Reject,
}

impl Default for DelimiterPolicy {
    fn default() -> Self {
        DelimiterPolicy::Split
    }
}

/// Record encoder. Every record is followed by exactly one delimiter.
pub struct LineWriter<W> {
    inner: W,
    delimiter: u8,
    policy: DelimiterPolicy,
    scratch: Vec<u8>,
    records_written: usize,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        LineWriter {
            inner,
            delimiter: DEFAULT_DELIMITER,
            policy: DelimiterPolicy::default(),
            scratch: Vec::new(),
            records_written: 0,
        }
    }

    /// Sets the record delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the embedded delimiter policy.
    pub fn with_policy(mut self, policy: DelimiterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Writes `value` as one or more delimiter-terminated records.
    ///
    /// Under [`DelimiterPolicy::Split`] the value `"a\nb"` becomes the records `"a"` and `"b"`,
    /// and `"a\n"` becomes `"a"` followed by an empty record.
    /// The first failed write aborts the call, bytes written before it stay in the sink.
    pub fn write(&mut self, value: &[u8]) -> io::Result<()> {
        let delimiter = self.delimiter;

        if self.policy == DelimiterPolicy::Reject && value.contains(&delimiter) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "record contains the delimiter",
            ));
        }

        for segment in value.split(|&b| b == delimiter) {
            self.scratch.clear();
            self.scratch.extend_from_slice(segment);
            self.scratch.push(delimiter);
            self.inner.write_all(&self.scratch)?;
            self.records_written += 1;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Returns the number of records written so far.
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::io::{self, ErrorKind, Read, Write};

    use rstest::*;

    use super::{DelimiterPolicy, LineReader, LineWriter, Record};

    /// Hands out at most `step` bytes per read.
    struct TrickleReader {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl TrickleReader {
        fn new(data: &[u8], step: usize) -> Self {
            TrickleReader {
                data: data.to_vec(),
                pos: 0,
                step,
            }
        }
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..len].copy_from_slice(&self.data[self.pos..self.pos + len]);
            self.pos += len;
            Ok(len)
        }
    }

    /// Replays a fixed sequence of read outcomes.
    struct ScriptedReader {
        script: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(data)) => {
                    assert!(data.len() <= buf.len());
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
            }
        }
    }

    /// Accepts `budget` write calls, then fails.
    struct FailingWriter {
        written: Vec<u8>,
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(ErrorKind::Other, "sink closed"));
            }
            self.budget -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn read_all<R: Read>(reader: &mut LineReader<R>) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(record) = reader.read_line().unwrap() {
            records.push(record);
        }
        records
    }

    fn records(items: &[&str]) -> Vec<Record> {
        items.iter().map(|item| item.as_bytes().to_vec()).collect()
    }

    #[rstest]
    #[case(b"", vec![])]
    #[case(b"a\nb", vec!["a", "b"])]
    #[case(b"a\nb\n", vec!["a", "b"])]
    #[case(b"\n\n", vec!["", ""])]
    #[case(b"a\n\nb", vec!["a", "", "b"])]
    #[case(b"single", vec!["single"])]
    fn test_line_reader(#[case] input: &[u8], #[case] expected: Vec<&str>, #[values(1, 2, 3, 1024)] step: usize) {
        let mut reader = LineReader::with_capacity(step, TrickleReader::new(input, step));
        assert_eq!(read_all(&mut reader), records(&expected));
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_line_reader_no_trailing_delimiter() {
        let mut reader = LineReader::new(TrickleReader::new(b"a\nb", 1024));

        assert_eq!(reader.read_line().unwrap(), Some(b"a".to_vec()));
        assert_eq!(reader.read_line().unwrap(), Some(b"b".to_vec()));
        assert_eq!(reader.read_line().unwrap(), None);
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_record_straddles_reads() {
        let long = "x".repeat(100);
        let input = format!("{}\nshort\n{}", long, long);

        // every record spans many physical reads
        let mut reader = LineReader::with_capacity(7, TrickleReader::new(input.as_bytes(), 3));

        assert_eq!(read_all(&mut reader), records(&[long.as_str(), "short", long.as_str()]));
    }

    #[test]
    fn test_line_reader_propagates_error() {
        let reader = ScriptedReader {
            script: VecDeque::from(vec![
                Ok(b"first\nsec".to_vec()),
                Err(io::Error::new(ErrorKind::Other, "device gone")),
                Ok(b"ond\n".to_vec()),
            ]),
        };
        let mut reader = LineReader::new(reader);

        assert_eq!(reader.read_line().unwrap(), Some(b"first".to_vec()));
        let err = reader.read_line().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(!reader.is_exhausted());

        // pending bytes survive the failed refill
        assert_eq!(reader.read_line().unwrap(), Some(b"second".to_vec()));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_retries_interrupted() {
        let reader = ScriptedReader {
            script: VecDeque::from(vec![
                Ok(b"par".to_vec()),
                Err(io::Error::new(ErrorKind::Interrupted, "signal")),
                Ok(b"tial\n".to_vec()),
            ]),
        };
        let mut reader = LineReader::new(reader);

        assert_eq!(reader.read_line().unwrap(), Some(b"partial".to_vec()));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_custom_delimiter() {
        let reader = LineReader::new(TrickleReader::new(b"a\nb\0c", 2)).with_delimiter(b'\0');
        let actual: Result<Vec<Record>, io::Error> = reader.collect();

        assert_eq!(actual.unwrap(), records(&["a\nb", "c"]));
    }

    #[rstest]
    #[case(b"apple", b"apple\n")]
    #[case(b"", b"\n")]
    #[case(b"a\nb", b"a\nb\n")]
    #[case(b"a\n", b"a\n\n")]
    fn test_line_writer_split(#[case] value: &[u8], #[case] expected: &[u8]) {
        let mut writer = LineWriter::new(Vec::new());
        writer.write(value).unwrap();

        assert_eq!(writer.get_ref().as_slice(), expected);
    }

    #[test]
    fn test_line_writer_counts_segments() {
        let mut writer = LineWriter::new(Vec::new());
        writer.write(b"one\ntwo\nthree").unwrap();
        writer.write(b"four").unwrap();

        assert_eq!(writer.records_written(), 4);
        assert_eq!(writer.into_inner(), b"one\ntwo\nthree\nfour\n".to_vec());
    }

    #[test]
    fn test_line_writer_reject() {
        let mut writer = LineWriter::new(Vec::new()).with_policy(DelimiterPolicy::Reject);
        writer.write(b"fine").unwrap();

        let err = writer.write(b"not\nfine").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(writer.get_ref().as_slice(), b"fine\n");
    }

    #[test]
    fn test_line_writer_failure_keeps_flushed_bytes() {
        let sink = FailingWriter {
            written: Vec::new(),
            budget: 2,
        };
        let mut writer = LineWriter::new(sink);

        let err = writer.write(b"a\nb\nc\nd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(writer.records_written(), 2);
        assert_eq!(writer.get_ref().written, b"a\nb\n".to_vec());
    }
}
