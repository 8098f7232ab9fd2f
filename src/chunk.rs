//! Chunk storage handles and the per-chunk sort step.

use std::cmp::Ordering;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rayon::slice::ParallelSliceMut;

use crate::line::{LineReader, LineWriter, Record, DEFAULT_BUF_SIZE, DEFAULT_DELIMITER};

/// Chunk interface. Provides methods for reading chunk content and replacing it as a whole.
pub trait Chunk: Send + Sync {
    type Reader: Read;

    /// Opens the chunk for reading from its start.
    fn open_read(&self) -> io::Result<Self::Reader>;

    /// Replaces the chunk content with whatever `fill` writes.
    ///
    /// The new content is staged separately and swapped in only after `fill` succeeded,
    /// on failure the previous content stays untouched.
    fn replace<F>(&self, fill: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>;
}

/// Chunk stored in a file.
///
/// Replacement writes a temporary file next to the original and renames it over the original.
#[derive(Debug, Clone)]
pub struct FileChunk {
    path: PathBuf,
}

impl FileChunk {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileChunk { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // rename is only atomic within one file system so the staging file lives in the chunk's directory
    fn staging_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl Chunk for FileChunk {
    type Reader = fs::File;

    fn open_read(&self) -> io::Result<fs::File> {
        fs::File::open(&self.path)
    }

    fn replace<F>(&self, fill: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let tmp_file = tempfile::NamedTempFile::new_in(self.staging_dir())?;

        let mut chunk_writer = io::BufWriter::new(tmp_file);
        fill(&mut chunk_writer)?;
        let tmp_file = chunk_writer.into_inner().map_err(|err| err.into_error())?;

        if let Ok(metadata) = fs::metadata(&self.path) {
            tmp_file.as_file().set_permissions(metadata.permissions())?;
        }
        tmp_file.as_file().sync_all()?;
        tmp_file.persist(&self.path).map_err(|err| err.error)?;

        log::debug!("chunk {} replaced", self.path.display());

        Ok(())
    }
}

/// Chunk held in memory. Clones share the same content.
#[derive(Debug, Clone, Default)]
pub struct MemoryChunk {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryChunk {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        MemoryChunk {
            data: Arc::new(Mutex::new(data.into())),
        }
    }

    /// Returns a copy of the current content.
    pub fn contents(&self) -> io::Result<Vec<u8>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Vec<u8>>> {
        self.data
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory chunk lock poisoned"))
    }
}

impl Chunk for MemoryChunk {
    type Reader = io::Cursor<Vec<u8>>;

    fn open_read(&self) -> io::Result<Self::Reader> {
        Ok(io::Cursor::new(self.contents()?))
    }

    fn replace<F>(&self, fill: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut staged = Vec::new();
        fill(&mut staged)?;
        *self.lock()? = staged;

        Ok(())
    }
}

/// Sorts a single chunk: loads every record, orders them and replaces the chunk content.
#[derive(Debug, Clone)]
pub struct ChunkSorter {
    /// Record reader refill size.
    rw_buf_size: usize,
    /// Record delimiter.
    delimiter: u8,
}

impl ChunkSorter {
    pub fn new() -> Self {
        ChunkSorter::default()
    }

    /// Sets chunk read buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = buf_size;
        self
    }

    /// Sets the record delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sorts chunk records in byte-lexicographic order.
    /// Returns the number of records in the chunk.
    pub fn sort<C: Chunk>(&self, chunk: &C) -> io::Result<usize> {
        self.sort_by(chunk, |a: &[u8], b: &[u8]| a.cmp(b))
    }

    /// Sorts chunk records using a custom compare function.
    /// Returns the number of records in the chunk.
    ///
    /// # Arguments
    /// * `chunk` - Chunk to be sorted
    /// * `compare` - Function to be used to compare records
    pub fn sort_by<C, F>(&self, chunk: &C, compare: F) -> io::Result<usize>
    where
        C: Chunk,
        F: Fn(&[u8], &[u8]) -> Ordering + Sync,
    {
        let records = self.load(chunk)?;
        log::debug!("sorting chunk data ({} records) ...", records.len());

        let records = Self::order(records, &compare);

        log::debug!("saving chunk data");
        let delimiter = self.delimiter;
        chunk.replace(|sink| {
            let mut chunk_writer = LineWriter::new(sink).with_delimiter(delimiter);
            for record in &records {
                chunk_writer.write(record)?;
            }
            chunk_writer.flush()
        })?;

        Ok(records.len())
    }

    fn load<C: Chunk>(&self, chunk: &C) -> io::Result<Vec<Record>> {
        let mut chunk_reader =
            LineReader::with_capacity(self.rw_buf_size, chunk.open_read()?).with_delimiter(self.delimiter);

        let mut records = Vec::new();
        while let Some(record) = chunk_reader.read_line()? {
            records.push(record);
        }

        Ok(records)
    }

    fn order<F>(mut records: Vec<Record>, compare: &F) -> Vec<Record>
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Sync,
    {
        records.par_sort_unstable_by(|a, b| compare(a.as_slice(), b.as_slice()));
        records
    }
}

impl Default for ChunkSorter {
    fn default() -> Self {
        ChunkSorter {
            rw_buf_size: DEFAULT_BUF_SIZE,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}
