//! External sorter.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};

use rayon::prelude::*;

use crate::chunk::{Chunk, ChunkSorter};
use crate::line::{LineReader, LineWriter, DEFAULT_BUF_SIZE, DEFAULT_DELIMITER};
use crate::merger::merge_by;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Chunk sorting error: chunk index and cause.
    ChunkSort(usize, io::Error),
    /// Sorted chunk could not be opened for merging: chunk index and cause.
    ChunkOpen(usize, io::Error),
    /// Merge read or output write error.
    Merge(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::ThreadPoolBuildError(err) => err,
            SortError::ChunkSort(_, err) => err,
            SortError::ChunkOpen(_, err) => err,
            SortError::Merge(err) => err,
        })
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::ChunkSort(idx, err) => write!(f, "chunk {} sorting failed: {}", idx, err),
            SortError::ChunkOpen(idx, err) => write!(f, "chunk {} could not be opened: {}", idx, err),
            SortError::Merge(err) => write!(f, "chunks merging failed: {}", err),
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Debug, Clone)]
pub struct ExternalSorterBuilder {
    /// Number of threads to be used to sort chunks in parallel.
    threads_number: Option<usize>,
    /// Chunk read buffer size.
    rw_buf_size: Option<usize>,
    /// Record delimiter.
    delimiter: u8,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(self.threads_number, self.rw_buf_size, self.delimiter)
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        self
    }

    /// Sets chunk read buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        self
    }

    /// Sets the record delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> ExternalSorterBuilder {
        self.delimiter = delimiter;
        self
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            rw_buf_size: None,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

/// External sorter.
///
/// Sorts every chunk on its own, then merges the sorted chunks into one output stream.
pub struct ExternalSorter {
    /// Chunk sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Per-chunk sort step.
    chunk_sorter: ChunkSorter,
    /// Chunk read buffer size.
    rw_buf_size: usize,
    /// Record delimiter.
    delimiter: u8,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort chunks in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `rw_buf_size` - Chunk read buffer size. If the parameter is [`None`] the default size is used.
    /// * `delimiter` - Record delimiter.
    pub fn new(threads_number: Option<usize>, rw_buf_size: Option<usize>, delimiter: u8) -> Result<Self, SortError> {
        let rw_buf_size = rw_buf_size.unwrap_or(DEFAULT_BUF_SIZE);

        Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            chunk_sorter: ChunkSorter::new()
                .with_rw_buf_size(rw_buf_size)
                .with_delimiter(delimiter),
            rw_buf_size,
            delimiter,
        })
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(SortError::ThreadPoolBuildError)?;

        Ok(thread_pool)
    }

    /// Sorts the records of all `chunks` in byte-lexicographic order and writes them to `output`.
    /// Returns the number of records written.
    ///
    /// # Arguments
    /// * `output` - Sink the sorted stream is written to
    /// * `chunks` - Chunks to be sorted, each one is rewritten sorted
    pub fn sort<W, C>(&self, output: W, chunks: &[C]) -> Result<usize, SortError>
    where
        W: Write,
        C: Chunk,
    {
        self.sort_by(output, chunks, |a: &[u8], b: &[u8]| a.cmp(b))
    }

    /// Sorts the records of all `chunks` using a custom compare function and writes them to `output`.
    /// Returns the number of records written.
    ///
    /// Chunks are sorted in parallel, the merge runs on the calling thread. The first error aborts
    /// the whole run, records already written to `output` are not rolled back.
    ///
    /// # Arguments
    /// * `output` - Sink the sorted stream is written to
    /// * `chunks` - Chunks to be sorted, each one is rewritten sorted
    /// * `compare` - Function to be used to compare records
    pub fn sort_by<W, C, F>(&self, output: W, chunks: &[C], compare: F) -> Result<usize, SortError>
    where
        W: Write,
        C: Chunk,
        F: Fn(&[u8], &[u8]) -> Ordering + Sync + Send,
    {
        self.sort_chunks(chunks, &compare)?;
        log::debug!("external sort preparation done");

        let mut readers = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let chunk_reader = chunk.open_read().map_err(|err| SortError::ChunkOpen(idx, err))?;
            readers.push(LineReader::with_capacity(self.rw_buf_size, chunk_reader).with_delimiter(self.delimiter));
        }

        let mut output_writer = LineWriter::new(output).with_delimiter(self.delimiter);
        let merged = merge_by(&mut output_writer, readers, &compare).map_err(SortError::Merge)?;
        output_writer.flush().map_err(SortError::Merge)?;

        log::debug!("external sort done ({} chunks, {} records)", chunks.len(), merged);

        Ok(merged)
    }

    fn sort_chunks<C, F>(&self, chunks: &[C], compare: &F) -> Result<(), SortError>
    where
        C: Chunk,
        F: Fn(&[u8], &[u8]) -> Ordering + Sync + Send,
    {
        let chunk_sorter = &self.chunk_sorter;
        let results: Vec<io::Result<usize>> = self.thread_pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| chunk_sorter.sort_by(chunk, compare))
                .collect()
        });

        // report the lowest failing chunk index whatever the completion order was
        for (idx, result) in results.into_iter().enumerate() {
            let records = result.map_err(|err| SortError::ChunkSort(idx, err))?;
            log::debug!("chunk {} sorted ({} records)", idx, records);
        }

        Ok(())
    }
}
