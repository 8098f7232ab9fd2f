//! `line-ext-sort` is an external sort implementation for delimiter-separated records.
//!
//! External sorting handles data that does not fit into the main memory (RAM) of a computer. Sorting is
//! achieved in two passes. During the first pass every chunk of data is sorted on its own, during the second
//! pass the sorted chunks are merged together by a k-way merge holding one record per chunk in memory.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Record oriented:**
//!   a record is any byte sequence without the delimiter (`\n` by default), records are compared
//!   byte-lexicographically unless a custom compare function is provided.
//! * **Storage agnostic:**
//!   chunks are anything implementing [`Chunk`], the crate ships file and in-memory chunks.
//!   Chunk content is replaced through a staging copy so a failed rewrite never corrupts a chunk.
//! * **Multithreading support:**
//!   chunks are sorted in parallel on a thread pool, the merge runs on the calling thread.
//!
//! # Example
//!
//! ```
//! use line_ext_sort::{ExternalSorterBuilder, MemoryChunk};
//!
//! let chunks = vec![MemoryChunk::new("banana\napple"), MemoryChunk::new("cherry")];
//! let sorter = ExternalSorterBuilder::new().with_threads_number(2).build().unwrap();
//!
//! let mut output = Vec::new();
//! sorter.sort(&mut output, &chunks).unwrap();
//!
//! assert_eq!(output, b"apple\nbanana\ncherry\n");
//! ```

pub mod chunk;
pub mod line;
pub mod merger;
pub mod sort;

pub use chunk::{Chunk, ChunkSorter, FileChunk, MemoryChunk};
pub use line::{DelimiterPolicy, LineReader, LineWriter, ReadLine, Record};
pub use merger::{merge, merge_by, BinaryHeapMerger};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError};
