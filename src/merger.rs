//! Binary heap merger.

use std::cmp::Ordering;
use std::io::{self, prelude::*};

use crate::line::{LineWriter, ReadLine, Record};

/// Array-backed binary min-heap. The ordering is supplied on every operation.
struct MinHeap<T> {
    items: Vec<T>,
}

impl<T> MinHeap<T> {
    fn with_capacity(capacity: usize) -> Self {
        MinHeap {
            items: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn push<C>(&mut self, item: T, compare: &C)
    where
        C: Fn(&T, &T) -> Ordering,
    {
        self.items.push(item);
        self.sift_up(self.items.len() - 1, compare);
    }

    fn pop<C>(&mut self, compare: &C) -> Option<T>
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let last = self.items.pop()?;
        if self.items.is_empty() {
            return Some(last);
        }

        let top = std::mem::replace(&mut self.items[0], last);
        self.sift_down(0, compare);

        Some(top)
    }

    fn sift_up<C>(&mut self, mut idx: usize, compare: &C)
    where
        C: Fn(&T, &T) -> Ordering,
    {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if compare(&self.items[idx], &self.items[parent]) != Ordering::Less {
                break;
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down<C>(&mut self, mut idx: usize, compare: &C)
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                break;
            }

            let right = left + 1;
            let mut smallest = left;
            if right < len && compare(&self.items[right], &self.items[left]) == Ordering::Less {
                smallest = right;
            }

            if compare(&self.items[smallest], &self.items[idx]) != Ordering::Less {
                break;
            }
            self.items.swap(idx, smallest);
            idx = smallest;
        }
    }
}

/// Pending record together with the index of the source it came from.
struct HeapEntry {
    value: Record,
    source: usize,
}

// Orders entries by value, equal values by source index.
fn entry_order<F>(compare: &F) -> impl Fn(&HeapEntry, &HeapEntry) -> Ordering + '_
where
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    move |a: &HeapEntry, b: &HeapEntry| {
        compare(a.value.as_slice(), b.value.as_slice()).then_with(|| a.source.cmp(&b.source))
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted sources into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of sources. At most one record per source is held at a time.
///
/// A source is pulled again only when the next record is requested, so a popped record is
/// always handed out before its source is touched. The iterator ends after the first error.
pub struct BinaryHeapMerger<S, F>
where
    S: ReadLine,
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    sources: Vec<S>,
    exhausted: Vec<bool>,
    items: MinHeap<HeapEntry>,
    compare: F,
    // source of the last handed out record, pulled before the next pop
    pending: Option<usize>,
    initiated: bool,
    failed: bool,
}

impl<S, F> BinaryHeapMerger<S, F>
where
    S: ReadLine,
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    /// Creates an instance of a binary heap merger using `sources` as inputs.
    /// Source records should be sorted according to `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `sources` - Sources to be merged in a single sorted one
    /// * `compare` - Function to be used to compare records
    pub fn new<I>(sources: I, compare: F) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        let sources = Vec::from_iter(sources);
        let exhausted = vec![false; sources.len()];
        let items = MinHeap::with_capacity(sources.len());

        BinaryHeapMerger {
            sources,
            exhausted,
            items,
            compare,
            pending: None,
            initiated: false,
            failed: false,
        }
    }

    fn pull(&mut self, source: usize) -> io::Result<()> {
        if self.exhausted[source] {
            return Ok(());
        }

        match self.sources[source].read_line()? {
            Some(value) => {
                let order = entry_order(&self.compare);
                self.items.push(HeapEntry { value, source }, &order);
            }
            None => {
                log::debug!("merge source {} exhausted", source);
                self.exhausted[source] = true;
            }
        }

        Ok(())
    }

    fn advance(&mut self) -> io::Result<Option<Record>> {
        if !self.initiated {
            self.initiated = true;
            for source in 0..self.sources.len() {
                self.pull(source)?;
            }
            log::debug!(
                "merge initialized ({} sources, {} active)",
                self.sources.len(),
                self.items.len()
            );
        }

        if let Some(source) = self.pending.take() {
            self.pull(source)?;
        }

        let order = entry_order(&self.compare);
        match self.items.pop(&order) {
            Some(entry) => {
                self.pending = Some(entry.source);
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }
}

impl<S, F> Iterator for BinaryHeapMerger<S, F>
where
    S: ReadLine,
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    type Item = io::Result<Record>;

    /// Returns the next record from the sources in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.advance() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Merges byte-lexicographically sorted `sources` into `writer`.
/// Returns the number of merged records.
pub fn merge<W, S, I>(writer: &mut LineWriter<W>, sources: I) -> io::Result<usize>
where
    W: Write,
    S: ReadLine,
    I: IntoIterator<Item = S>,
{
    merge_by(writer, sources, |a: &[u8], b: &[u8]| a.cmp(b))
}

/// Merges `sources` sorted according to `compare` into `writer`.
/// Returns the number of merged records.
///
/// The first read or write error aborts the merge. Records written before it are left in the sink.
pub fn merge_by<W, S, I, F>(writer: &mut LineWriter<W>, sources: I, compare: F) -> io::Result<usize>
where
    W: Write,
    S: ReadLine,
    I: IntoIterator<Item = S>,
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    let mut merged = 0;
    for record in BinaryHeapMerger::new(sources, compare) {
        writer.write(&record?)?;
        merged += 1;
    }

    log::debug!("merge done ({} records)", merged);

    Ok(merged)
}
