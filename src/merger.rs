//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;

use crate::record::Record;

/// Heap entry ordered by the record timestamp prefix, then by the index of the stream it came from.
struct HeapItem {
    record: Record,
    idx: usize,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .prefix()
            .cmp(other.record.prefix())
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

/// Binary heap merger implementation.
/// Merges multiple record streams sorted by timestamp prefix into a single sorted output.
/// Records with equal prefixes are yielded in stream index order, duplicates are kept.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of streams.
pub struct BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<Record, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<std::cmp::Reverse<HeapItem>>,
    chunks: Vec<C::IntoIter>,
    initiated: bool,
}

impl<E, C> BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<Record, E>>,
{
    /// Creates an instance of a binary heap merger using streams as inputs.
    /// Stream records should be sorted by prefix in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Streams to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: false,
        };
    }

    /// Returns the merged streams.
    pub fn chunks(&self) -> &[C::IntoIter] {
        &self.chunks
    }

    /// Number of streams still having records in the heap.
    pub fn active(&self) -> usize {
        self.items.len()
    }
}

impl<E, C> Iterator for BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<Record, E>>,
{
    type Item = Result<Record, E>;

    /// Returns the next record from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for (idx, chunk) in self.chunks.iter_mut().enumerate() {
                if let Some(item) = chunk.next() {
                    match item {
                        Ok(record) => self.items.push(std::cmp::Reverse(HeapItem { record, idx })),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            self.initiated = true;
        }

        let std::cmp::Reverse(HeapItem { record, idx }) = self.items.pop()?;
        if let Some(item) = self.chunks[idx].next() {
            match item {
                Ok(next) => self.items.push(std::cmp::Reverse(HeapItem { record: next, idx })),
                Err(err) => return Some(Err(err)),
            }
        }

        return Some(Ok(record));
    }
}
