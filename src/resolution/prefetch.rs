//! Prefetch Queue - speculative chunk loading order
//!
//! The queue only decides *what* to load next. The manager owns the drain
//! loop, which pops one id at a time, loads it through the same
//! de-duplicated path as interactive requests and yields between items.
//! At most one drain loop runs at a time.

use crate::cache::{ChunkId, ChunkIndex};
use crate::data::TimeDomain;
use std::collections::{HashSet, VecDeque};

/// FIFO of chunk ids awaiting speculative load
#[derive(Debug, Default)]
pub struct PrefetchQueue {
    queue: VecDeque<ChunkId>,
    queued: HashSet<ChunkId>,
    draining: bool,
    processed: u64,
    skipped: u64,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue chunks around `domain`
    ///
    /// Takes the chunks in view plus up to `count` indexed neighbours on
    /// each side, nearest first, and appends every id for which `known`
    /// (cached or loading) is false and that is not already queued.
    /// Returns the number of ids appended.
    pub fn enqueue_adjacent<F>(
        &mut self,
        index: &ChunkIndex,
        domain: &TimeDomain,
        count: usize,
        known: F,
    ) -> usize
    where
        F: Fn(ChunkId) -> bool,
    {
        let in_view = index.chunks_for_domain(domain);
        let (first, last) = match (in_view.first(), in_view.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                let id = index.chunk_id_for(domain.start);
                (id, id)
            }
        };
        let (before, after) = index.neighbours(first, last, count);

        let mut candidates = in_view;
        // Interleave so the nearest neighbours on both sides come first
        for i in 0..before.len().max(after.len()) {
            if let Some(id) = after.get(i) {
                candidates.push(*id);
            }
            if let Some(id) = before.get(i) {
                candidates.push(*id);
            }
        }

        let mut added = 0;
        for id in candidates {
            if known(id) || self.queued.contains(&id) {
                continue;
            }
            self.queued.insert(id);
            self.queue.push_back(id);
            added += 1;
        }
        added
    }

    /// Queue a single chunk id
    pub fn push(&mut self, id: ChunkId) -> bool {
        if !self.queued.insert(id) {
            return false;
        }
        self.queue.push_back(id);
        true
    }

    /// Claim the drain loop; false if one is already running
    pub fn try_begin_drain(&mut self) -> bool {
        if self.draining {
            return false;
        }
        self.draining = true;
        true
    }

    /// Next id to load, skipping ones that became known since enqueue
    ///
    /// Returns `None` and releases the drain claim once the queue is empty,
    /// in the same step, so a concurrent enqueue always sees either an
    /// active drain loop or a free one.
    pub fn pop_next<F>(&mut self, known: F) -> Option<ChunkId>
    where
        F: Fn(ChunkId) -> bool,
    {
        while let Some(id) = self.queue.pop_front() {
            self.queued.remove(&id);
            if known(id) {
                self.skipped += 1;
                continue;
            }
            self.processed += 1;
            return Some(id);
        }
        self.draining = false;
        None
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ids handed to the drain loop so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Ids dropped because they were cached or loading by the time they
    /// reached the head
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Snapshot of queued ids in order
    pub fn pending(&self) -> Vec<ChunkId> {
        self.queue.iter().copied().collect()
    }

    /// Drop all queued ids
    ///
    /// A running drain loop stops at its next pop.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000_000;

    fn index() -> ChunkIndex {
        ChunkIndex::build(0, 10 * MINUTE, MINUTE).unwrap()
    }

    #[test]
    fn test_enqueue_adjacent_order() {
        let mut queue = PrefetchQueue::new();
        let domain = TimeDomain::new(4 * MINUTE + 10, 5 * MINUTE + 10);

        let added = queue.enqueue_adjacent(&index(), &domain, 2, |_| false);

        assert_eq!(added, 6);
        assert_eq!(
            queue.pending(),
            vec![
                ChunkId(4 * MINUTE),
                ChunkId(5 * MINUTE),
                ChunkId(6 * MINUTE),
                ChunkId(3 * MINUTE),
                ChunkId(7 * MINUTE),
                ChunkId(2 * MINUTE),
            ]
        );
    }

    #[test]
    fn test_enqueue_skips_known_queued_and_out_of_index() {
        let mut queue = PrefetchQueue::new();
        let domain = TimeDomain::new(10, 20);

        // Chunk 0 is already cached; there is nothing before it
        let added = queue.enqueue_adjacent(&index(), &domain, 3, |id| id == ChunkId(0));
        assert_eq!(added, 3);
        assert_eq!(
            queue.pending(),
            vec![ChunkId(MINUTE), ChunkId(2 * MINUTE), ChunkId(3 * MINUTE)]
        );

        // Re-enqueueing the same neighbourhood adds nothing new
        assert_eq!(queue.enqueue_adjacent(&index(), &domain, 3, |_| false), 1);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_drain_claim_is_exclusive() {
        let mut queue = PrefetchQueue::new();
        queue.push(ChunkId(0));

        assert!(queue.try_begin_drain());
        assert!(!queue.try_begin_drain());

        assert_eq!(queue.pop_next(|_| false), Some(ChunkId(0)));
        assert!(queue.is_draining());
        assert_eq!(queue.pop_next(|_| false), None);
        assert!(!queue.is_draining());
        assert!(queue.try_begin_drain());
    }

    #[test]
    fn test_pop_skips_ids_that_became_known() {
        let mut queue = PrefetchQueue::new();
        queue.push(ChunkId(0));
        queue.push(ChunkId(MINUTE));
        assert!(!queue.push(ChunkId(0)));

        assert_eq!(queue.pop_next(|id| id == ChunkId(0)), Some(ChunkId(MINUTE)));
        assert_eq!(queue.skipped(), 1);
        assert_eq!(queue.processed(), 1);
    }
}
