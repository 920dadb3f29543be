//! Chunk Index - static map of time-aligned fine-tier chunks
//!
//! Built once from the dataset extent. Chunk ids are the aligned chunk
//! start timestamps, so `floor(t / chunk_size) * chunk_size` names the
//! chunk holding `t`.
//!
//! ```text
//! extent [0, 3.6e9], chunk_size 6e7
//!   → ids 0, 6e7, 1.2e8, ... 3.54e9, 3.6e9   (61 chunks)
//! ```

use crate::data::TimeDomain;
use crate::resolution::ResolutionError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aligned chunk start timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChunkId(pub i64);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk@{}", self.0)
    }
}

/// Bounds of one chunk: [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkBounds {
    pub start: i64,
    pub end: i64,
}

impl ChunkBounds {
    pub fn as_domain(&self) -> TimeDomain {
        TimeDomain::new(self.start, self.end)
    }
}

/// Immutable chunk map covering the dataset extent
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    chunk_size: i64,
    chunks: BTreeMap<ChunkId, ChunkBounds>,
}

impl ChunkIndex {
    /// Build the index for `[min_time, max_time]`
    pub fn build(min_time: i64, max_time: i64, chunk_size: i64) -> Result<Self, ResolutionError> {
        if chunk_size <= 0 {
            return Err(ResolutionError::InvalidConfig(format!(
                "chunk size must be positive, got {}",
                chunk_size
            )));
        }
        if min_time > max_time {
            return Err(ResolutionError::InvalidDomain {
                start: min_time,
                end: max_time,
            });
        }

        let mut chunks = BTreeMap::new();
        let mut start = align(min_time, chunk_size);
        while start <= max_time {
            chunks.insert(
                ChunkId(start),
                ChunkBounds {
                    start,
                    end: start + chunk_size,
                },
            );
            start += chunk_size;
        }

        tracing::debug!(chunks = chunks.len(), chunk_size, "Built chunk index");

        Ok(Self { chunk_size, chunks })
    }

    pub fn chunk_size(&self) -> i64 {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Id of the chunk holding `timestamp` (may lie outside the index)
    pub fn chunk_id_for(&self, timestamp: i64) -> ChunkId {
        ChunkId(align(timestamp, self.chunk_size))
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    pub fn bounds(&self, id: ChunkId) -> Option<ChunkBounds> {
        self.chunks.get(&id).copied()
    }

    /// Bounds of a chunk, or `StaleChunk` for ids outside the index
    pub fn require(&self, id: ChunkId) -> Result<ChunkBounds, ResolutionError> {
        self.bounds(id).ok_or(ResolutionError::StaleChunk(id))
    }

    /// Chunk ids overlapping `[domain.start, domain.end]`, in time order
    ///
    /// The end is inclusive, matching fine-tier record filtering.
    pub fn chunks_for_domain(&self, domain: &TimeDomain) -> Vec<ChunkId> {
        let first = self.chunk_id_for(domain.start);
        let last = self.chunk_id_for(domain.end);
        self.chunks.range(first..=last).map(|(id, _)| *id).collect()
    }

    /// Up to `count` indexed chunk ids before `first` and after `last`
    ///
    /// Returned nearest first on each side.
    pub fn neighbours(&self, first: ChunkId, last: ChunkId, count: usize) -> (Vec<ChunkId>, Vec<ChunkId>) {
        let before = self
            .chunks
            .range(..first)
            .rev()
            .take(count)
            .map(|(id, _)| *id)
            .collect();
        let after = self
            .chunks
            .range((std::ops::Bound::Excluded(last), std::ops::Bound::Unbounded))
            .take(count)
            .map(|(id, _)| *id)
            .collect();
        (before, after)
    }

    /// Iterate all chunk ids in time order
    pub fn ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.chunks.keys().copied()
    }
}

fn align(timestamp: i64, chunk_size: i64) -> i64 {
    timestamp.div_euclid(chunk_size) * chunk_size
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000_000;

    #[test]
    fn test_build_covers_extent() {
        let index = ChunkIndex::build(0, 3_600_000_000, MINUTE).unwrap();

        assert_eq!(index.len(), 61);
        assert!(index.contains(ChunkId(0)));
        assert!(index.contains(ChunkId(3_600_000_000)));
        assert!(!index.contains(ChunkId(3_660_000_000)));
        assert_eq!(
            index.bounds(ChunkId(MINUTE)),
            Some(ChunkBounds {
                start: MINUTE,
                end: 2 * MINUTE
            })
        );
    }

    #[test]
    fn test_unaligned_min_time_aligns_down() {
        let index = ChunkIndex::build(90_000_000, 150_000_000, MINUTE).unwrap();
        let ids: Vec<_> = index.ids().collect();
        assert_eq!(ids, vec![ChunkId(MINUTE), ChunkId(2 * MINUTE)]);
    }

    #[test]
    fn test_chunks_for_domain() {
        let index = ChunkIndex::build(0, 3_600_000_000, MINUTE).unwrap();
        let domain = TimeDomain::new(1_000_000_000, 1_030_000_000);

        assert_eq!(
            index.chunks_for_domain(&domain),
            vec![ChunkId(960_000_000), ChunkId(1_020_000_000)]
        );
    }

    #[test]
    fn test_chunks_for_domain_clipped_to_index() {
        let index = ChunkIndex::build(0, 3 * MINUTE, MINUTE).unwrap();
        let domain = TimeDomain::new(-5 * MINUTE, MINUTE / 2);

        assert_eq!(index.chunks_for_domain(&domain), vec![ChunkId(0)]);
    }

    #[test]
    fn test_neighbours_skip_outside_index() {
        let index = ChunkIndex::build(0, 5 * MINUTE, MINUTE).unwrap();

        let (before, after) = index.neighbours(ChunkId(MINUTE), ChunkId(2 * MINUTE), 2);
        assert_eq!(before, vec![ChunkId(0)]);
        assert_eq!(after, vec![ChunkId(3 * MINUTE), ChunkId(4 * MINUTE)]);
    }

    #[test]
    fn test_require_reports_stale_chunk() {
        let index = ChunkIndex::build(0, MINUTE, MINUTE).unwrap();
        let err = index.require(ChunkId(7)).unwrap_err();
        assert!(matches!(err, ResolutionError::StaleChunk(ChunkId(7))));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(ChunkIndex::build(0, 10, 0).is_err());
        assert!(ChunkIndex::build(10, 0, MINUTE).is_err());
    }
}
