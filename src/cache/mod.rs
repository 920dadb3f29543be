//! Fine-tier caching structures
//!
//! - **lru**: Fixed-capacity least-recently-used payload cache
//! - **chunk_index**: Static map of time-aligned chunk bounds

pub mod chunk_index;
pub mod lru;

pub use chunk_index::{ChunkBounds, ChunkId, ChunkIndex};
pub use lru::EvictionCache;
