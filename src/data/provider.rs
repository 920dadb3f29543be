//! Data provider seam
//!
//! The manager never computes aggregates or reads files itself. Everything
//! it shows comes from a `DataProvider`, which is treated as a stateless,
//! read-only collaborator and may be arbitrarily slow.

use async_trait::async_trait;

use super::error::ProviderResult;
use super::types::{Bin, Record, TimeDomain};

/// Source of tiered packet data
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Overall dataset bounds `(min, max)` in microseconds
    async fn time_extent(&self) -> ProviderResult<(i64, i64)>;

    /// Whole-dataset coarse bins
    async fn coarse_aggregates(&self) -> ProviderResult<Vec<Bin>>;

    /// Medium bins overlapping `domain`
    async fn medium_aggregates(&self, domain: TimeDomain) -> ProviderResult<Vec<Bin>>;

    /// Raw records with `range.start <= timestamp < range.end`, at most `limit`
    async fn detail_data(&self, range: TimeDomain, limit: usize) -> ProviderResult<Vec<Record>>;
}
