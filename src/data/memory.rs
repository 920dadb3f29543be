//! In-memory data provider
//!
//! Holds a sorted packet list and derives coarse/medium bins on demand.
//! Used by the demo CLI, the benchmarks and the tests, where its call
//! counters, injected latency and failure switches make the manager's
//! de-duplication and error paths observable.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::error::{ProviderError, ProviderResult};
use super::provider::DataProvider;
use super::types::{Bin, Record, TimeDomain, MICROS_PER_MINUTE, MICROS_PER_SEC};

/// Aggregate records into bins of `width` microseconds
///
/// One bin is emitted per (bucket, source, destination) triple, ordered by
/// bucket start then endpoint ids.
pub fn aggregate_bins(records: &[Record], width: i64) -> Vec<Bin> {
    let mut buckets: BTreeMap<(i64, u32, u32), (u64, u64)> = BTreeMap::new();

    for record in records {
        let start = record.timestamp.div_euclid(width) * width;
        let entry = buckets
            .entry((start, record.src_id, record.dst_id))
            .or_insert((0, 0));
        entry.0 += 1;
        entry.1 += record.length as u64;
    }

    buckets
        .into_iter()
        .map(|((start, src_id, dst_id), (count, byte_total))| Bin {
            start,
            end: start + width,
            count,
            byte_total,
            src_id,
            dst_id,
        })
        .collect()
}

/// Per-method call counters
#[derive(Debug, Default)]
pub struct CallCounters {
    pub extent: AtomicU64,
    pub coarse: AtomicU64,
    pub medium: AtomicU64,
    pub detail: AtomicU64,
}

/// Provider backed by a sorted in-memory packet list
pub struct InMemoryProvider {
    name: String,
    /// Records sorted by timestamp
    records: Vec<Record>,
    /// Explicit extent (defaults to the record bounds)
    extent: Option<(i64, i64)>,
    coarse_width: i64,
    medium_width: i64,
    /// Artificial delay applied to every async call
    latency: Duration,
    calls: CallCounters,
    /// Detail fetch count per range start
    detail_calls: Mutex<BTreeMap<i64, u64>>,
    fail_medium: AtomicBool,
    fail_coarse: AtomicBool,
    /// Range starts whose detail fetch fails
    failing_ranges: Mutex<HashSet<i64>>,
}

impl InMemoryProvider {
    /// Create a provider over the given records
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            name: "memory".to_string(),
            records,
            extent: None,
            coarse_width: MICROS_PER_MINUTE,
            medium_width: MICROS_PER_SEC,
            latency: Duration::ZERO,
            calls: CallCounters::default(),
            detail_calls: Mutex::new(BTreeMap::new()),
            fail_medium: AtomicBool::new(false),
            fail_coarse: AtomicBool::new(false),
            failing_ranges: Mutex::new(HashSet::new()),
        }
    }

    /// Generate a deterministic synthetic capture
    ///
    /// Emits one packet every `interval` microseconds across
    /// `[start, end]`, cycling through a handful of endpoints.
    pub fn synthetic(start: i64, end: i64, interval: i64) -> Self {
        let interval = interval.max(1);
        let mut records = Vec::with_capacity(((end - start) / interval).max(0) as usize + 1);
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut ts = start;

        while ts <= end {
            // xorshift keeps the fixture reproducible without a rand dependency
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;

            records.push(Record {
                timestamp: ts,
                length: 60 + (state % 1400) as u32,
                flags: (state >> 16) as u8 & 0x3f,
                src_id: (state >> 24) as u32 % 8,
                dst_id: (state >> 32) as u32 % 8,
                src_port: 1024 + (state >> 40) as u16 % 4096,
                dst_port: [80, 443, 53, 22][(state >> 48) as usize % 4],
            });
            ts += interval;
        }

        Self::new(records).with_extent(start, end)
    }

    /// Builder: override the reported time extent
    pub fn with_extent(mut self, min: i64, max: i64) -> Self {
        self.extent = Some((min, max));
        self
    }

    /// Builder: set bin widths for coarse and medium tiers
    pub fn with_bin_widths(mut self, coarse: i64, medium: i64) -> Self {
        self.coarse_width = coarse.max(1);
        self.medium_width = medium.max(1);
        self
    }

    /// Builder: delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Builder: set the name used in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make medium queries fail (or succeed again)
    pub fn set_fail_medium(&self, fail: bool) {
        self.fail_medium.store(fail, Ordering::SeqCst);
    }

    /// Make coarse queries fail (or succeed again)
    pub fn set_fail_coarse(&self, fail: bool) {
        self.fail_coarse.store(fail, Ordering::SeqCst);
    }

    /// Make detail fetches starting at `range_start` fail
    pub fn fail_range(&self, range_start: i64) {
        self.failing_ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(range_start);
    }

    /// Call counters
    pub fn calls(&self) -> &CallCounters {
        &self.calls
    }

    /// Number of detail fetches issued for a range start
    pub fn detail_calls_for(&self, range_start: i64) -> u64 {
        self.detail_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&range_start)
            .copied()
            .unwrap_or(0)
    }

    /// All records held by the provider
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn range_slice(&self, domain: &TimeDomain) -> &[Record] {
        let lo = self.records.partition_point(|r| r.timestamp < domain.start);
        let hi = self.records.partition_point(|r| r.timestamp < domain.end);
        &self.records[lo..hi]
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl DataProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn time_extent(&self) -> ProviderResult<(i64, i64)> {
        self.calls.extent.fetch_add(1, Ordering::SeqCst);
        if let Some(extent) = self.extent {
            return Ok(extent);
        }
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Ok((first.timestamp, last.timestamp)),
            _ => Err(ProviderError::InvalidData("dataset is empty".to_string())),
        }
    }

    async fn coarse_aggregates(&self) -> ProviderResult<Vec<Bin>> {
        self.calls.coarse.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_coarse.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("coarse query failed".to_string()));
        }
        Ok(aggregate_bins(&self.records, self.coarse_width))
    }

    async fn medium_aggregates(&self, domain: TimeDomain) -> ProviderResult<Vec<Bin>> {
        self.calls.medium.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_medium.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("medium query failed".to_string()));
        }
        Ok(aggregate_bins(self.range_slice(&domain), self.medium_width))
    }

    async fn detail_data(&self, range: TimeDomain, limit: usize) -> ProviderResult<Vec<Record>> {
        self.calls.detail.fetch_add(1, Ordering::SeqCst);
        *self
            .detail_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(range.start)
            .or_insert(0) += 1;

        self.simulate_latency().await;

        let failing = self
            .failing_ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&range.start);
        if failing {
            return Err(ProviderError::Unavailable(format!(
                "detail fetch failed for {}",
                range
            )));
        }

        Ok(self.range_slice(&range).iter().take(limit).cloned().collect())
    }
}
