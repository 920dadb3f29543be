//! Core data types shared by the manager and data providers
//!
//! - `TimeDomain`: a visible or requested time interval
//! - `Resolution`: the three data tiers
//! - `Bin`: one pre-aggregated bucket (coarse and medium tiers)
//! - `Record`: one raw packet (fine tier)
//! - `TierData`: tagged payload returned to the viewport
//!
//! All timestamps are microseconds in the dataset's native clock.

use serde::{Deserialize, Serialize};

/// Microseconds per second
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Microseconds per minute
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SEC;

/// Microseconds per hour
pub const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

/// Time domain (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeDomain {
    /// Start timestamp (inclusive), in microseconds
    pub start: i64,
    /// End timestamp (exclusive), in microseconds
    pub end: i64,
}

impl TimeDomain {
    /// Create a new time domain
    ///
    /// # Panics
    /// Panics if start >= end
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start < end, "TimeDomain: start must be less than end");
        Self { start, end }
    }

    /// Create a time domain, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Width of the domain in microseconds
    pub fn span(&self) -> i64 {
        self.end - self.start
    }

    /// Check if a timestamp falls within [start, end)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if a timestamp falls within [start, end]
    ///
    /// Viewport domains are closed on both sides when filtering raw records.
    pub fn contains_inclusive(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Check if this domain overlaps with another
    pub fn overlaps(&self, other: &TimeDomain) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Get intersection with another domain, if any
    pub fn intersection(&self, other: &TimeDomain) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Self::try_new(start, end)
    }
}

impl std::fmt::Display for TimeDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Resolution tier, ordered from coarsest to finest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Whole-dataset aggregates (e.g. one-minute bins)
    Coarse,
    /// Domain-scoped aggregates (e.g. one-second bins)
    Medium,
    /// Raw per-packet records
    Fine,
}

impl Resolution {
    /// Get all tiers for iteration
    pub fn all() -> &'static [Resolution] {
        &[Resolution::Coarse, Resolution::Medium, Resolution::Fine]
    }

    /// Next finer tier, if any
    pub fn finer(&self) -> Option<Resolution> {
        match self {
            Resolution::Coarse => Some(Resolution::Medium),
            Resolution::Medium => Some(Resolution::Fine),
            Resolution::Fine => None,
        }
    }

    /// Next coarser tier, if any
    pub fn coarser(&self) -> Option<Resolution> {
        match self {
            Resolution::Coarse => None,
            Resolution::Medium => Some(Resolution::Coarse),
            Resolution::Fine => Some(Resolution::Medium),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Coarse => write!(f, "coarse"),
            Resolution::Medium => write!(f, "medium"),
            Resolution::Fine => write!(f, "fine"),
        }
    }
}

/// One pre-aggregated time bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    /// Bucket start (inclusive)
    pub start: i64,
    /// Bucket end (exclusive)
    pub end: i64,
    /// Number of packets in the bucket
    pub count: u64,
    /// Sum of packet lengths in bytes
    pub byte_total: u64,
    /// Source endpoint identifier
    pub src_id: u32,
    /// Destination endpoint identifier
    pub dst_id: u32,
}

impl Bin {
    /// Check if this bin overlaps a domain
    pub fn overlaps(&self, domain: &TimeDomain) -> bool {
        self.start < domain.end && self.end > domain.start
    }
}

/// One raw packet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Capture timestamp in microseconds
    pub timestamp: i64,
    /// Packet length in bytes
    pub length: u32,
    /// TCP flags (or 0 for non-TCP)
    pub flags: u8,
    /// Source endpoint identifier
    pub src_id: u32,
    /// Destination endpoint identifier
    pub dst_id: u32,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
}

impl Record {
    /// Estimated in-memory size in bytes
    pub const ESTIMATED_SIZE: usize = std::mem::size_of::<Record>();
}

/// Data handed back to the viewport, tagged by tier kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum TierData {
    /// Aggregated bins (coarse or medium tier)
    Bins(Vec<Bin>),
    /// Raw records (fine tier)
    Records(Vec<Record>),
}

impl TierData {
    /// Number of bins or records
    pub fn len(&self) -> usize {
        match self {
            TierData::Bins(bins) => bins.len(),
            TierData::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bins(&self) -> Option<&[Bin]> {
        match self {
            TierData::Bins(bins) => Some(bins),
            TierData::Records(_) => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            TierData::Records(records) => Some(records),
            TierData::Bins(_) => None,
        }
    }

    /// Get estimated size in bytes (for memory stats)
    pub fn estimated_size(&self) -> usize {
        match self {
            TierData::Bins(bins) => bins.len() * std::mem::size_of::<Bin>(),
            TierData::Records(records) => records.len() * Record::ESTIMATED_SIZE,
        }
    }
}

/// Select bins overlapping a domain, preserving order
pub fn bins_in_domain(bins: &[Bin], domain: &TimeDomain) -> Vec<Bin> {
    bins.iter().filter(|b| b.overlaps(domain)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(start: i64, end: i64) -> Bin {
        Bin {
            start,
            end,
            count: 1,
            byte_total: 60,
            src_id: 1,
            dst_id: 2,
        }
    }

    #[test]
    fn test_domain_contains() {
        let domain = TimeDomain::new(1000, 2000);

        assert!(!domain.contains(999));
        assert!(domain.contains(1000));
        assert!(domain.contains(1999));
        assert!(!domain.contains(2000));
        assert!(domain.contains_inclusive(2000));
        assert_eq!(domain.span(), 1000);
    }

    #[test]
    fn test_domain_try_new_rejects_empty() {
        assert!(TimeDomain::try_new(5, 5).is_none());
        assert!(TimeDomain::try_new(6, 5).is_none());
        assert!(TimeDomain::try_new(5, 6).is_some());
    }

    #[test]
    fn test_domain_intersection() {
        let a = TimeDomain::new(0, 100);
        let b = TimeDomain::new(50, 150);
        let c = TimeDomain::new(100, 200);

        assert_eq!(a.intersection(&b), Some(TimeDomain::new(50, 100)));
        assert_eq!(a.intersection(&c), None); // Adjacent, not overlapping
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_resolution_ordering() {
        assert!(Resolution::Coarse < Resolution::Medium);
        assert!(Resolution::Medium < Resolution::Fine);
        assert_eq!(Resolution::Coarse.finer(), Some(Resolution::Medium));
        assert_eq!(Resolution::Fine.finer(), None);
        assert_eq!(Resolution::Fine.coarser(), Some(Resolution::Medium));
        assert_eq!(Resolution::Medium.to_string(), "medium");
    }

    #[test]
    fn test_bins_in_domain() {
        let bins = vec![bin(0, 10), bin(10, 20), bin(20, 30)];
        let selected = bins_in_domain(&bins, &TimeDomain::new(15, 25));

        assert_eq!(selected, vec![bin(10, 20), bin(20, 30)]);
    }

    #[test]
    fn test_tier_data_serialization() {
        let data = TierData::Bins(vec![bin(0, 10)]);
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"kind\":\"bins\""));

        let restored: TierData = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, data);
        assert_eq!(restored.len(), 1);
        assert!(restored.as_records().is_none());
    }
}
