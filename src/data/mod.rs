//! Packet data model and provider seam
//!
//! - **types**: Tiers, domains, bins and records
//! - **provider**: The `DataProvider` trait the manager consumes
//! - **memory**: In-memory provider (demo, tests, benchmarks)
//! - **csv_source**: Loads a packet CSV into an in-memory provider
//! - **error**: Provider error types

pub mod csv_source;
pub mod error;
pub mod memory;
pub mod provider;
pub mod types;

pub use csv_source::{CsvLoadResult, CsvPacketLoader, TimestampUnit};
pub use error::{ProviderError, ProviderResult};
pub use memory::{aggregate_bins, CallCounters, InMemoryProvider};
pub use provider::DataProvider;
pub use types::{
    bins_in_domain, Bin, Record, Resolution, TierData, TimeDomain, MICROS_PER_HOUR,
    MICROS_PER_MINUTE, MICROS_PER_SEC,
};
