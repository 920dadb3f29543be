//! # netzoom
//!
//! Multi-resolution timeline manager for packet captures too large to hold
//! in a browser or a single query result.
//!
//! ## Features
//!
//! - **Three tiers**: whole-dataset coarse bins, per-view medium bins and raw
//!   fine-tier records
//! - **Hysteresis**: tier switches need a margin past each threshold and are
//!   rate limited
//! - **Chunk cache**: fine data is loaded in time-aligned chunks, held in an
//!   LRU cache and fetched at most once while in flight
//! - **Stale-result safety**: every request gets a render generation and a
//!   cancellation token
//! - **Prefetch**: adjacent chunks and the next finer tier are warmed in the
//!   background
//!
//! ## Modules
//!
//! - [`data`]: Data model and the `DataProvider` seam
//! - [`cache`]: Eviction cache and chunk index
//! - [`resolution`]: State machine, manager and prefetch queue
//! - [`config`]: TOML/environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netzoom::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One packet per millisecond over ten minutes
//!     let provider = InMemoryProvider::synthetic(0, 600 * MICROS_PER_SEC, 1_000);
//!     let manager = ResolutionManager::init(Arc::new(provider), ManagerConfig::default()).await?;
//!
//!     // Zoom to a 20 second window
//!     let view = TimeDomain::new(60 * MICROS_PER_SEC, 80 * MICROS_PER_SEC);
//!     let result = manager.get_data_for_domain(view).await?;
//!
//!     if manager.is_current(result.generation) {
//!         println!("{} items at {} tier", result.data.len(), result.resolution);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod data;
pub mod resolution;

// Re-export top-level types for convenience
pub use data::{
    Bin, CsvLoadResult, CsvPacketLoader, DataProvider, InMemoryProvider, ProviderError,
    ProviderResult, Record, Resolution, TierData, TimeDomain, TimestampUnit, MICROS_PER_HOUR,
    MICROS_PER_MINUTE, MICROS_PER_SEC,
};

pub use cache::{ChunkBounds, ChunkId, ChunkIndex, EvictionCache};

pub use resolution::{
    DomainData, LoadingFuture, ManagerConfig, ManagerEvent, MemoryStats, NonBlockingData,
    ResolutionError, ResolutionManager, ResolutionResult, ResolutionStateMachine,
    StateMachineConfig, TransitionInfo, ZoomDirection,
};

pub use config::{CacheConfig, Config, ConfigError, LoggingConfig, PrefetchConfig, ResolutionConfig};
