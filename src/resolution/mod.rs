//! Resolution management
//!
//! - **state**: Hysteresis-based tier selection
//! - **manager**: Load orchestration, caches and generations
//! - **prefetch**: Speculative chunk queue
//! - **events**: Lifecycle notifications
//! - **error**: Resolution error types

pub mod error;
pub mod events;
pub mod manager;
pub mod prefetch;
pub mod state;

pub use error::{ResolutionError, ResolutionResult};
pub use events::{EventBus, ManagerEvent};
pub use manager::{
    DomainData, LoadingFuture, ManagerConfig, MemoryStats, NonBlockingData, ResolutionManager,
};
pub use prefetch::PrefetchQueue;
pub use state::{ResolutionStateMachine, StateMachineConfig, TransitionInfo, ZoomDirection};
