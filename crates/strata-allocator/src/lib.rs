//! # strata-allocator
//!
//! Divides one bandwidth estimate between competing media tracks.
//!
//! Each track declares a min/max bitrate, a relative priority and optionally
//! a priority reservation and elastic behaviour. The allocator hands every
//! track its share on each new estimate, pauses tracks the budget cannot
//! carry and keeps them paused until there is clear headroom to resume.
//!
//! ## Crate structure
//!
//! - [`track`] — Track configuration, per-track state, the registry
//! - [`hysteresis`] — Resume margin for paused tracks
//! - [`engine`] — The pure allocation function and its regimes
//! - [`limits`] — Call-wide min/max/padding bounds
//! - [`estimate`] — Estimator input and per-track update records
//! - [`allocator`] — [`BitrateAllocator`], which ties it all together
//! - [`sequence`] — Thread-affinity check
//! - [`config`] — TOML configuration
//! - [`stats`] — Serializable statistics snapshot

pub mod allocator;
pub mod config;
pub mod engine;
pub mod estimate;
pub mod hysteresis;
pub mod limits;
pub mod sequence;
pub mod stats;
pub mod track;

pub use allocator::BitrateAllocator;
pub use config::{AllocatorConfig, ConfigError};
pub use engine::{allocate, Allocation, AllocationRegime};
pub use estimate::{BitrateAllocationUpdate, NetworkEstimate, TargetTransferRate};
pub use limits::{AllocationLimits, LimitObserver};
pub use track::{BitrateAllocatorObserver, RateElasticity, TrackConfig, TrackId};
