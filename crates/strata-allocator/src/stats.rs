//! # Allocator Statistics
//!
//! Point-in-time snapshot of the allocator, for logging and JSON export.

use serde::Serialize;

use crate::limits::AllocationLimits;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocatorStats {
    /// Last target rate from the estimator (bps).
    pub last_target_bps: u32,
    /// Last stable target rate from the estimator (bps).
    pub last_stable_target_bps: u32,
    /// Last non-zero target, or the configured start rate (bps).
    pub last_non_zero_bitrate_bps: u32,
    /// Active↔paused transitions since creation.
    pub num_pause_events: u32,
    pub track_count: usize,
    pub active_tracks: usize,
    pub paused_tracks: usize,
    /// Tracks that have not been allocated yet.
    pub unallocated_tracks: usize,
    pub limits: AllocationLimits,
}

impl AllocatorStats {
    /// Share of registered tracks currently paused.
    pub fn paused_ratio(&self) -> f64 {
        if self.track_count == 0 {
            0.0
        } else {
            self.paused_tracks as f64 / self.track_count as f64
        }
    }
}
