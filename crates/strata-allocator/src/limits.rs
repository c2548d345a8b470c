//! Aggregate bitrate bounds derived from the registered tracks, independent
//! of any particular budget. The pacer and probe controller use these to
//! decide how far to probe and how much padding to send.

use serde::Serialize;

use crate::hysteresis::effective_minimum;
use crate::track::AllocatableTrack;

/// Call-wide allocation bounds (bps).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationLimits {
    /// Sum of minimums that must be sent regardless of the estimate.
    pub min_allocatable_rate_bps: u64,
    /// Sum of all track maximums.
    pub max_allocatable_rate_bps: u64,
    /// Padding needed to probe up to what every track could use.
    pub max_padding_rate_bps: u64,
}

/// Receives [`AllocationLimits`] whenever they change.
pub trait LimitObserver: Send + Sync {
    fn on_allocation_limits_changed(&self, limits: AllocationLimits);
}

/// Derive the limits for the current registry.
///
/// Only paused tracks that do not enforce their minimum reserve padding:
/// `pad_up_bitrate_bps`, or the bitrate they would need to resume if that is
/// larger, so padding can probe for them. Running, enforced and
/// never-allocated tracks reserve nothing.
pub fn calculate_limits(tracks: &[AllocatableTrack]) -> AllocationLimits {
    tracks
        .iter()
        .fold(AllocationLimits::default(), |mut limits, t| {
            if t.config.enforce_min_bitrate {
                limits.min_allocatable_rate_bps += t.config.min_bitrate_bps as u64;
            } else if t.is_paused() {
                let padding = t.config.pad_up_bitrate_bps.max(effective_minimum(t));
                limits.max_padding_rate_bps += padding as u64;
            }
            limits.max_allocatable_rate_bps += t.config.max_bitrate_bps as u64;
            limits
        })
}
