//! Toggle hysteresis for paused tracks.
//!
//! A paused track has to clear `min + max(10% of min, 20 kbps)` before it is
//! allowed to resume, so an estimate hovering around the minimum does not
//! flip the track between 0 and `min` every cycle.

use crate::track::AllocatableTrack;

/// Fraction of the minimum added as a resume margin.
pub const TOGGLE_FACTOR: f64 = 0.1;
/// Absolute floor for the resume margin (bps).
pub const MIN_TOGGLE_BITRATE_BPS: u32 = 20_000;

/// Previous allocation, or the configured minimum for a track that has never
/// been allocated (new tracks are treated as active).
pub fn last_allocated_bitrate(track: &AllocatableTrack) -> u32 {
    track.allocated.unwrap_or(track.config.min_bitrate_bps)
}

/// The minimum this track needs this cycle, including the resume margin if
/// it is paused and the protection overhead it carried before.
pub fn effective_minimum(track: &AllocatableTrack) -> u32 {
    let mut min_bitrate = track.config.min_bitrate_bps;
    if last_allocated_bitrate(track) == 0 {
        let toggle = ((TOGGLE_FACTOR * min_bitrate as f64) as u32).max(MIN_TOGGLE_BITRATE_BPS);
        min_bitrate = min_bitrate.saturating_add(toggle);
    }
    // media_ratio is only refreshed while the track is active, so a paused
    // track keeps the overhead it had when it stopped.
    let ratio = track.media_ratio;
    if ratio > 0.0 && ratio < 1.0 {
        let overhead = (min_bitrate as f64 * (1.0 - ratio)) as u32;
        min_bitrate = min_bitrate.saturating_add(overhead);
    }
    min_bitrate
}

/// Fraction of `allocated_bps` left for media once `protection_bps` is spent.
pub fn media_ratio(allocated_bps: u32, protection_bps: u32) -> f64 {
    if protection_bps == 0 || allocated_bps == 0 {
        return 1.0;
    }
    let media_bps = allocated_bps.saturating_sub(protection_bps);
    media_bps as f64 / allocated_bps as f64
}
