//! # Network Estimate Input & Track Updates
//!
//! The allocator consumes a [`TargetTransferRate`] from the congestion
//! controller and hands every track a [`BitrateAllocationUpdate`] carrying its
//! slice of the budget plus the link conditions it was computed under.

use std::time::Duration;

/// Link conditions reported alongside a bandwidth estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkEstimate {
    /// Estimated packet loss (0.0 - 1.0).
    pub loss_rate_ratio: f64,
    /// Smoothed round-trip time.
    pub round_trip_time: Duration,
    /// How long the estimator expects this estimate to remain valid.
    pub bwe_period: Duration,
}

/// A fresh bandwidth estimate from the congestion controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TargetTransferRate {
    /// Estimator timestamp, measured from an arbitrary epoch.
    pub at_time: Duration,
    /// Budget to divide between tracks (bps).
    pub target_rate_bps: u32,
    /// Conservative budget used for decisions that should not flap (bps).
    pub stable_target_rate_bps: u32,
    pub network_estimate: NetworkEstimate,
    /// Fraction by which the congestion window is being reduced (0.0 - 1.0).
    pub cwnd_reduce_ratio: f64,
}

/// What a single track is told after each allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BitrateAllocationUpdate {
    pub target_bitrate_bps: u32,
    pub stable_target_bitrate_bps: u32,
    /// Packet loss in `[0, 1]`, quantised to 1/256 steps.
    pub packet_loss_ratio: f64,
    pub round_trip_time: Duration,
    pub bwe_period: Duration,
    pub cwnd_reduce_ratio: f64,
}

/// Quantise a loss ratio to the 8-bit "fraction lost" used on the wire.
pub(crate) fn fraction_loss(loss_rate_ratio: f64) -> u8 {
    let scaled = (loss_rate_ratio * 255.0) as i64;
    scaled.clamp(0, 255) as u8
}
