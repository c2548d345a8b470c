//! Property-based tests for the allocation engine.
//!
//! These tests check the per-regime guarantees across random track sets and
//! budgets: enforced minimums, bounds in the normal and max regimes,
//! monotonicity above the maximums, the resume threshold of a paused track
//! and idempotence.

use proptest::prelude::*;
use std::sync::Arc;

use strata_allocator::engine::{allocate, allocate_rates, select_regime};
use strata_allocator::track::AllocatableTrack;
use strata_allocator::{AllocationRegime, BitrateAllocationUpdate, BitrateAllocatorObserver};
use strata_allocator::{RateElasticity, TrackConfig, TrackId};

struct NullObserver;

impl BitrateAllocatorObserver for NullObserver {
    fn on_bitrate_updated(&self, _update: BitrateAllocationUpdate) -> u32 {
        0
    }
}

#[derive(Debug, Clone)]
struct TrackShape {
    min: u32,
    max: u32,
    priority: f64,
    priority_bitrate: u32,
    enforce: bool,
}

fn track_shape() -> impl Strategy<Value = TrackShape> {
    (
        1_000u32..500_000,
        0u32..2_000_000,
        0.1f64..10.0,
        0.0f64..1.0,
        any::<bool>(),
    )
        .prop_map(|(min, headroom, priority, reserve, enforce)| {
            let max = min + headroom;
            TrackShape {
                min,
                max,
                priority,
                priority_bitrate: (max as f64 * reserve) as u32,
                enforce,
            }
        })
}

fn build(shapes: &[TrackShape]) -> Vec<AllocatableTrack> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, s)| {
            AllocatableTrack::new(
                TrackId::new(i as u64),
                Arc::new(NullObserver),
                TrackConfig {
                    min_bitrate_bps: s.min,
                    max_bitrate_bps: s.max,
                    priority_bitrate_bps: s.priority_bitrate,
                    bitrate_priority: s.priority,
                    enforce_min_bitrate: s.enforce,
                    ..Default::default()
                },
            )
        })
        .collect()
}

fn sum_min(shapes: &[TrackShape]) -> u64 {
    shapes.iter().map(|s| s.min as u64).sum()
}

fn sum_max(shapes: &[TrackShape]) -> u64 {
    shapes.iter().map(|s| s.max as u64).sum()
}

// ─── Low Regime ──────────────────────────────────────────────────────────────

proptest! {
    /// With every track enforcing its minimum and a budget no larger than
    /// the sum of minimums, each track gets exactly its minimum.
    #[test]
    fn enforced_minimums_hold_when_budget_is_short(
        shapes in prop::collection::vec(track_shape(), 1..8),
        fraction in 0.0f64..=1.0,
    ) {
        let shapes: Vec<TrackShape> = shapes
            .into_iter()
            .map(|s| TrackShape { enforce: true, priority_bitrate: 0, ..s })
            .collect();
        let total_min = sum_min(&shapes);
        let budget = ((total_min as f64 * fraction) as u64).clamp(1, total_min) as u32;

        let tracks = build(&shapes);
        let rates = allocate_rates(&tracks, budget, 0);
        for (rate, shape) in rates.iter().zip(&shapes) {
            prop_assert_eq!(*rate, shape.min);
        }
    }
}

// ─── Normal Regime ───────────────────────────────────────────────────────────

proptest! {
    /// Between the sum of minimums and the sum of maximums every track lands
    /// in [min, max] and the budget is used up to rounding.
    #[test]
    fn normal_regime_respects_bounds(
        shapes in prop::collection::vec(track_shape(), 1..8),
        fraction in 0.0f64..=1.0,
    ) {
        let lo = sum_min(&shapes);
        let hi = sum_max(&shapes);
        let budget = (lo + ((hi - lo) as f64 * fraction) as u64).min(hi) as u32;

        let tracks = build(&shapes);
        prop_assert_eq!(select_regime(&tracks, budget), AllocationRegime::Normal);

        let rates = allocate_rates(&tracks, budget, 0);
        for (rate, shape) in rates.iter().zip(&shapes) {
            prop_assert!(*rate >= shape.min, "rate {} below min {}", rate, shape.min);
            prop_assert!(*rate <= shape.max, "rate {} above max {}", rate, shape.max);
        }
        let total: u64 = rates.iter().map(|&r| r as u64).sum();
        let slack = shapes.len() as u64;
        prop_assert!(
            total + slack >= budget as u64 && total <= budget as u64 + slack,
            "total {} too far from budget {}", total, budget
        );
    }
}

// ─── Max Regime ──────────────────────────────────────────────────────────────

proptest! {
    /// Above the sum of maximums every track gets at least its max and at
    /// most twice it, and never more than the budget in total.
    #[test]
    fn max_regime_respects_bounds(
        shapes in prop::collection::vec(track_shape(), 1..8),
        surplus in 1u64..50_000_000,
    ) {
        let budget = (sum_max(&shapes) + surplus).min(u32::MAX as u64) as u32;
        let tracks = build(&shapes);
        prop_assert_eq!(select_regime(&tracks, budget), AllocationRegime::Max);

        let rates = allocate_rates(&tracks, budget, 0);
        for (rate, shape) in rates.iter().zip(&shapes) {
            prop_assert!(*rate >= shape.max);
            prop_assert!((*rate as u64) <= 2 * shape.max as u64);
        }
        let total: u64 = rates.iter().map(|&r| r as u64).sum();
        prop_assert!(total <= budget as u64);
    }

    /// Raising the budget above the maximums never lowers anyone's rate.
    #[test]
    fn max_regime_is_monotonic(
        shapes in prop::collection::vec(track_shape(), 1..8),
        surplus in 1u64..20_000_000,
        delta in 0u64..20_000_000,
    ) {
        let low = (sum_max(&shapes) + surplus) as u32;
        let high = low + delta as u32;
        let tracks = build(&shapes);

        let before = allocate_rates(&tracks, low, 0);
        let after = allocate_rates(&tracks, high, 0);
        for (b, a) in before.iter().zip(&after) {
            prop_assert!(a >= b, "{} dropped to {} when budget rose", b, a);
        }
    }
}

// ─── Hysteresis ──────────────────────────────────────────────────────────────

proptest! {
    /// A paused track resumes exactly at min + max(10% of min, 20 kbps).
    #[test]
    fn paused_track_resumes_at_threshold(min in 1u32..5_000_000) {
        let threshold = min + (min / 10).max(20_000);
        let mut track = AllocatableTrack::new(
            TrackId::new(0),
            Arc::new(NullObserver),
            TrackConfig {
                min_bitrate_bps: min,
                max_bitrate_bps: min * 4 + 100_000,
                enforce_min_bitrate: false,
                ..Default::default()
            },
        );
        track.allocated = Some(0);
        let tracks = vec![track];

        prop_assert_eq!(allocate_rates(&tracks, threshold - 1, 0), vec![0]);
        prop_assert_eq!(allocate_rates(&tracks, threshold, 0), vec![threshold]);
    }
}

// ─── Idempotence ─────────────────────────────────────────────────────────────

fn elasticity() -> impl Strategy<Value = Option<RateElasticity>> {
    prop_oneof![
        Just(None),
        Just(Some(RateElasticity::CanContributeUnused)),
        Just(Some(RateElasticity::CanConsumeExtra)),
        Just(Some(RateElasticity::CanContributeAndConsume)),
    ]
}

proptest! {
    /// Same tracks and state, same budget: same allocation. A zero budget
    /// always pauses everyone.
    #[test]
    fn allocation_is_deterministic(
        shapes in prop::collection::vec(
            (track_shape(), prop::option::of(0u32..3_000_000), 0.5f64..=1.0,
             elasticity(), prop::option::of(0u32..3_000_000)),
            1..8,
        ),
        budget in 0u32..30_000_000,
        elastic_limit in prop_oneof![Just(0u32), 1u32..5_000_000],
    ) {
        let plain: Vec<TrackShape> = shapes.iter().map(|(s, ..)| s.clone()).collect();
        let mut tracks = build(&plain);
        for (track, (_, allocated, ratio, elasticity, used)) in tracks.iter_mut().zip(&shapes) {
            track.allocated = *allocated;
            track.media_ratio = *ratio;
            track.config.rate_elasticity = *elasticity;
            track.last_used_bitrate = *used;
        }

        prop_assert_eq!(
            allocate(&tracks, budget, elastic_limit),
            allocate(&tracks, budget, elastic_limit)
        );
        prop_assert!(allocate_rates(&tracks, 0, elastic_limit).iter().all(|&r| r == 0));
    }
}
