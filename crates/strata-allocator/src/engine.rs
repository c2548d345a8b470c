//! # Allocation Engine
//!
//! Splits one bandwidth budget between the registered tracks. The engine is
//! a pure function of the track list (including the state each track carries
//! from the previous cycle) and the budget.
//!
//! ## Regimes
//!
//! ```text
//!   budget == 0                         → Zero:   everyone paused
//!   budget < Σ effective minimum        → Low:    enforced → active → paused
//!   budget ≤ Σ max                      → Normal: min + priority + weighted share
//!   budget > Σ max                      → Max:    max + even share, ≤ 2 × max
//! ```
//!
//! After the normal regime an optional elastic pass hands bitrate that
//! contributors are not using to tracks that can consume it.
//!
//! All fractional shares are truncated toward zero before being added to an
//! allocation, so rounding never over-allocates.

use std::collections::HashMap;

use tracing::trace;

use crate::hysteresis::{effective_minimum, last_allocated_bitrate};
use crate::track::{AllocatableTrack, RateElasticity, TrackId};

/// Tracks may be given up to this multiple of their max bitrate when the
/// estimate exceeds the sum of all maximums.
pub const TRANSMISSION_MAX_BITRATE_MULTIPLIER: u32 = 2;

/// Elastic demand below this is treated as no demand.
const MIN_ELASTIC_DEMAND: f64 = 1e-9;

/// Per-track bitrate (bps) keyed by registry id.
pub type Allocation = HashMap<TrackId, u32>;

/// Which allocation strategy a budget falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationRegime {
    /// No tracks registered.
    Empty,
    /// Budget is zero; every track is paused.
    Zero,
    /// Not every track can get its (hysteresis-adjusted) minimum.
    Low,
    /// Minimums are covered, maximums are not.
    Normal,
    /// Every track can get its maximum with budget to spare.
    Max,
}

impl AllocationRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationRegime::Empty => "empty",
            AllocationRegime::Zero => "zero",
            AllocationRegime::Low => "low",
            AllocationRegime::Normal => "normal",
            AllocationRegime::Max => "max",
        }
    }
}

struct Sums {
    min: u64,
    max: u64,
}

fn sums(tracks: &[AllocatableTrack]) -> Sums {
    tracks.iter().fold(Sums { min: 0, max: 0 }, |acc, t| Sums {
        min: acc.min + t.config.min_bitrate_bps as u64,
        max: acc.max + t.config.max_bitrate_bps as u64,
    })
}

/// Pick the regime for `budget_bps` without computing the allocation.
pub fn select_regime(tracks: &[AllocatableTrack], budget_bps: u32) -> AllocationRegime {
    if tracks.is_empty() {
        return AllocationRegime::Empty;
    }
    if budget_bps == 0 {
        return AllocationRegime::Zero;
    }
    let sums = sums(tracks);
    if !enough_bitrate_for_all_tracks(tracks, budget_bps, sums.min) {
        AllocationRegime::Low
    } else if (budget_bps as u64) <= sums.max {
        AllocationRegime::Normal
    } else {
        AllocationRegime::Max
    }
}

/// Divide `budget_bps` between `tracks`.
///
/// `elastic_limit_bps` caps what consumers may reach through surplus
/// redistribution; `0` disables the elastic pass.
pub fn allocate(
    tracks: &[AllocatableTrack],
    budget_bps: u32,
    elastic_limit_bps: u32,
) -> Allocation {
    let rates = allocate_rates(tracks, budget_bps, elastic_limit_bps);
    tracks.iter().map(|t| t.id).zip(rates).collect()
}

/// Same as [`allocate`], in registration order.
pub fn allocate_rates(
    tracks: &[AllocatableTrack],
    budget_bps: u32,
    elastic_limit_bps: u32,
) -> Vec<u32> {
    let regime = select_regime(tracks, budget_bps);
    trace!(
        regime = regime.as_str(),
        budget_bps,
        tracks = tracks.len(),
        "allocating"
    );
    match regime {
        AllocationRegime::Empty => Vec::new(),
        AllocationRegime::Zero => vec![0; tracks.len()],
        AllocationRegime::Low => low_rate_allocation(tracks, budget_bps),
        AllocationRegime::Normal => {
            let sum_min = sums(tracks).min;
            let mut rates = normal_rate_allocation(tracks, budget_bps, sum_min);
            if elastic_limit_bps > 0 {
                apply_elastic_surplus(tracks, &mut rates, elastic_limit_bps);
            }
            rates
        }
        AllocationRegime::Max => max_rate_allocation(tracks, budget_bps, sums(tracks).max),
    }
}

/// True if an even split of what is left above the minimums lifts every track
/// to its effective minimum.
fn enough_bitrate_for_all_tracks(
    tracks: &[AllocatableTrack],
    budget_bps: u32,
    sum_min: u64,
) -> bool {
    let budget = budget_bps as u64;
    if budget < sum_min {
        return false;
    }
    let extra_per_track = (budget - sum_min) / tracks.len() as u64;
    tracks
        .iter()
        .all(|t| t.config.min_bitrate_bps as u64 + extra_per_track >= effective_minimum(t) as u64)
}

/// Split `bitrate` evenly between tracks, smallest max first, capping each at
/// `max_multiplier × max` and rolling any excess on to the tracks after it.
///
/// Tracks with a zero allocation only take part if `include_zero_allocations`.
fn distribute_evenly(
    tracks: &[AllocatableTrack],
    rates: &mut [u32],
    bitrate: u64,
    include_zero_allocations: bool,
    max_multiplier: u32,
) {
    let mut candidates: Vec<usize> = (0..tracks.len())
        .filter(|&i| include_zero_allocations || rates[i] != 0)
        .collect();
    candidates.sort_by_key(|&i| tracks[i].config.max_bitrate_bps);

    let mut remaining = bitrate;
    let mut left = candidates.len() as u64;
    for i in candidates {
        let extra = remaining / left;
        remaining -= extra;
        left -= 1;

        let cap = tracks[i].config.max_bitrate_bps.saturating_mul(max_multiplier) as u64;
        let mut total = rates[i] as u64 + extra;
        if total > cap {
            remaining += total - cap;
            total = cap;
        }
        rates[i] = total as u32;
    }
}

/// Budget below the minimums: keep enforced tracks alive, then tracks that
/// were already running, then resume paused ones, in registration order.
fn low_rate_allocation(tracks: &[AllocatableTrack], budget_bps: u32) -> Vec<u32> {
    let mut rates = vec![0u32; tracks.len()];
    // Enforced minimums may push this below zero.
    let mut remaining = budget_bps as i64;

    for (i, t) in tracks.iter().enumerate() {
        if t.config.enforce_min_bitrate {
            rates[i] = t.config.min_bitrate_bps;
            remaining -= t.config.min_bitrate_bps as i64;
        }
    }

    if remaining > 0 {
        for (i, t) in tracks.iter().enumerate() {
            if t.config.enforce_min_bitrate || last_allocated_bitrate(t) == 0 {
                continue;
            }
            let required = effective_minimum(t) as i64;
            if remaining >= required {
                rates[i] = required as u32;
                remaining -= required;
            }
        }
    }

    if remaining > 0 {
        for (i, t) in tracks.iter().enumerate() {
            if last_allocated_bitrate(t) != 0 {
                continue;
            }
            // An enforced track already holds its min; only charge the margin.
            let required = effective_minimum(t) as i64;
            let shortfall = required - rates[i] as i64;
            if shortfall > 0 && remaining >= shortfall {
                rates[i] = required as u32;
                remaining -= shortfall;
            }
        }
    }

    if remaining > 0 {
        distribute_evenly(tracks, &mut rates, remaining as u64, false, 1);
    }
    rates
}

/// Minimums covered: grant priority reservations, then share the rest by
/// bitrate priority without exceeding anyone's max.
fn normal_rate_allocation(tracks: &[AllocatableTrack], budget_bps: u32, sum_min: u64) -> Vec<u32> {
    let mut rates: Vec<u32> = tracks.iter().map(|t| t.config.min_bitrate_bps).collect();
    let mut capacities: Vec<u32> = tracks
        .iter()
        .map(|t| t.config.max_bitrate_bps.saturating_sub(t.config.min_bitrate_bps))
        .collect();
    let mut remaining = (budget_bps as u64).saturating_sub(sum_min);

    // First come, first served between prioritised tracks.
    for (i, t) in tracks.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let margin = t.config.priority_bitrate_bps.saturating_sub(rates[i]) as u64;
        if margin > 0 {
            let extra = margin.min(remaining);
            rates[i] += extra as u32;
            capacities[i] = capacities[i].saturating_sub(extra as u32);
            remaining -= extra;
        }
    }

    if remaining > 0 {
        distribute_relatively(tracks, &mut rates, &capacities, remaining);
    }
    rates
}

/// Share `remaining` in proportion to bitrate priority. A track is given its
/// whole remaining capacity only if its proportional share of what is left
/// would cover it; everyone after the first track that falls short gets its
/// proportional share.
fn distribute_relatively(
    tracks: &[AllocatableTrack],
    rates: &mut [u32],
    capacities: &[u32],
    remaining: u64,
) {
    struct Candidate {
        index: usize,
        capacity: u32,
        priority: f64,
    }

    let mut candidates: Vec<Candidate> = tracks
        .iter()
        .enumerate()
        .map(|(index, t)| Candidate {
            index,
            capacity: capacities[index],
            priority: t.config.bitrate_priority,
        })
        .collect();
    // Capacity normalised by priority is the order in which tracks fill up.
    // Stable sort: registration order breaks ties.
    candidates.sort_by(|a, b| {
        (a.capacity as f64 / a.priority).total_cmp(&(b.capacity as f64 / b.priority))
    });

    // Priority still in play from each position on. Summed from the back so
    // weights many orders of magnitude apart do not cancel to zero.
    let mut priority_from = vec![0.0f64; candidates.len() + 1];
    for pos in (0..candidates.len()).rev() {
        priority_from[pos] = priority_from[pos + 1] + candidates[pos].priority;
    }

    let mut remaining = remaining;
    let mut split = candidates.len();
    for (pos, c) in candidates.iter().enumerate() {
        let share = c.priority * remaining as f64 / priority_from[pos];
        if share < c.capacity as f64 {
            split = pos;
            break;
        }
        let grant = (c.capacity as u64).min(remaining);
        rates[c.index] += grant as u32;
        remaining -= grant;
    }

    let priority_sum = priority_from[split];
    for c in &candidates[split..] {
        let share = (c.priority * remaining as f64 / priority_sum) as u32;
        rates[c.index] = rates[c.index].saturating_add(share);
    }
}

/// Everyone gets max, the surplus is spread evenly up to the transmission
/// multiplier.
fn max_rate_allocation(tracks: &[AllocatableTrack], budget_bps: u32, sum_max: u64) -> Vec<u32> {
    let mut rates: Vec<u32> = tracks.iter().map(|t| t.config.max_bitrate_bps).collect();
    let surplus = (budget_bps as u64).saturating_sub(sum_max);
    distribute_evenly(
        tracks,
        &mut rates,
        surplus,
        true,
        TRANSMISSION_MAX_BITRATE_MULTIPLIER,
    );
    rates
}

/// Hand the allocation that contributors are not using to consumers, in
/// proportion to their priority, up to `min(elastic_limit, max)`.
fn apply_elastic_surplus(tracks: &[AllocatableTrack], rates: &mut [u32], elastic_limit_bps: u32) {
    let mut surplus: u64 = 0;
    let mut demand: f64 = 0.0;
    let mut consumers = Vec::new();

    for (i, t) in tracks.iter().enumerate() {
        let allocated = rates[i];
        let Some(elasticity) = t.config.rate_elasticity else {
            continue;
        };
        let used = t.last_used_bitrate;

        if elasticity.can_contribute() {
            if let Some(used) = used {
                surplus += allocated.saturating_sub(used) as u64;
            }
        }

        if elasticity.can_consume() {
            // A contributor using less than half its share is idle; letting it
            // consume would hand its own surplus straight back.
            let idle = elasticity == RateElasticity::CanContributeAndConsume
                && used.is_some_and(|used| (used as u64) * 2 < allocated as u64);
            if !idle {
                demand += t.config.bitrate_priority;
                consumers.push(i);
            }
        }
    }

    // Only runs after the normal regime, which never allocates above the
    // budget, so all of the surplus is free to hand out.
    if demand < MIN_ELASTIC_DEMAND || surplus == 0 {
        return;
    }

    for i in consumers {
        let t = &tracks[i];
        let cap = elastic_limit_bps.min(t.config.max_bitrate_bps) as u64;
        let extra = (t.config.bitrate_priority * surplus as f64 / demand) as u64;
        let target = (rates[i] as u64 + extra).min(cap);
        if target > rates[i] as u64 {
            trace!(track = %t.id, from = rates[i], to = target, "elastic surplus");
            rates[i] = target as u32;
        }
    }
}
