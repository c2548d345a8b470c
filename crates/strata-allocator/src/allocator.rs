//! # Bitrate Allocator
//!
//! Owns the track registry and the latest network estimate, reruns the
//! allocation engine whenever either changes, and pushes the result out to
//! every track.
//!
//! ## Track states
//!
//! ```text
//!   Unallocated ──▶ Paused (0) ◀──▶ Active (>0)
//!        └───────────────────────────▲
//! ```
//!
//! Transitions only happen as the result of a full allocation. Every
//! Active↔Paused flip caused by a new estimate is counted as a pause event;
//! reallocations triggered by adding a track or by an elastic recompute move
//! tracks between states without counting.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::AllocatorConfig;
use crate::engine::allocate_rates;
use crate::estimate::{fraction_loss, BitrateAllocationUpdate, TargetTransferRate};
use crate::hysteresis::media_ratio;
use crate::limits::{calculate_limits, AllocationLimits, LimitObserver};
use crate::sequence::SequenceChecker;
use crate::stats::AllocatorStats;
use crate::track::{BitrateAllocatorObserver, TrackConfig, TrackRegistry};

pub struct BitrateAllocator {
    sequence: SequenceChecker,
    config: AllocatorConfig,
    limit_observer: Arc<dyn LimitObserver>,
    tracks: TrackRegistry,

    // ─── Last estimate ───
    last_target_bps: u32,
    last_stable_target_bps: u32,
    /// Used to seed start bitrates; never drops to zero.
    last_non_zero_bitrate_bps: u32,
    /// Loss in 1/255 steps, forwarded as x/256.
    last_fraction_loss: u8,
    last_rtt: Duration,
    last_bwe_period: Duration,
    last_cwnd_reduce_ratio: f64,
    last_bwe_log_time: Option<Duration>,

    num_pause_events: u32,
    current_limits: AllocationLimits,
}

impl BitrateAllocator {
    pub fn new(limit_observer: Arc<dyn LimitObserver>, config: AllocatorConfig) -> Self {
        BitrateAllocator {
            sequence: SequenceChecker::new(),
            last_non_zero_bitrate_bps: config.default_start_bitrate_bps,
            config,
            limit_observer,
            tracks: TrackRegistry::new(),
            last_target_bps: 0,
            last_stable_target_bps: 0,
            last_fraction_loss: 0,
            last_rtt: Duration::ZERO,
            last_bwe_period: Duration::ZERO,
            last_cwnd_reduce_ratio: 0.0,
            last_bwe_log_time: None,
            num_pause_events: 0,
            current_limits: AllocationLimits::default(),
        }
    }

    pub fn with_defaults(limit_observer: Arc<dyn LimitObserver>) -> Self {
        Self::new(limit_observer, AllocatorConfig::default())
    }

    /// Release the thread binding so the allocator can be handed to another
    /// thread; the next call binds it there.
    pub fn detach_from_sequence(&mut self) {
        self.sequence.detach();
    }

    // ─── Getters ────────────────────────────────────────────────────────

    pub fn config(&self) -> &AllocatorConfig {
        self.sequence.check();
        &self.config
    }

    pub fn num_pause_events(&self) -> u32 {
        self.sequence.check();
        self.num_pause_events
    }

    /// Limits as last published to the limit observer.
    pub fn current_limits(&self) -> AllocationLimits {
        self.sequence.check();
        self.current_limits
    }

    pub fn track_count(&self) -> usize {
        self.sequence.check();
        self.tracks.len()
    }

    pub fn tracks(&self) -> &TrackRegistry {
        self.sequence.check();
        &self.tracks
    }

    pub fn stats(&self) -> AllocatorStats {
        self.sequence.check();
        AllocatorStats {
            last_target_bps: self.last_target_bps,
            last_stable_target_bps: self.last_stable_target_bps,
            last_non_zero_bitrate_bps: self.last_non_zero_bitrate_bps,
            num_pause_events: self.num_pause_events,
            track_count: self.tracks.len(),
            active_tracks: self.tracks.iter().filter(|t| t.is_active()).count(),
            paused_tracks: self.tracks.iter().filter(|t| t.is_paused()).count(),
            unallocated_tracks: self.tracks.iter().filter(|t| t.allocated.is_none()).count(),
            limits: self.current_limits,
        }
    }

    // ─── Estimate ───────────────────────────────────────────────────────

    /// Record a new estimate and reallocate across all tracks.
    pub fn on_network_estimate_changed(&mut self, msg: TargetTransferRate) {
        self.sequence.check();
        self.last_target_bps = msg.target_rate_bps;
        self.last_stable_target_bps = msg.stable_target_rate_bps;
        if msg.target_rate_bps > 0 {
            self.last_non_zero_bitrate_bps = msg.target_rate_bps;
        }
        self.last_fraction_loss = fraction_loss(msg.network_estimate.loss_rate_ratio);
        self.last_rtt = msg.network_estimate.round_trip_time;
        self.last_bwe_period = msg.network_estimate.bwe_period;
        self.last_cwnd_reduce_ratio = msg.cwnd_reduce_ratio;

        let log_due = self
            .last_bwe_log_time
            .is_none_or(|t| msg.at_time > t.saturating_add(self.config.bwe_log_interval));
        if log_due {
            info!(
                target_bps = msg.target_rate_bps,
                stable_target_bps = msg.stable_target_rate_bps,
                "Current BWE"
            );
            self.last_bwe_log_time = Some(msg.at_time);
        }

        self.sample_usage();
        self.distribute(true);
        self.update_allocation_limits();
    }

    // ─── Registry ───────────────────────────────────────────────────────

    /// Register a track, or replace the config of one already registered.
    ///
    /// # Panics
    ///
    /// If `config.bitrate_priority` is not a finite, positive number.
    pub fn add_observer(
        &mut self,
        observer: Arc<dyn BitrateAllocatorObserver>,
        mut config: TrackConfig,
    ) {
        self.sequence.check();
        assert!(
            config.bitrate_priority.is_finite() && config.bitrate_priority > 0.0,
            "bitrate_priority must be finite and positive, got {}",
            config.bitrate_priority
        );
        if config.min_bitrate_bps > config.max_bitrate_bps {
            warn!(
                track = %config.track_id,
                min_bps = config.min_bitrate_bps,
                max_bps = config.max_bitrate_bps,
                "min bitrate above max, clamping"
            );
            config.min_bitrate_bps = config.max_bitrate_bps;
        }

        let (id, inserted) = self.tracks.upsert(observer.clone(), config);
        debug!(track = %id, inserted, tracks = self.tracks.len(), "observer added");

        if self.last_target_bps > 0 {
            self.distribute(false);
        } else {
            // No usable estimate: the track must not produce data, but still
            // learns the last known link conditions.
            observer.on_bitrate_updated(self.make_update(0, 0));
        }

        self.update_allocation_limits();
    }

    /// Unregister a track. Unknown observers are ignored.
    pub fn remove_observer(&mut self, observer: &dyn BitrateAllocatorObserver) {
        self.sequence.check();
        if let Some(track) = self.tracks.remove(observer) {
            debug!(track = %track.id, tracks = self.tracks.len(), "observer removed");
        }
        self.update_allocation_limits();
    }

    // ─── Start rate ─────────────────────────────────────────────────────

    /// Bitrate an encoder should start at before its first real allocation.
    pub fn get_start_bitrate(&self, observer: &dyn BitrateAllocatorObserver) -> u32 {
        self.sequence.check();
        let n = self.tracks.len() as u32;
        match self.tracks.find(observer).map(|t| t.allocated) {
            // Not added yet: its fair share once it is.
            None => self.last_non_zero_bitrate_bps / (n + 1),
            Some(None) => self.last_non_zero_bitrate_bps / n,
            Some(Some(allocated)) => allocated,
        }
    }

    /// Override the total bitrate assumed before a non-zero estimate.
    pub fn update_start_rate(&mut self, start_rate_bps: u32) {
        self.sequence.check();
        self.last_non_zero_bitrate_bps = start_rate_bps;
    }

    // ─── Elastic recompute ──────────────────────────────────────────────

    /// Reallocate between estimates if a contributor's usage jumped.
    ///
    /// Only acts when elasticity is enabled, there is at least one
    /// contributor and one consumer, and a contributor now uses more than
    /// `usage_jump_fraction` of its allocation beyond what it used at the
    /// previous cycle. Returns whether a reallocation happened.
    pub fn recompute_allocation_if_needed(&mut self) -> bool {
        self.sequence.check();
        if !self.config.elastic.enabled() {
            return false;
        }

        let elasticities = || self.tracks.iter().filter_map(|t| t.config.rate_elasticity);
        let has_contributor = elasticities().any(|e| e.can_contribute());
        let has_consumer = elasticities().any(|e| e.can_consume());
        if !has_contributor || !has_consumer {
            return false;
        }

        let jump_fraction = self.config.elastic.usage_jump_fraction;
        let jumped = self.tracks.iter().find(|t| {
            if !t.config.rate_elasticity.is_some_and(|e| e.can_contribute()) {
                return false;
            }
            let (Some(allocated), Some(previous)) = (t.allocated, t.last_used_bitrate) else {
                return false;
            };
            let Some(current) = t.observer.used_rate() else {
                return false;
            };
            current as f64 > previous as f64 + jump_fraction * allocated as f64
        });
        let Some(track) = jumped else {
            return false;
        };
        debug!(track = %track.label(), "contributor usage jumped, reallocating");

        self.sample_usage();
        self.distribute(false);
        self.update_allocation_limits();
        true
    }

    // ─── Limits ─────────────────────────────────────────────────────────

    /// Recompute the aggregate limits and publish them if they changed.
    pub fn update_allocation_limits(&mut self) {
        self.sequence.check();
        let limits = calculate_limits(self.tracks.as_slice());
        if limits == self.current_limits {
            return;
        }
        self.current_limits = limits;
        info!(
            min_allocatable_bps = limits.min_allocatable_rate_bps,
            max_allocatable_bps = limits.max_allocatable_rate_bps,
            max_padding_bps = limits.max_padding_rate_bps,
            "allocation limits changed"
        );
        self.limit_observer.on_allocation_limits_changed(limits);
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn make_update(&self, target_bps: u32, stable_target_bps: u32) -> BitrateAllocationUpdate {
        BitrateAllocationUpdate {
            target_bitrate_bps: target_bps,
            stable_target_bitrate_bps: stable_target_bps,
            packet_loss_ratio: self.last_fraction_loss as f64 / 256.0,
            round_trip_time: self.last_rtt,
            bwe_period: self.last_bwe_period,
            cwnd_reduce_ratio: self.last_cwnd_reduce_ratio,
        }
    }

    /// Refresh the usage reports elastic tracks feed into the next allocation.
    fn sample_usage(&mut self) {
        if !self.config.elastic.enabled() {
            return;
        }
        for track in self.tracks.iter_mut() {
            if track.config.rate_elasticity.is_some() {
                track.last_used_bitrate = track.observer.used_rate();
            }
        }
    }

    /// Allocate the target and stable budgets and notify every track.
    ///
    /// Active↔paused flips only count as pause events when
    /// `count_pause_events` is set, which is the case for new estimates.
    fn distribute(&mut self, count_pause_events: bool) {
        let target = allocate_rates(
            self.tracks.as_slice(),
            self.last_target_bps,
            self.config.elastic.rate_limit_bps,
        );
        // The stable rate drives conservative decisions: no elastic boost.
        let stable = allocate_rates(self.tracks.as_slice(), self.last_stable_target_bps, 0);

        let updates: Vec<BitrateAllocationUpdate> = target
            .iter()
            .zip(&stable)
            .map(|(&t, &s)| self.make_update(t, s))
            .collect();

        let last_target_bps = self.last_target_bps;
        let mut pause_events = 0;
        for (track, update) in self.tracks.iter_mut().zip(updates) {
            let allocated = update.target_bitrate_bps;
            let protection_bps = track.observer.on_bitrate_updated(update);

            match track.allocated {
                Some(previous) if previous > 0 && allocated == 0 => {
                    pause_events += 1;
                    // Estimate from the media/protection split before pausing.
                    let predicted_protection_bps =
                        ((1.0 - track.media_ratio) * track.config.min_bitrate_bps as f64) as u32;
                    info!(
                        track = %track.label(),
                        min_bps = track.config.min_bitrate_bps,
                        estimate_bps = last_target_bps,
                        protection_bps = predicted_protection_bps,
                        "pausing track"
                    );
                }
                Some(0) if allocated > 0 => {
                    pause_events += 1;
                    info!(
                        track = %track.label(),
                        min_bps = track.config.min_bitrate_bps,
                        allocated_bps = allocated,
                        protection_bps,
                        "resuming track"
                    );
                }
                _ => {}
            }

            // A paused track keeps the ratio it had while active.
            if allocated > 0 {
                track.media_ratio = media_ratio(allocated, protection_bps);
            }
            track.allocated = Some(allocated);
        }
        if count_pause_events {
            self.num_pause_events += pause_events;
        }

        debug!(
            target_bps = self.last_target_bps,
            stable_target_bps = self.last_stable_target_bps,
            tracks = self.tracks.len(),
            pause_events = self.num_pause_events,
            "allocation distributed"
        );
    }
}
