//! # Track Registry
//!
//! Per-track configuration and the mutable allocation state the allocator
//! carries from one cycle to the next. Tracks are kept in registration order;
//! that order is significant (it breaks ties in the allocation engine).

use std::fmt;
use std::sync::Arc;

use crate::estimate::BitrateAllocationUpdate;

/// Implemented by every media track (encoder/sender) that wants a share of
/// the bandwidth estimate.
///
/// Mock tracks in tests implement this with interior mutability, the same
/// way production senders do.
pub trait BitrateAllocatorObserver: Send + Sync {
    /// Apply a new allocation. Returns the part of `update.target_bitrate_bps`
    /// the track will spend on protection (FEC, retransmissions) rather than
    /// media.
    fn on_bitrate_updated(&self, update: BitrateAllocationUpdate) -> u32;

    /// Bitrate actually consumed since the last allocation, if measured.
    ///
    /// Only consulted for tracks with a [`RateElasticity`]. The default
    /// reports no measurement.
    fn used_rate(&self) -> Option<u32> {
        None
    }
}

/// How a track takes part in elastic surplus redistribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateElasticity {
    /// Unused allocation may be handed to consumers.
    CanContributeUnused,
    /// May absorb surplus contributed by other tracks.
    CanConsumeExtra,
    /// Both of the above.
    CanContributeAndConsume,
}

impl RateElasticity {
    pub fn can_contribute(self) -> bool {
        matches!(
            self,
            RateElasticity::CanContributeUnused | RateElasticity::CanContributeAndConsume
        )
    }

    pub fn can_consume(self) -> bool {
        matches!(
            self,
            RateElasticity::CanConsumeExtra | RateElasticity::CanContributeAndConsume
        )
    }
}

/// Caller-supplied allocation constraints for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackConfig {
    pub min_bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    /// Bitrate to reserve as padding while the track is not sending.
    pub pad_up_bitrate_bps: u32,
    /// Granted ahead of proportional sharing, in registration order.
    pub priority_bitrate_bps: u32,
    /// Relative weight above the minimum. Must be finite and positive.
    pub bitrate_priority: f64,
    /// Keep `min_bitrate_bps` even when the budget cannot cover it.
    pub enforce_min_bitrate: bool,
    pub rate_elasticity: Option<RateElasticity>,
    /// Free-form label, only used in logs.
    pub track_id: String,
}

impl Default for TrackConfig {
    fn default() -> Self {
        TrackConfig {
            min_bitrate_bps: 0,
            max_bitrate_bps: 0,
            pad_up_bitrate_bps: 0,
            priority_bitrate_bps: 0,
            bitrate_priority: 1.0,
            enforce_min_bitrate: true,
            rate_elasticity: None,
            track_id: String::new(),
        }
    }
}

/// Registry-assigned key for a track. Stable for the track's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    pub fn new(raw: u64) -> Self {
        TrackId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// A registered track plus the state carried between allocation cycles.
pub struct AllocatableTrack {
    pub id: TrackId,
    pub observer: Arc<dyn BitrateAllocatorObserver>,
    pub config: TrackConfig,
    /// `None` until the first allocation; `Some(0)` while paused.
    pub allocated: Option<u32>,
    /// Fraction of the allocation that carried media in the last cycle.
    pub media_ratio: f64,
    pub last_used_bitrate: Option<u32>,
}

impl AllocatableTrack {
    pub fn new(
        id: TrackId,
        observer: Arc<dyn BitrateAllocatorObserver>,
        config: TrackConfig,
    ) -> Self {
        AllocatableTrack {
            id,
            observer,
            config,
            allocated: None,
            media_ratio: 1.0,
            last_used_bitrate: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.allocated == Some(0)
    }

    pub fn is_active(&self) -> bool {
        self.allocated.is_some_and(|bps| bps > 0)
    }

    /// Label for logs: the configured track id, or the registry id.
    pub fn label(&self) -> String {
        if self.config.track_id.is_empty() {
            self.id.to_string()
        } else {
            self.config.track_id.clone()
        }
    }

    fn is_observer(&self, observer: &dyn BitrateAllocatorObserver) -> bool {
        same_observer(self.observer.as_ref(), observer)
    }
}

impl fmt::Debug for AllocatableTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatableTrack")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("allocated", &self.allocated)
            .field("media_ratio", &self.media_ratio)
            .field("last_used_bitrate", &self.last_used_bitrate)
            .finish_non_exhaustive()
    }
}

/// Observer identity is the address of the shared object, not its vtable.
fn same_observer(a: &dyn BitrateAllocatorObserver, b: &dyn BitrateAllocatorObserver) -> bool {
    std::ptr::eq(
        a as *const dyn BitrateAllocatorObserver as *const (),
        b as *const dyn BitrateAllocatorObserver as *const (),
    )
}

/// Ordered collection of tracks, at most one per observer.
#[derive(Default)]
pub struct TrackRegistry {
    tracks: Vec<AllocatableTrack>,
    next_id: u64,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`, or replace the config of an existing registration.
    ///
    /// Returns the track's id and whether it was newly inserted. Replacing a
    /// config keeps the track's position and allocation state.
    pub fn upsert(
        &mut self,
        observer: Arc<dyn BitrateAllocatorObserver>,
        config: TrackConfig,
    ) -> (TrackId, bool) {
        if let Some(track) = self.find_mut(observer.as_ref()) {
            track.config = config;
            return (track.id, false);
        }
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.push(AllocatableTrack::new(id, observer, config));
        (id, true)
    }

    /// Remove the track registered for `observer`, if any.
    pub fn remove(&mut self, observer: &dyn BitrateAllocatorObserver) -> Option<AllocatableTrack> {
        let pos = self.tracks.iter().position(|t| t.is_observer(observer))?;
        Some(self.tracks.remove(pos))
    }

    pub fn find(&self, observer: &dyn BitrateAllocatorObserver) -> Option<&AllocatableTrack> {
        self.tracks.iter().find(|t| t.is_observer(observer))
    }

    pub fn find_mut(
        &mut self,
        observer: &dyn BitrateAllocatorObserver,
    ) -> Option<&mut AllocatableTrack> {
        self.tracks.iter_mut().find(|t| t.is_observer(observer))
    }

    pub fn get(&self, id: TrackId) -> Option<&AllocatableTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn as_slice(&self) -> &[AllocatableTrack] {
        &self.tracks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AllocatableTrack> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, AllocatableTrack> {
        self.tracks.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
