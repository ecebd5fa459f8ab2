//! In-memory media backend driven by tokio time.
//!
//! Positions advance with the (possibly paused) tokio clock, non-looping
//! resources complete at their declared duration, and an autoplay policy
//! refuses programmatic playback the way restrictive hosts do: a resource may
//! start only if it was started once before, or a user gesture happened
//! within the activation window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{MediaBackend, MediaEvent, MediaResourceSpec, ResourceId};
use crate::error::PlaybackError;
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    /// Every play succeeds.
    Allowed,
    /// Playback needs a recent user gesture or a previously authorized resource.
    #[default]
    RequiresGesture,
}

/// One successful playback start.
#[derive(Debug, Clone)]
pub struct PlayRecord {
    pub resource: ResourceId,
    pub at: Instant,
    pub volume: f32,
}

#[derive(Debug)]
struct Track {
    duration: Option<Duration>,
    looping: bool,
    volume: f32,
    /// Position when playback last started or was paused.
    base: Duration,
    started_at: Option<Instant>,
    /// Bumped on every start/pause/seek; stale completions compare against it.
    generation: u64,
    authorized: bool,
    ended: bool,
}

impl Track {
    fn new(spec: &MediaResourceSpec) -> Self {
        Self {
            duration: spec.duration_ms.map(Duration::from_millis),
            looping: spec.looping,
            volume: spec.volume.clamp(0.0, 1.0),
            base: Duration::ZERO,
            started_at: None,
            generation: 0,
            authorized: false,
            ended: false,
        }
    }

    fn position(&self, now: Instant) -> Duration {
        let Some(start) = self.started_at else {
            return self.base;
        };
        let raw = self.base + now.saturating_duration_since(start);
        match self.duration {
            Some(d) if self.looping && !d.is_zero() => {
                Duration::from_nanos((raw.as_nanos() % d.as_nanos()) as u64)
            }
            Some(d) => raw.min(d),
            None => raw,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        if self.looping {
            return None;
        }
        self.duration.map(|d| d.saturating_sub(self.base))
    }
}

#[derive(Debug, Default)]
struct SimState {
    tracks: HashMap<ResourceId, Track>,
    activated_until: Option<Instant>,
    plays: Vec<PlayRecord>,
}

#[derive(Debug)]
struct SimInner {
    state: Mutex<SimState>,
    events: broadcast::Sender<MediaEvent>,
    policy: AutoplayPolicy,
    activation_window: Duration,
}

impl SimInner {
    fn finish(&self, resource: &ResourceId, generation: u64) {
        {
            let mut state = lock(&self.state);
            let Some(track) = state.tracks.get_mut(resource) else {
                return;
            };
            if track.generation != generation || track.started_at.is_none() {
                return;
            }
            track.base = track.duration.unwrap_or_default();
            track.started_at = None;
            track.ended = true;
        }
        let _ = self.events.send(MediaEvent::Ended {
            resource: resource.clone(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    inner: Arc<SimInner>,
}

impl SimulatedBackend {
    pub fn new(policy: AutoplayPolicy, activation_window: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState::default()),
                events,
                policy,
                activation_window,
            }),
        }
    }

    /// A backend that never blocks playback.
    pub fn permissive() -> Self {
        Self::new(AutoplayPolicy::Allowed, Duration::ZERO)
    }

    pub fn policy(&self) -> AutoplayPolicy {
        self.inner.policy
    }

    /// Every successful start so far, in order.
    pub fn plays(&self) -> Vec<PlayRecord> {
        lock(&self.inner.state).plays.clone()
    }

    /// Starts of `resource` at a non-zero volume.
    pub fn audible_plays(&self, resource: &ResourceId) -> usize {
        lock(&self.inner.state)
            .plays
            .iter()
            .filter(|p| &p.resource == resource && p.volume > 0.0)
            .count()
    }

    pub fn volume(&self, resource: &ResourceId) -> Option<f32> {
        lock(&self.inner.state).tracks.get(resource).map(|t| t.volume)
    }

    fn schedule_end(&self, resource: ResourceId, generation: u64, remaining: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            inner.finish(&resource, generation);
        });
    }
}

impl MediaBackend for SimulatedBackend {
    fn prepare(&self, spec: &MediaResourceSpec) {
        lock(&self.inner.state)
            .tracks
            .entry(spec.id.clone())
            .or_insert_with(|| Track::new(spec));
    }

    fn play(&self, resource: &ResourceId) -> Result<(), PlaybackError> {
        let now = Instant::now();
        let (generation, remaining) = {
            let mut state = lock(&self.inner.state);
            let activated = state.activated_until.is_some_and(|until| now <= until);
            let Some(track) = state.tracks.get_mut(resource) else {
                return Err(PlaybackError::UnknownResource(resource.clone()));
            };
            if track.started_at.is_some() {
                return Ok(());
            }
            if self.inner.policy == AutoplayPolicy::RequiresGesture
                && !track.authorized
                && !activated
            {
                return Err(PlaybackError::Blocked {
                    resource: resource.clone(),
                });
            }

            track.authorized = true;
            if track.ended {
                track.base = Duration::ZERO;
                track.ended = false;
            }
            track.started_at = Some(now);
            track.generation += 1;
            let generation = track.generation;
            let remaining = track.remaining();
            let volume = track.volume;
            state.plays.push(PlayRecord {
                resource: resource.clone(),
                at: now,
                volume,
            });
            (generation, remaining)
        };

        let _ = self.inner.events.send(MediaEvent::Started {
            resource: resource.clone(),
        });
        if let Some(remaining) = remaining {
            self.schedule_end(resource.clone(), generation, remaining);
        }
        Ok(())
    }

    fn pause(&self, resource: &ResourceId) {
        let now = Instant::now();
        {
            let mut state = lock(&self.inner.state);
            let Some(track) = state.tracks.get_mut(resource) else {
                return;
            };
            if track.started_at.is_none() {
                return;
            }
            track.base = track.position(now);
            track.started_at = None;
            track.generation += 1;
        }
        let _ = self.inner.events.send(MediaEvent::Paused {
            resource: resource.clone(),
        });
    }

    fn set_position(&self, resource: &ResourceId, position: Duration) {
        let now = Instant::now();
        let rescheduled = {
            let mut state = lock(&self.inner.state);
            let Some(track) = state.tracks.get_mut(resource) else {
                return;
            };
            track.base = match track.duration {
                Some(d) => position.min(d),
                None => position,
            };
            track.ended = false;
            if track.started_at.is_some() {
                track.started_at = Some(now);
                track.generation += 1;
                track.remaining().map(|r| (track.generation, r))
            } else {
                None
            }
        };
        if let Some((generation, remaining)) = rescheduled {
            self.schedule_end(resource.clone(), generation, remaining);
        }
    }

    fn set_volume(&self, resource: &ResourceId, volume: f32) {
        if let Some(track) = lock(&self.inner.state).tracks.get_mut(resource) {
            track.volume = volume.clamp(0.0, 1.0);
        }
    }

    fn position(&self, resource: &ResourceId) -> Duration {
        let now = Instant::now();
        lock(&self.inner.state)
            .tracks
            .get(resource)
            .map(|t| t.position(now))
            .unwrap_or_default()
    }

    fn is_playing(&self, resource: &ResourceId) -> bool {
        lock(&self.inner.state)
            .tracks
            .get(resource)
            .is_some_and(|t| t.started_at.is_some())
    }

    fn has_ended(&self, resource: &ResourceId) -> bool {
        lock(&self.inner.state)
            .tracks
            .get(resource)
            .is_some_and(|t| t.ended)
    }

    fn notify_user_gesture(&self) {
        let until = Instant::now() + self.inner.activation_window;
        lock(&self.inner.state).activated_until = Some(until);
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.inner.events.subscribe()
    }
}
