//! Hold-to-confirm gesture.
//!
//! The controller is clock-driven: it owns no task. The caller feeds
//! `start`/`release` from user intents and calls `tick()` at a high cadence
//! while holding.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Holding -> (Idle | Completed)
//! ```
//!
//! `Completed` is terminal. Releasing early discards all progress.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GesturePhase {
    #[default]
    Idle,
    Holding,
    Completed,
}

#[derive(Debug, Clone)]
pub struct HoldGesture {
    threshold: Duration,
    phase: GesturePhase,
    started_at: Option<Instant>,
    /// 0.0 ..= 100.0, as of the last tick.
    progress: f64,
}

impl HoldGesture {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            phase: GesturePhase::Idle,
            started_at: None,
            progress: 0.0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> GesturePhase {
        self.phase
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_holding(&self) -> bool {
        self.phase == GesturePhase::Holding
    }

    pub fn is_completed(&self) -> bool {
        self.phase == GesturePhase::Completed
    }

    /// Progress the hold would have at `now`, without mutating state.
    pub fn progress_at(&self, now: Instant) -> f64 {
        match (self.phase, self.started_at) {
            (GesturePhase::Completed, _) => 100.0,
            (GesturePhase::Holding, Some(start)) => {
                if self.threshold.is_zero() {
                    return 100.0;
                }
                let elapsed = now.saturating_duration_since(start);
                (100.0 * elapsed.as_secs_f64() / self.threshold.as_secs_f64()).min(100.0)
            }
            _ => 0.0,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, now: Instant) -> Option<Event> {
        match self.phase {
            GesturePhase::Idle => {
                self.phase = GesturePhase::Holding;
                self.started_at = Some(now);
                self.progress = 0.0;
                Some(Event::GestureStarted { at: Utc::now() })
            }
            // Already holding, or unlocked for good.
            GesturePhase::Holding | GesturePhase::Completed => None,
        }
    }

    /// Call periodically while holding. Returns `Some(Event::GestureCompleted)`
    /// exactly once, on the tick where progress reaches 100.
    pub fn tick(&mut self, now: Instant) -> Option<Event> {
        if self.phase != GesturePhase::Holding {
            return None;
        }
        self.progress = self.progress_at(now);
        if self.progress >= 100.0 {
            self.progress = 100.0;
            self.phase = GesturePhase::Completed;
            self.started_at = None;
            return Some(Event::GestureCompleted { at: Utc::now() });
        }
        None
    }

    /// Release before completion. A release that lands at or past the
    /// threshold completes the hold instead.
    pub fn release(&mut self, now: Instant) -> Option<Event> {
        if self.phase != GesturePhase::Holding {
            return None;
        }
        if let Some(done) = self.tick(now) {
            return Some(done);
        }
        let progress = self.progress;
        self.phase = GesturePhase::Idle;
        self.started_at = None;
        self.progress = 0.0;
        Some(Event::GestureReleased {
            progress,
            at: Utc::now(),
        })
    }
}
