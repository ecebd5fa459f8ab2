//! Media cue synchronizer.
//!
//! Wraps the host's playable resources behind [`MediaBackend`] and adds the
//! sequencing the stages need: exclusive foreground playback, blocked-play
//! recovery, sequential chaining, time-code cue triggers and silent warm-up.

mod backend;
mod cue;
mod resource;
mod simulated;
mod synchronizer;

pub use backend::{MediaBackend, MediaEvent};
pub use cue::CueTrigger;
pub use resource::{MediaResource, MediaResourceSpec, ResourceId};
pub use simulated::{AutoplayPolicy, PlayRecord, SimulatedBackend};
pub use synchronizer::{MediaNotice, MediaSynchronizer, NoticeHook, PlayOutcome, WarmUpOutcome};
