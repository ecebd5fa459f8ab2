//! The Core → Media Subsystem seam.

use std::time::Duration;

use tokio::sync::broadcast;

use super::{MediaResourceSpec, ResourceId};
use crate::error::PlaybackError;

/// Playback notifications fed back from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Started { resource: ResourceId },
    /// Stopped before natural completion.
    Paused { resource: ResourceId },
    /// Natural completion.
    Ended { resource: ResourceId },
}

impl MediaEvent {
    pub fn resource(&self) -> &ResourceId {
        match self {
            MediaEvent::Started { resource }
            | MediaEvent::Paused { resource }
            | MediaEvent::Ended { resource } => resource,
        }
    }
}

/// A host environment that can play audio/video resources.
///
/// Calls return immediately. `play` reports an autoplay refusal as
/// [`PlaybackError::Blocked`] instead of failing silently.
pub trait MediaBackend: Send + Sync {
    /// Register a resource. Idempotent.
    fn prepare(&self, spec: &MediaResourceSpec);

    fn play(&self, resource: &ResourceId) -> Result<(), PlaybackError>;

    fn pause(&self, resource: &ResourceId);

    fn set_position(&self, resource: &ResourceId, position: Duration);

    fn set_volume(&self, resource: &ResourceId, volume: f32);

    fn position(&self, resource: &ResourceId) -> Duration;

    fn is_playing(&self, resource: &ResourceId) -> bool;

    /// True if the latest playback ran to natural completion and was not
    /// restarted or rewound since.
    fn has_ended(&self, resource: &ResourceId) -> bool;

    /// A real user gesture just happened (tap, press, click).
    fn notify_user_gesture(&self) {}

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;
}
