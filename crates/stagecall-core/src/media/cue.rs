//! One-shot time-code triggers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::ResourceId;
use crate::scheduler::CancelToken;

/// A (resource, threshold) pair polled while the resource plays.
///
/// Fires at most once per armed lifetime. Disarming (or closing the owning
/// scope) silences it even if the resource keeps playing past the threshold.
#[derive(Debug)]
pub struct CueTrigger {
    resource: ResourceId,
    threshold: Duration,
    token: CancelToken,
    fired: AtomicBool,
}

impl CueTrigger {
    pub fn new(resource: ResourceId, threshold: Duration, token: CancelToken) -> Self {
        Self {
            resource,
            threshold,
            token,
            fired: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        !self.is_fired() && !self.token.is_cancelled()
    }

    pub fn disarm(&self) {
        self.token.cancel();
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Feed one poll sample. Returns `true` exactly once: the first sample
    /// where the resource is playing at or past the threshold while armed.
    pub fn observe(&self, position: Duration, playing: bool) -> bool {
        if !playing || position < self.threshold || self.token.is_cancelled() {
            return false;
        }
        !self.fired.swap(true, Ordering::SeqCst)
    }
}
