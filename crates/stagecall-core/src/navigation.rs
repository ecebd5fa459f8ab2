//! Core → Navigation seam.
//!
//! The runtime calls [`Navigator::advance_to`] once per completed script.
//! Route mechanics belong to the implementor.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

use crate::lock;

pub trait Navigator: Send + Sync {
    fn advance_to(&self, destination: &str);
}

/// Forwards destinations to a channel, for hosts that route asynchronously.
#[derive(Debug, Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn advance_to(&self, destination: &str) {
        if self.tx.send(destination.to_string()).is_err() {
            warn!(destination, "navigation receiver dropped");
        }
    }
}

/// Records every call; useful to assert the exactly-once handoff.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    calls: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn advance_to(&self, destination: &str) {
        lock(&self.calls).push(destination.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_navigator_forwards_destinations() {
        let (nav, mut rx) = ChannelNavigator::new();
        nav.advance_to("/scanner");
        assert_eq!(rx.recv().await.as_deref(), Some("/scanner"));
    }

    #[test]
    fn recording_navigator_keeps_order() {
        let nav = RecordingNavigator::new();
        nav.advance_to("/quiz");
        nav.advance_to("/feed");
        assert_eq!(nav.calls(), vec!["/quiz", "/feed"]);
    }
}
