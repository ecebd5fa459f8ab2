use std::collections::BTreeMap;

use serde::Serialize;

use super::TranscriptEntry;
use crate::gesture::GesturePhase;
use crate::script::{ScriptId, StageId};

/// Read-only view of the runtime, published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub script_id: Option<ScriptId>,
    pub current_stage_id: Option<StageId>,
    /// Activation counter of the current stage.
    pub epoch: u64,
    pub transcript: Vec<TranscriptEntry>,
    /// 0.0 ..= 100.0
    pub gesture_progress: f64,
    /// `None` when the current stage does not wait for a hold.
    pub gesture_phase: Option<GesturePhase>,
    /// Playback was refused; the unlock overlay should be shown.
    pub media_is_blocked: bool,
    pub numeric_meter_value: f64,
    pub options: Vec<String>,
    pub form_fields: Vec<String>,
    /// The typing indicator is showing.
    pub typing: bool,
    pub status_text: Option<String>,
    pub clock_secs: u64,
    pub audio_unlocked: bool,
    pub flags: BTreeMap<String, bool>,
    pub running: bool,
}

impl Snapshot {
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// `mm:ss` rendering of the call clock.
    pub fn clock_display(&self) -> String {
        format!("{:02}:{:02}", self.clock_secs / 60, self.clock_secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_display_pads() {
        let snap = Snapshot {
            clock_secs: 75,
            ..Snapshot::default()
        };
        assert_eq!(snap.clock_display(), "01:15");
    }

    #[test]
    fn missing_flag_is_false() {
        assert!(!Snapshot::default().flag("fingerprint_requested"));
    }
}
