use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::ResourceId;
use crate::script::StageId;
use crate::sequencer::{ScriptOutcome, TranscriptEntry};

/// Every state change in the runtime produces an Event.
/// The presentation renders snapshots; observers and logs subscribe to events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ScriptStarted {
        script_id: String,
        run_id: Uuid,
        at: DateTime<Utc>,
    },
    ScriptFinished {
        script_id: String,
        run_id: Uuid,
        outcome: ScriptOutcome,
        at: DateTime<Utc>,
    },
    StageEntered {
        stage_id: StageId,
        epoch: u64,
        at: DateTime<Utc>,
    },
    /// Stage left; `cancelled` counts waits/triggers/loops torn down with it.
    StageExited {
        stage_id: StageId,
        epoch: u64,
        cancelled: usize,
        at: DateTime<Utc>,
    },
    LogEmitted {
        text: String,
        at: DateTime<Utc>,
    },
    StatusChanged {
        text: String,
        at: DateTime<Utc>,
    },
    FlagSet {
        flag: String,
        value: bool,
        at: DateTime<Utc>,
    },
    MediaStarted {
        resource: ResourceId,
        at: DateTime<Utc>,
    },
    /// Playback refused by the environment; the unlock overlay is shown.
    MediaBlocked {
        resource: ResourceId,
        at: DateTime<Utc>,
    },
    MediaUnblocked {
        resource: ResourceId,
        at: DateTime<Utc>,
    },
    MediaWarmed {
        resource: ResourceId,
        at: DateTime<Utc>,
    },
    WarmUpRefused {
        resource: ResourceId,
        at: DateTime<Utc>,
    },
    CueFired {
        resource: ResourceId,
        at_ms: u64,
        at: DateTime<Utc>,
    },
    AudioUnlocked {
        at: DateTime<Utc>,
    },
    GestureStarted {
        at: DateTime<Utc>,
    },
    /// Hold released before completion; progress is discarded.
    GestureReleased {
        progress: f64,
        at: DateTime<Utc>,
    },
    GestureCompleted {
        at: DateTime<Utc>,
    },
    OptionsPresented {
        options: Vec<String>,
        at: DateTime<Utc>,
    },
    OptionSelected {
        index: usize,
        label: String,
        at: DateTime<Utc>,
    },
    FormSubmitted {
        fields: Vec<String>,
        at: DateTime<Utc>,
    },
    TranscriptAppended {
        entry: TranscriptEntry,
    },
    /// An intent or callback referenced a stage that is no longer current.
    StaleEventIgnored {
        epoch: u64,
        current_epoch: u64,
        at: DateTime<Utc>,
    },
    AdvancedTo {
        destination: String,
        at: DateTime<Utc>,
    },
}
