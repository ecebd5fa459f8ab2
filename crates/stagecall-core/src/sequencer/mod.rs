//! Stage sequencer.
//!
//! [`ScriptRuntime`] owns everything about the running script: the current
//! stage, its teardown scope, the hold gesture, the transcript and the flow
//! flags. Exactly one stage is active at a time. Every wait, cue trigger and
//! tick loop a stage spawns is registered with the stage's scope, which is
//! closed before the successor's entry actions run.
//!
//! Intents from the presentation are stamped with the epoch of the stage
//! that was current when they arrived. The driver drops any signal whose
//! epoch no longer matches.

mod driver;
mod quiz;
mod runtime;
mod snapshot;
mod transcript;

pub use runtime::{Decider, RuntimeConfig, ScriptRuntime};
pub use snapshot::Snapshot;
pub use transcript::{Sender, Transcript, TranscriptEntry};

use serde::{Deserialize, Serialize};

/// How a script run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptOutcome {
    /// The navigation service was called with `destination`.
    HandedOff { destination: String },
    /// Finished without navigation (e.g. a declined call).
    Ended,
    /// Torn down before completion.
    Abandoned,
}

impl ScriptOutcome {
    pub fn destination(&self) -> Option<&str> {
        match self {
            ScriptOutcome::HandedOff { destination } => Some(destination),
            _ => None,
        }
    }
}
