//! # Stagecall Core Library
//!
//! Sequencing core for scripted, stage-based experiences: an incoming call,
//! a biometric unlock, a chat-style quiz, a scan, a short video and a
//! dashboard, each advancing on timers, media position or a user gesture
//! before handing off to the next destination.
//!
//! Rendering and routing are external. The presentation reads a
//! [`Snapshot`] and sends intents into a [`ScriptRuntime`]; the runtime calls
//! a [`Navigator`] exactly once when a script completes.
//!
//! ## Architecture
//!
//! - **Scheduler**: cancellable waits owned by a [`TeardownScope`]
//! - **Media**: [`MediaSynchronizer`] over a [`MediaBackend`] (chaining, cue
//!   triggers, autoplay warm-up)
//! - **Gesture**: [`HoldGesture`] hold-to-confirm state machine
//! - **Script**: static stage graphs loaded from TOML ([`ScriptLibrary`])
//! - **Quiz**: index-keyed [`QuizMachine`]
//! - **Sequencer**: [`ScriptRuntime`] drives one stage at a time
//! - **Storage**: [`Config`] under the user config directory

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod error;
pub mod events;
pub mod gesture;
pub mod media;
pub mod navigation;
pub mod quiz;
pub mod scheduler;
pub mod script;
pub mod sequencer;
pub mod storage;

pub use error::{ConfigError, CoreError, PlaybackError, QuizError, ValidationError};
pub use events::Event;
pub use gesture::{GesturePhase, HoldGesture};
pub use media::{
    AutoplayPolicy, MediaBackend, MediaEvent, MediaResourceSpec, MediaSynchronizer, ResourceId,
    SimulatedBackend,
};
pub use navigation::{ChannelNavigator, Navigator, RecordingNavigator};
pub use quiz::{QuizDefinition, QuizMachine, QuizProgress, ScoringRule};
pub use scheduler::{CancelToken, Cancelled, ScheduledWait, TeardownScope};
pub use script::{Script, ScriptId, ScriptLibrary, Stage, StageId};
pub use sequencer::{
    RuntimeConfig, ScriptOutcome, ScriptRuntime, Sender, Snapshot, Transcript, TranscriptEntry,
};
pub use storage::Config;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
