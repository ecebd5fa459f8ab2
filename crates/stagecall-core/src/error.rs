//! Core error types for stagecall-core.
//!
//! Playback refusals, cancelled waits and stale events are expected during a
//! normal run and are modelled so callers can recover locally. Only
//! configuration defects (`ScriptExhausted`, validation failures) halt a
//! script.

use std::path::PathBuf;
use thiserror::Error;

use crate::media::ResourceId;
use crate::scheduler::Cancelled;
use crate::script::StageId;

/// Core error type for stagecall-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Script definition failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The sequencer reached a stage with nowhere to go.
    #[error("Script '{script}' exhausted at stage '{stage}': no successor and no terminal handoff")]
    ScriptExhausted { script: String, stage: StageId },

    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Script '{0}' is already running")]
    ScriptAlreadyRunning(String),

    /// The runtime was shut down and accepts no further scripts.
    #[error("Runtime is shut down")]
    RuntimeClosed,

    /// The script's scope was torn down while it was suspended.
    #[error("{0}")]
    Cancelled(#[from] Cancelled),

    #[error("Quiz error: {0}")]
    Quiz(#[from] QuizError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to access the data directory
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Script validation errors.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Script library contains no scripts")]
    EmptyLibrary,

    #[error("Duplicate script id '{0}'")]
    DuplicateScript(String),

    #[error("Script '{script}' declares stage '{stage}' more than once")]
    DuplicateStage { script: String, stage: StageId },

    #[error("Script '{script}' references unknown stage '{stage}'")]
    UnknownStage { script: String, stage: StageId },

    #[error("Script '{script}' references unknown media resource '{resource}'")]
    UnknownResource { script: String, resource: ResourceId },

    #[error("Script '{script}' stage '{stage}' offers no options")]
    EmptyOptions { script: String, stage: StageId },

    #[error("Script '{script}' stage '{stage}' branches on option {option} but offers only {len}")]
    BranchOutOfRange {
        script: String,
        stage: StageId,
        option: usize,
        len: usize,
    },

    #[error("Script '{script}' has neither stages nor a quiz")]
    EmptyScript { script: String },

    #[error("Script '{script}' declares both stages and a quiz")]
    AmbiguousScript { script: String },

    #[error("Quiz in script '{script}' has no steps")]
    EmptyQuiz { script: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Media playback errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The environment refused to start playback without a fresh user gesture.
    #[error("Playback of '{resource}' blocked by autoplay policy")]
    Blocked { resource: ResourceId },

    #[error("Unknown media resource '{0}'")]
    UnknownResource(ResourceId),
}

/// Quiz state machine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuizError {
    #[error("Quiz already finished")]
    Finished,

    #[error("Option {option} out of range for step {step} ({len} options)")]
    OptionOutOfRange { step: usize, option: usize, len: usize },
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
