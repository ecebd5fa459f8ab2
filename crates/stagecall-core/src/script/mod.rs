//! Static script definitions.
//!
//! A script is either a stage graph or a quiz, plus the media resources it
//! uses. Scripts are loaded once from TOML, validated, and never mutated.

pub mod action;
pub mod library;
pub mod stage;

pub use action::EntryAction;
pub use library::{Script, ScriptId, ScriptLibrary};
pub use stage::{BranchArm, ExitCondition, ExitOutcome, Stage, StageId, Successor, Target};
