//! Stage entry actions.
//!
//! Actions run in declared order when a stage activates. `wait`,
//! `await_media_end` suspend the stage; everything else returns at once.

use serde::{Deserialize, Serialize};

use crate::media::ResourceId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryAction {
    /// Append a system line to the transcript.
    EmitLog { text: String },

    SetStatus { text: String },

    SetFlag {
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },

    PlayMedia { resource: ResourceId },

    /// Pause and rewind.
    StopMedia { resource: ResourceId },

    /// Silently pre-authorize resources. An empty list means every resource
    /// of the script.
    WarmUp {
        #[serde(default)]
        resources: Vec<ResourceId>,
    },

    /// Start `to` `gap_ms` after `from` completes naturally.
    ChainMedia {
        from: ResourceId,
        to: ResourceId,
        #[serde(default)]
        gap_ms: u64,
    },

    AwaitMediaEnd { resource: ResourceId },

    /// Set `flag` the first time `resource` plays past `at_ms`.
    ArmCue {
        resource: ResourceId,
        at_ms: u64,
        flag: String,
    },

    Wait { ms: u64 },

    /// Move the meter linearly from `from` to `to`. Does not suspend.
    AnimateMeter { from: f64, to: f64, duration_ms: u64 },

    /// Start the call-duration counter. It runs until the script ends.
    StartClock,
}

fn default_true() -> bool {
    true
}

impl EntryAction {
    /// Resources referenced by this action.
    pub fn resources(&self) -> Vec<&ResourceId> {
        match self {
            EntryAction::PlayMedia { resource }
            | EntryAction::StopMedia { resource }
            | EntryAction::AwaitMediaEnd { resource }
            | EntryAction::ArmCue { resource, .. } => vec![resource],
            EntryAction::WarmUp { resources } => resources.iter().collect(),
            EntryAction::ChainMedia { from, to, .. } => vec![from, to],
            _ => Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EntryAction::EmitLog { .. } => "emit_log",
            EntryAction::SetStatus { .. } => "set_status",
            EntryAction::SetFlag { .. } => "set_flag",
            EntryAction::PlayMedia { .. } => "play_media",
            EntryAction::StopMedia { .. } => "stop_media",
            EntryAction::WarmUp { .. } => "warm_up",
            EntryAction::ChainMedia { .. } => "chain_media",
            EntryAction::AwaitMediaEnd { .. } => "await_media_end",
            EntryAction::ArmCue { .. } => "arm_cue",
            EntryAction::Wait { .. } => "wait",
            EntryAction::AnimateMeter { .. } => "animate_meter",
            EntryAction::StartClock => "start_clock",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Actions {
        actions: Vec<EntryAction>,
    }

    #[test]
    fn deserialize_tagged_actions() {
        let parsed: Actions = toml::from_str(
            r#"
            [[actions]]
            type = "set_flag"
            flag = "fingerprint"

            [[actions]]
            type = "chain_media"
            from = "a"
            to = "b"
            gap_ms = 1000

            [[actions]]
            type = "start_clock"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.actions,
            vec![
                EntryAction::SetFlag {
                    flag: "fingerprint".into(),
                    value: true
                },
                EntryAction::ChainMedia {
                    from: "a".into(),
                    to: "b".into(),
                    gap_ms: 1000
                },
                EntryAction::StartClock,
            ]
        );
    }

    #[test]
    fn serialize_uses_snake_case_tag() {
        let toml = toml::to_string(&EntryAction::Wait { ms: 500 }).unwrap();
        assert!(toml.contains(r#"type = "wait""#));
        assert!(toml.contains("ms = 500"));
    }

    #[test]
    fn referenced_resources() {
        let chain = EntryAction::ChainMedia {
            from: "a".into(),
            to: "b".into(),
            gap_ms: 0,
        };
        assert_eq!(chain.resources().len(), 2);
        assert!(EntryAction::StartClock.resources().is_empty());
    }
}
