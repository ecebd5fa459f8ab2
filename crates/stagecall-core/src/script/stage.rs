use std::fmt;

use serde::{Deserialize, Serialize};

use super::EntryAction;
use crate::media::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One discrete phase of a script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: StageId,
    #[serde(default)]
    pub actions: Vec<EntryAction>,
    #[serde(default)]
    pub exit: ExitCondition,
    /// `None` is a configuration defect surfaced when the stage exits.
    #[serde(default)]
    pub next: Option<Successor>,
}

/// What a stage waits for once its entry actions have run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitCondition {
    #[default]
    Immediate,
    Elapsed {
        ms: u64,
    },
    /// A sustained press of `threshold_ms`.
    GestureComplete {
        threshold_ms: u64,
    },
    MediaTimeReached {
        resource: ResourceId,
        at_ms: u64,
    },
    MediaEnded {
        resource: ResourceId,
    },
    OptionSelected {
        options: Vec<String>,
    },
    FormSubmitted {
        fields: Vec<String>,
    },
}

impl ExitCondition {
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            ExitCondition::MediaTimeReached { resource, .. }
            | ExitCondition::MediaEnded { resource } => Some(resource),
            _ => None,
        }
    }

    pub fn options(&self) -> &[String] {
        match self {
            ExitCondition::OptionSelected { options } => options,
            _ => &[],
        }
    }
}

/// How a stage's exit condition was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    Immediate,
    Elapsed,
    GestureCompleted,
    MediaTimeReached,
    MediaEnded,
    OptionSelected { index: usize, label: String },
    FormSubmitted { values: Vec<String> },
}

impl ExitOutcome {
    pub fn selected_option(&self) -> Option<usize> {
        match self {
            ExitOutcome::OptionSelected { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Where control goes after a stage exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Successor {
    Stage { id: StageId },
    /// Hand off to the navigation service.
    Terminal { destination: String },
    /// Finish without navigating.
    End,
    /// Pick by the selected option index.
    Branch {
        arms: Vec<BranchArm>,
        #[serde(default)]
        otherwise: Option<Target>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchArm {
    pub option: usize,
    pub to: Target,
}

/// A resolved successor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Stage { id: StageId },
    Terminal { destination: String },
    End,
}

impl Successor {
    /// Resolve against the exit outcome. `None` means no arm matched and
    /// there is no fallback.
    pub fn resolve(&self, outcome: &ExitOutcome) -> Option<Target> {
        match self {
            Successor::Stage { id } => Some(Target::Stage { id: id.clone() }),
            Successor::Terminal { destination } => Some(Target::Terminal {
                destination: destination.clone(),
            }),
            Successor::End => Some(Target::End),
            Successor::Branch { arms, otherwise } => {
                let selected = outcome.selected_option();
                arms.iter()
                    .find(|arm| Some(arm.option) == selected)
                    .map(|arm| arm.to.clone())
                    .or_else(|| otherwise.clone())
            }
        }
    }

    /// Every stage id this successor can lead to.
    pub fn stage_refs(&self) -> Vec<&StageId> {
        fn target_ref(target: &Target) -> Option<&StageId> {
            match target {
                Target::Stage { id } => Some(id),
                _ => None,
            }
        }
        match self {
            Successor::Stage { id } => vec![id],
            Successor::Branch { arms, otherwise } => arms
                .iter()
                .map(|arm| &arm.to)
                .chain(otherwise.iter())
                .filter_map(target_ref)
                .collect(),
            Successor::Terminal { .. } | Successor::End => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch() -> Successor {
        Successor::Branch {
            arms: vec![
                BranchArm {
                    option: 0,
                    to: Target::Stage { id: "declined".into() },
                },
                BranchArm {
                    option: 1,
                    to: Target::Stage { id: "answered".into() },
                },
            ],
            otherwise: None,
        }
    }

    #[test]
    fn branch_resolves_by_index_not_label() {
        let picked = ExitOutcome::OptionSelected {
            index: 1,
            label: "Recusar".into(),
        };
        assert_eq!(
            branch().resolve(&picked),
            Some(Target::Stage { id: "answered".into() })
        );
    }

    #[test]
    fn branch_without_match_or_fallback_is_none() {
        assert_eq!(branch().resolve(&ExitOutcome::Elapsed), None);
    }

    #[test]
    fn branch_falls_back_to_otherwise() {
        let successor = Successor::Branch {
            arms: Vec::new(),
            otherwise: Some(Target::Terminal {
                destination: "/feed".into(),
            }),
        };
        assert_eq!(
            successor.resolve(&ExitOutcome::Immediate),
            Some(Target::Terminal {
                destination: "/feed".into()
            })
        );
    }

    #[test]
    fn stage_deserializes_with_defaults() {
        let stage: Stage = toml::from_str(
            r#"
            id = "declined"
            [next]
            type = "end"
            "#,
        )
        .unwrap();
        assert_eq!(stage.exit, ExitCondition::Immediate);
        assert!(stage.actions.is_empty());
        assert_eq!(stage.next, Some(Successor::End));
    }

    #[test]
    fn branch_stage_refs_include_fallback() {
        let successor = Successor::Branch {
            arms: vec![BranchArm {
                option: 0,
                to: Target::Stage { id: "a".into() },
            }],
            otherwise: Some(Target::Stage { id: "b".into() }),
        };
        let refs: Vec<&str> = successor.stage_refs().iter().map(|s| s.as_str()).collect();
        assert_eq!(refs, vec!["a", "b"]);
    }
}
