//! Script library: the static stage graphs of the experience.
//!
//! Stored as TOML with one `[[scripts]]` table per script. The built-in
//! library ships with the crate; a user library can replace it through
//! `scripts_path` in the configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ExitCondition, Stage, StageId, Successor};
use crate::error::{CoreError, Result, ValidationError};
use crate::media::{MediaResourceSpec, ResourceId};
use crate::quiz::QuizDefinition;

const BUILTIN: &str = include_str!("../../scripts/experience.toml");

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ScriptId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Script {
    pub id: ScriptId,
    /// Destination at which the presentation mounts this script.
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<MediaResourceSpec>,
    /// Entry stage; the first declared stage when absent.
    #[serde(default)]
    pub entry: Option<StageId>,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub quiz: Option<QuizDefinition>,
}

impl Script {
    pub fn entry_stage(&self) -> Option<&Stage> {
        match &self.entry {
            Some(id) => self.stage(id),
            None => self.stages.first(),
        }
    }

    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.id == id)
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&MediaResourceSpec> {
        self.resources.iter().find(|r| &r.id == id)
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.iter().map(|r| r.id.clone()).collect()
    }

    pub fn is_quiz(&self) -> bool {
        self.quiz.is_some()
    }

    /// Check the stage graph: unique ids, resolvable references, usable
    /// options and branch arms.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let script = self.id.as_str();
        match (&self.quiz, self.stages.is_empty()) {
            (Some(_), false) => {
                return Err(ValidationError::AmbiguousScript {
                    script: script.to_string(),
                })
            }
            (Some(quiz), true) => {
                self.validate_resources()?;
                return quiz.validate(script);
            }
            (None, true) => {
                return Err(ValidationError::EmptyScript {
                    script: script.to_string(),
                })
            }
            (None, false) => {}
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(&stage.id) {
                return Err(ValidationError::DuplicateStage {
                    script: script.to_string(),
                    stage: stage.id.clone(),
                });
            }
        }
        if let Some(entry) = &self.entry {
            if !seen.contains(entry) {
                return Err(ValidationError::UnknownStage {
                    script: script.to_string(),
                    stage: entry.clone(),
                });
            }
        }
        self.validate_resources()?;

        for stage in &self.stages {
            if let Some(next) = &stage.next {
                for target in next.stage_refs() {
                    if !seen.contains(target) {
                        return Err(ValidationError::UnknownStage {
                            script: script.to_string(),
                            stage: target.clone(),
                        });
                    }
                }
            }
            self.validate_exit(stage)?;
        }
        Ok(())
    }

    fn validate_resources(&self) -> std::result::Result<(), ValidationError> {
        let script = self.id.as_str();
        let mut declared = HashSet::new();
        for resource in &self.resources {
            if !declared.insert(&resource.id) {
                return Err(ValidationError::InvalidValue {
                    field: format!("{script}.resources"),
                    message: format!("resource '{}' declared twice", resource.id),
                });
            }
            if !(0.0..=1.0).contains(&resource.volume) {
                return Err(ValidationError::InvalidValue {
                    field: format!("{script}.resources.{}.volume", resource.id),
                    message: format!("{} is outside 0.0..=1.0", resource.volume),
                });
            }
        }

        let referenced = self
            .stages
            .iter()
            .flat_map(|stage| {
                stage
                    .actions
                    .iter()
                    .flat_map(|a| a.resources())
                    .chain(stage.exit.resource())
            });
        for resource in referenced {
            if !declared.contains(resource) {
                return Err(ValidationError::UnknownResource {
                    script: script.to_string(),
                    resource: resource.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_exit(&self, stage: &Stage) -> std::result::Result<(), ValidationError> {
        let script = self.id.as_str();
        match &stage.exit {
            ExitCondition::OptionSelected { options } if options.is_empty() => {
                return Err(ValidationError::EmptyOptions {
                    script: script.to_string(),
                    stage: stage.id.clone(),
                });
            }
            ExitCondition::FormSubmitted { fields } if fields.is_empty() => {
                return Err(ValidationError::InvalidValue {
                    field: format!("{script}.{}.exit.fields", stage.id),
                    message: "form needs at least one field".into(),
                });
            }
            _ => {}
        }

        if let Some(Successor::Branch { arms, .. }) = &stage.next {
            let len = stage.exit.options().len();
            if let Some(arm) = arms.iter().find(|arm| arm.option >= len) {
                return Err(ValidationError::BranchOutOfRange {
                    script: script.to_string(),
                    stage: stage.id.clone(),
                    option: arm.option,
                    len,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptLibrary {
    pub scripts: Vec<Script>,
}

impl ScriptLibrary {
    /// Parse and validate a library document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let library: ScriptLibrary = toml::from_str(content)?;
        library.validate()?;
        Ok(library)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The library that ships with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN)
    }

    /// Load `path` if given, otherwise the built-in library.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.scripts.is_empty() {
            return Err(ValidationError::EmptyLibrary);
        }
        let mut ids = HashSet::new();
        for script in &self.scripts {
            if !ids.insert(&script.id) {
                return Err(ValidationError::DuplicateScript(script.id.to_string()));
            }
            script.validate()?;
        }
        Ok(())
    }

    pub fn get(&self, id: &ScriptId) -> Option<&Script> {
        self.scripts.iter().find(|s| &s.id == id)
    }

    pub fn require(&self, id: &ScriptId) -> Result<&Script> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownScript(id.to_string()))
    }

    /// The script mounted at `route`, if any.
    pub fn by_route(&self, route: &str) -> Option<&Script> {
        self.scripts
            .iter()
            .find(|s| s.route.as_deref() == Some(route))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ScriptId> {
        self.scripts.iter().map(|s| &s.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{BranchArm, EntryAction, ExitOutcome, Target};

    const MINIMAL: &str = r#"
[[scripts]]
id = "call"
route = "/"

[[scripts.resources]]
id = "ringtone"
path = "/sounds/ringtone.mp3"
looping = true

[[scripts.stages]]
id = "incoming"
actions = [{ type = "play_media", resource = "ringtone" }]
exit = { type = "option_selected", options = ["Recusar", "Atender"] }

[scripts.stages.next]
type = "branch"

[[scripts.stages.next.arms]]
option = 0
to = { type = "stage", id = "declined" }

[[scripts.stages.next.arms]]
option = 1
to = { type = "terminal", destination = "/scanner" }

[[scripts.stages]]
id = "declined"
actions = [{ type = "stop_media", resource = "ringtone" }]
next = { type = "end" }
"#;

    fn unvalidated() -> ScriptLibrary {
        toml::from_str(MINIMAL).unwrap()
    }

    #[test]
    fn parses_and_validates_minimal_library() {
        let library = ScriptLibrary::from_toml_str(MINIMAL).unwrap();
        let call = library.get(&"call".into()).unwrap();
        assert_eq!(call.entry_stage().unwrap().id.as_str(), "incoming");
        assert_eq!(
            call.stages[0].actions,
            vec![EntryAction::PlayMedia {
                resource: "ringtone".into()
            }]
        );
        assert!(library.by_route("/").is_some());
        assert!(library.by_route("/nowhere").is_none());
    }

    #[test]
    fn builtin_library_is_valid() {
        let library = ScriptLibrary::builtin().unwrap();
        for id in ["call", "call-express", "scanner", "quiz", "feed", "dashboard"] {
            assert!(library.get(&id.into()).is_some(), "missing script {id}");
        }
        let quiz = library.get(&"quiz".into()).unwrap();
        assert_eq!(quiz.quiz.as_ref().unwrap().steps.len(), 3);
        for route in ["/", "/scanner", "/quiz", "/feed", "/dashboard"] {
            assert!(library.by_route(route).is_some(), "nothing mounted at {route}");
        }
    }

    #[test]
    fn builtin_call_branches_on_answer() {
        let library = ScriptLibrary::builtin().unwrap();
        let call = library.get(&"call".into()).unwrap();
        let incoming = call.entry_stage().unwrap();
        let answered = incoming.next.as_ref().unwrap().resolve(&ExitOutcome::OptionSelected {
            index: 1,
            label: "Atender".into(),
        });
        assert_eq!(answered, Some(Target::Stage { id: "answered".into() }));
    }

    #[test]
    fn rejects_unknown_stage_reference() {
        let mut library = unvalidated();
        library.scripts[0].stages[1].id = "gone".into();
        assert!(matches!(
            library.validate(),
            Err(ValidationError::UnknownStage { .. })
        ));
    }

    #[test]
    fn rejects_unknown_resource() {
        let mut library = unvalidated();
        library.scripts[0].stages[0].actions = vec![EntryAction::PlayMedia {
            resource: "missing".into(),
        }];
        assert_eq!(
            library.validate(),
            Err(ValidationError::UnknownResource {
                script: "call".into(),
                resource: "missing".into()
            })
        );
    }

    #[test]
    fn rejects_branch_out_of_range() {
        let mut library = unvalidated();
        library.scripts[0].stages[0].next = Some(Successor::Branch {
            arms: vec![BranchArm {
                option: 5,
                to: Target::End,
            }],
            otherwise: None,
        });
        assert!(matches!(
            library.validate(),
            Err(ValidationError::BranchOutOfRange {
                option: 5,
                len: 2,
                ..
            })
        ));
    }

    #[test]
    fn rejects_duplicate_stage() {
        let mut library = unvalidated();
        library.scripts[0].stages[1].id = "incoming".into();
        assert!(matches!(
            library.validate(),
            Err(ValidationError::DuplicateStage { .. })
        ));
    }

    #[test]
    fn rejects_empty_options() {
        let mut library = unvalidated();
        library.scripts[0].stages[0].exit = ExitCondition::OptionSelected {
            options: Vec::new(),
        };
        assert!(matches!(
            library.validate(),
            Err(ValidationError::EmptyOptions { .. })
        ));
    }

    #[test]
    fn rejects_empty_library() {
        assert!(matches!(
            ScriptLibrary::from_toml_str("scripts = []"),
            Err(CoreError::Validation(ValidationError::EmptyLibrary))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let library = ScriptLibrary::load(&path).unwrap();
        assert_eq!(library.ids().count(), 1);
    }
}
