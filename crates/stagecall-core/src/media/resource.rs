use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a playable asset within a script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Static declaration of a media resource, as written in a script library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaResourceSpec {
    pub id: ResourceId,
    pub path: String,
    #[serde(default)]
    pub looping: bool,
    /// Audible volume, 0.0 ..= 1.0.
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Natural length in milliseconds. Only the simulated backend reads this;
    /// `None` plays forever.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

fn default_volume() -> f32 {
    1.0
}

/// Synchronizer-side record of a resource.
///
/// Playback position and the playing flag live in the backend; this keeps
/// what the synchronizer itself decides (audible volume, warm state).
#[derive(Debug, Clone)]
pub struct MediaResource {
    spec: MediaResourceSpec,
    warmed: bool,
    starts: u32,
}

impl MediaResource {
    pub fn new(spec: MediaResourceSpec) -> Self {
        Self {
            spec,
            warmed: false,
            starts: 0,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.spec.id
    }

    pub fn path(&self) -> &str {
        &self.spec.path
    }

    pub fn looping(&self) -> bool {
        self.spec.looping
    }

    pub fn volume(&self) -> f32 {
        self.spec.volume.clamp(0.0, 1.0)
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed
    }

    /// Successful audible starts requested through the synchronizer.
    pub fn starts(&self) -> u32 {
        self.starts
    }

    pub(crate) fn mark_warmed(&mut self) {
        self.warmed = true;
    }

    pub(crate) fn record_start(&mut self) {
        self.starts += 1;
        self.warmed = true;
    }
}
