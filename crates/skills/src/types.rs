use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::Result, version::Version};

// ── Conditions ───────────────────────────────────────────────────────────────

/// Declarative prerequisites gating whether a skill may load.
///
/// Keys follow the install-file format; the descriptive spellings are accepted
/// as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditions {
    #[serde(
        rename = "aliceMinVersion",
        alias = "minimumHostVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_host_version: Option<Version>,
    /// Supported languages. Empty means any.
    #[serde(rename = "lang", alias = "language", skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    /// `true`: needs connectivity. `false`: only works in offline-only mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    /// Sibling skills that must be installed and active.
    #[serde(rename = "skill", alias = "requiresPlugin", skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// `author/name` pairs that must not be active.
    #[serde(
        rename = "notSkill",
        alias = "excludesPlugin",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub excludes: Vec<String>,
    #[serde(rename = "asrArbitraryCapture", skip_serializing_if = "is_false")]
    pub asr_arbitrary_capture: bool,
    /// Collaborator subsystems that must be present and active.
    #[serde(
        rename = "activeManager",
        alias = "requiresCapability",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub capabilities: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Conditions {
    /// Fold a top-level `aliceMinVersion` into the condition set.
    pub fn with_min_host_version(mut self, version: Option<Version>) -> Self {
        if self.min_host_version.is_none() {
            self.min_host_version = version;
        }
        self
    }
}

// ── Intents ──────────────────────────────────────────────────────────────────

/// Minimum authorization level needed to trigger an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    Admin,
    Default,
    Kid,
    Worker,
    Guest,
}

/// An intent a skill declares it can handle.
///
/// Deserializes from either a bare string or `{"name": .., "authLevel": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IntentRepr")]
pub struct IntentSpec {
    pub name: String,
    #[serde(rename = "authLevel", skip_serializing_if = "Option::is_none")]
    pub auth_level: Option<AuthLevel>,
}

impl IntentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_level: None,
        }
    }

    pub fn with_auth_level(mut self, level: AuthLevel) -> Self {
        self.auth_level = Some(level);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntentRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default, rename = "authLevel")]
        auth_level: Option<AuthLevel>,
    },
}

impl From<IntentRepr> for IntentSpec {
    fn from(repr: IntentRepr) -> Self {
        match repr {
            IntentRepr::Name(name) => Self::new(name),
            IntentRepr::Full { name, auth_level } => Self { name, auth_level },
        }
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

/// Bundle descriptor: the `<Name>.install` file shipped inside each skill directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDescriptor {
    pub name: String,
    pub author: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "String::is_empty", alias = "desc")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alice_min_version: Option<Version>,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub intents: Vec<IntentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pip_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Factory key; defaults to the skill name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Directory the descriptor was read from.
    #[serde(skip)]
    pub path: PathBuf,
}

impl SkillDescriptor {
    /// `<dir>/<name>.install`
    pub fn file_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.install"))
    }

    /// Read the descriptor of the bundle in `dir`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(Self::file_path(dir, name))?;
        let mut descriptor: Self = serde_json::from_str(&raw)?;
        descriptor.path = dir.to_path_buf();
        Ok(descriptor)
    }

    pub fn effective_conditions(&self) -> Conditions {
        self.conditions
            .clone()
            .with_min_host_version(self.alice_min_version)
    }

    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().unwrap_or(&self.name)
    }

    pub fn intent_names(&self) -> Vec<String> {
        self.intents.iter().map(|i| i.name.clone()).collect()
    }
}

// ── Lifecycle state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SkillState {
    Active,
    Inactive,
    Failed { reason: String },
}

impl SkillState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for SkillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Read-only view of a registry entry, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub author: String,
    pub version: Version,
    #[serde(flatten)]
    pub state: SkillState,
    pub required: bool,
    pub update_available: bool,
    pub intents: Vec<String>,
}

// ── Dispatch order ───────────────────────────────────────────────────────────

/// Who triggered an iteration over the skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// Direct user interaction: the customization skill goes first.
    User,
    /// System broadcast: the customization skill goes last.
    System,
}

/// Sort names alphabetically, then move `customization` to the front or back.
pub fn dispatch_order(
    mut names: Vec<String>,
    customization: Option<&str>,
    origin: DispatchOrigin,
) -> Vec<String> {
    names.sort();
    let Some(custom) = customization else {
        return names;
    };
    let Some(pos) = names.iter().position(|n| n == custom) else {
        return names;
    };
    let entry = names.remove(pos);
    match origin {
        DispatchOrigin::User => names.insert(0, entry),
        DispatchOrigin::System => names.push(entry),
    }
    names
}
