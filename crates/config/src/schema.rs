//! Config schema: host identity, skill lifecycle settings, and GitHub credentials.

use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlderConfig {
    pub host: HostConfig,
    pub skills: SkillsConfig,
    pub github: GithubConfig,
}

/// Properties of the running assistant that skill conditions are checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host version compared against a skill's `aliceMinVersion`.
    pub version: String,
    /// Active assistant language (ISO 639-1).
    pub language: String,
    /// Never touch the network: no update checks, no installs.
    pub stay_completely_offline: bool,
    /// Accept locally present bundles when the remote repository is missing.
    pub dev_mode: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").into(),
            language: "en".into(),
            stay_completely_offline: false,
            dev_mode: false,
        }
    }
}

/// Skill lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Root directory holding one sub-directory per installed skill.
    /// Defaults to `<data_dir>/skills`.
    pub dir: Option<PathBuf>,
    /// Queue directory for `.install` tickets. Defaults to `<data_dir>/install-tickets`.
    pub tickets_dir: Option<PathBuf>,
    /// Persisted per-skill configuration. Defaults to `<data_dir>/skills-config.json`.
    pub config_path: Option<PathBuf>,
    /// Where bundles are fetched and provisioned before being moved into place.
    pub staging_dir: Option<PathBuf>,
    /// Core skills the host cannot run without.
    pub required: Vec<String>,
    /// Skill that handles user interactions first and system broadcasts last.
    pub customization: Option<String>,
    /// Skills queued when the persisted configuration is empty.
    pub defaults: Vec<String>,
    /// Queue updates automatically instead of only flagging them.
    pub auto_update: bool,
    /// Branch or tag skills are fetched from.
    pub update_channel: String,
    /// GitHub owner of the `skill_<Name>` repositories.
    pub catalog_owner: String,
    pub install_interval_secs: u64,
    pub hook_timeout_secs: u64,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            tickets_dir: None,
            config_path: None,
            staging_dir: None,
            required: vec![
                "HubCore".into(),
                "ContextSensitive".into(),
                "RedQueen".into(),
            ],
            customization: Some("Customization".into()),
            defaults: vec![
                "HubCore".into(),
                "ContextSensitive".into(),
                "RedQueen".into(),
                "Telemetry".into(),
                "DateDayTimeYear".into(),
            ],
            auto_update: true,
            update_channel: "master".into(),
            catalog_owner: "alder-skills".into(),
            install_interval_secs: 10,
            hook_timeout_secs: 30,
        }
    }
}

impl SkillsConfig {
    pub fn skills_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("skills"))
    }

    pub fn tickets_dir(&self) -> PathBuf {
        self.tickets_dir
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("install-tickets"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("skills-config.json"))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("skills-staging"))
    }
}

/// Credentials used when fetching skill bundles from GitHub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub username: Option<String>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
}

impl GithubConfig {
    /// Basic-auth pair, only when both halves are configured.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.token) {
            (Some(user), Some(token)) if !user.is_empty() => {
                Some((user.as_str(), token.expose_secret().as_str()))
            },
            _ => None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: AlderConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.host.language, "en");
        assert_eq!(cfg.skills.install_interval_secs, 10);
        assert!(cfg.skills.required.contains(&"HubCore".to_string()));
        assert_eq!(cfg.skills.customization.as_deref(), Some("Customization"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: AlderConfig = toml::from_str(
            r#"
            [host]
            language = "fr"

            [skills]
            auto_update = false
            required = ["Core"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.host.language, "fr");
        assert!(!cfg.host.stay_completely_offline);
        assert!(!cfg.skills.auto_update);
        assert_eq!(cfg.skills.required, vec!["Core".to_string()]);
        assert_eq!(cfg.skills.update_channel, "master");
    }

    #[test]
    fn basic_auth_requires_both_halves() {
        let mut gh = GithubConfig {
            username: Some("bot".into()),
            token: None,
        };
        assert!(gh.basic_auth().is_none());
        gh.token = Some(Secret::new("tok".into()));
        assert_eq!(gh.basic_auth(), Some(("bot", "tok")));
    }

    #[test]
    fn token_serializes_when_present() {
        let cfg = GithubConfig {
            username: None,
            token: Some(Secret::new("tok".into())),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"token\":\"tok\""));
    }
}
