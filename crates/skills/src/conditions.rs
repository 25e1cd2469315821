//! Condition checks run every time a skill is loaded or installed.

use std::{collections::BTreeMap, sync::Arc};

use {
    alder_config::HostConfig,
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    host::Capabilities,
    types::Conditions,
    version::Version,
};

/// Properties of the running host that conditions are checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub version: Version,
    pub language: String,
    pub offline_only: bool,
}

impl HostEnvironment {
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        Ok(Self {
            version: config.version.parse()?,
            language: config.language.clone(),
            offline_only: config.stay_completely_offline,
        })
    }
}

/// What a condition check knows about one sibling skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingInfo {
    pub author: String,
    pub active: bool,
}

/// Every known skill (active, inactive or failed), keyed by name.
pub type Snapshot = BTreeMap<String, SiblingInfo>;

/// Queues installs for missing sibling skills.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Returns `false` when a request for `skill` was already pending.
    async fn request_install(&self, skill: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Satisfied,
    /// Every other condition holds; these siblings were queued for install.
    Pending { missing: Vec<String> },
}

impl ConditionOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

pub struct ConditionEvaluator {
    host: HostEnvironment,
    capabilities: Arc<dyn Capabilities>,
    resolver: Option<Arc<dyn DependencyResolver>>,
}

impl ConditionEvaluator {
    pub fn new(host: HostEnvironment, capabilities: Arc<dyn Capabilities>) -> Self {
        Self {
            host,
            capabilities,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    /// Check `conditions` for `skill`, short-circuiting on the first hard failure.
    ///
    /// Sibling requirements are checked last: a missing sibling is queued for
    /// install and reported as [`ConditionOutcome::Pending`], while a sibling
    /// that is installed but not active fails the check.
    pub async fn evaluate(
        &self,
        skill: &str,
        conditions: &Conditions,
        snapshot: &Snapshot,
    ) -> Result<ConditionOutcome> {
        if let Some(min) = conditions.min_host_version
            && min > self.host.version
        {
            return Err(Error::condition_not_met(skill, "aliceMinVersion", min.to_string()));
        }

        if !conditions.languages.is_empty()
            && !conditions
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(&self.host.language))
        {
            return Err(Error::condition_not_met(
                skill,
                "lang",
                conditions.languages.join(", "),
            ));
        }

        match conditions.online {
            Some(true) if self.host.offline_only => {
                return Err(Error::condition_not_met(skill, "online", "true"));
            },
            Some(false) if !self.host.offline_only => {
                return Err(Error::condition_not_met(skill, "online", "false"));
            },
            _ => {},
        }

        if conditions.asr_arbitrary_capture && !self.capabilities.asr_arbitrary_capture() {
            return Err(Error::condition_not_met(skill, "asrArbitraryCapture", "true"));
        }

        for excluded in &conditions.excludes {
            let (author, name) = match excluded.split_once('/') {
                Some((author, name)) => (Some(author), name),
                None => (None, excluded.as_str()),
            };
            if let Some(sibling) = snapshot.get(name)
                && sibling.active
                && author.is_none_or(|a| a == sibling.author)
            {
                return Err(Error::condition_not_met(skill, "notSkill", excluded));
            }
        }

        for capability in &conditions.capabilities {
            if !self.capabilities.is_active(capability) {
                return Err(Error::condition_not_met(skill, "activeManager", capability));
            }
        }

        let mut missing = Vec::new();
        for required in &conditions.requires {
            match snapshot.get(required) {
                Some(sibling) if sibling.active => {},
                Some(_) => {
                    return Err(Error::condition_not_met(skill, "skill", required));
                },
                None => {
                    self.request_dependency(skill, required).await?;
                    missing.push(required.clone());
                },
            }
        }

        if missing.is_empty() {
            debug!(skill, "conditions satisfied");
            Ok(ConditionOutcome::Satisfied)
        } else {
            Ok(ConditionOutcome::Pending { missing })
        }
    }

    async fn request_dependency(&self, skill: &str, required: &str) -> Result<()> {
        let Some(resolver) = &self.resolver else {
            return Err(Error::condition_not_met(skill, "skill", required));
        };
        match resolver.request_install(required).await {
            Ok(true) => {
                info!(skill, dependency = required, "queued install of required skill");
                Ok(())
            },
            Ok(false) => {
                debug!(skill, dependency = required, "install of required skill already pending");
                Ok(())
            },
            Err(e) => {
                warn!(skill, dependency = required, error = %e, "failed to queue required skill");
                Err(Error::condition_not_met(skill, "skill", required))
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::host::StaticCapabilities,
        std::sync::Mutex,
    };

    #[derive(Default)]
    struct RecordingResolver {
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DependencyResolver for RecordingResolver {
        async fn request_install(&self, skill: &str) -> Result<bool> {
            let mut requested = self.requested.lock().unwrap();
            if requested.iter().any(|s| s == skill) {
                return Ok(false);
            }
            requested.push(skill.to_string());
            Ok(true)
        }
    }

    fn host(offline_only: bool) -> HostEnvironment {
        HostEnvironment {
            version: Version::new(1, 0, 0),
            language: "en".into(),
            offline_only,
        }
    }

    fn evaluator(offline_only: bool) -> ConditionEvaluator {
        ConditionEvaluator::new(host(offline_only), Arc::new(StaticCapabilities::new(["nlu"])))
    }

    fn sibling(author: &str, active: bool) -> SiblingInfo {
        SiblingInfo {
            author: author.into(),
            active,
        }
    }

    fn condition_name(err: Error) -> String {
        match err {
            Error::ConditionNotMet { condition, .. } => condition,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_conditions_are_satisfied() {
        let outcome = evaluator(false)
            .evaluate("Lights", &Conditions::default(), &Snapshot::new())
            .await
            .unwrap();
        assert!(outcome.is_satisfied());
    }

    #[tokio::test]
    async fn host_version_too_old() {
        let conditions = Conditions {
            min_host_version: Some("1.0.1-a1".parse().unwrap()),
            ..Default::default()
        };
        let err = evaluator(false)
            .evaluate("Lights", &conditions, &Snapshot::new())
            .await
            .unwrap_err();
        assert_eq!(condition_name(err), "aliceMinVersion");
    }

    #[tokio::test]
    async fn language_must_match() {
        let conditions = Conditions {
            languages: vec!["de".into(), "fr".into()],
            ..Default::default()
        };
        let err = evaluator(false)
            .evaluate("Lights", &conditions, &Snapshot::new())
            .await
            .unwrap_err();
        assert_eq!(condition_name(err), "lang");

        let conditions = Conditions {
            languages: vec!["EN".into()],
            ..Default::default()
        };
        assert!(
            evaluator(false)
                .evaluate("Lights", &conditions, &Snapshot::new())
                .await
                .unwrap()
                .is_satisfied()
        );
    }

    #[tokio::test]
    async fn connectivity_checked_both_ways() {
        let needs_network = Conditions {
            online: Some(true),
            ..Default::default()
        };
        let offline_only = Conditions {
            online: Some(false),
            ..Default::default()
        };
        let snap = Snapshot::new();

        assert!(evaluator(true).evaluate("A", &needs_network, &snap).await.is_err());
        assert!(evaluator(false).evaluate("A", &needs_network, &snap).await.is_ok());
        assert!(evaluator(false).evaluate("A", &offline_only, &snap).await.is_err());
        assert!(evaluator(true).evaluate("A", &offline_only, &snap).await.is_ok());
    }

    #[tokio::test]
    async fn excluded_skill_matched_by_author_and_name() {
        let conditions = Conditions {
            excludes: vec!["acme/Lamps".into()],
            ..Default::default()
        };
        let mut snap = Snapshot::new();
        snap.insert("Lamps".into(), sibling("someone-else", true));
        assert!(evaluator(false).evaluate("Lights", &conditions, &snap).await.is_ok());

        snap.insert("Lamps".into(), sibling("acme", false));
        assert!(evaluator(false).evaluate("Lights", &conditions, &snap).await.is_ok());

        snap.insert("Lamps".into(), sibling("acme", true));
        let err = evaluator(false)
            .evaluate("Lights", &conditions, &snap)
            .await
            .unwrap_err();
        assert_eq!(condition_name(err), "notSkill");
    }

    #[tokio::test]
    async fn capabilities_must_be_active() {
        let conditions = Conditions {
            capabilities: vec!["nlu".into(), "camera".into()],
            ..Default::default()
        };
        let err = evaluator(false)
            .evaluate("Lights", &conditions, &Snapshot::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConditionNotMet { ref value, .. } if value == "camera"
        ));
    }

    #[tokio::test]
    async fn asr_capture_needs_capability() {
        let conditions = Conditions {
            asr_arbitrary_capture: true,
            ..Default::default()
        };
        assert!(
            evaluator(false)
                .evaluate("Dictation", &conditions, &Snapshot::new())
                .await
                .is_err()
        );

        let caps = StaticCapabilities {
            asr_arbitrary_capture: true,
            ..Default::default()
        };
        let eval = ConditionEvaluator::new(host(false), Arc::new(caps));
        assert!(eval.evaluate("Dictation", &conditions, &Snapshot::new()).await.is_ok());
    }

    #[tokio::test]
    async fn missing_sibling_is_queued_once() {
        let resolver = Arc::new(RecordingResolver::default());
        let eval = evaluator(false).with_resolver(resolver.clone());
        let conditions = Conditions {
            requires: vec!["Switch".into()],
            ..Default::default()
        };

        for _ in 0..2 {
            let outcome = eval
                .evaluate("Lights", &conditions, &Snapshot::new())
                .await
                .unwrap();
            assert_eq!(outcome, ConditionOutcome::Pending {
                missing: vec!["Switch".into()]
            });
        }
        assert_eq!(*resolver.requested.lock().unwrap(), vec!["Switch".to_string()]);
    }

    #[tokio::test]
    async fn inactive_sibling_fails_hard() {
        let resolver = Arc::new(RecordingResolver::default());
        let eval = evaluator(false).with_resolver(resolver.clone());
        let conditions = Conditions {
            requires: vec!["Switch".into()],
            ..Default::default()
        };
        let mut snap = Snapshot::new();
        snap.insert("Switch".into(), sibling("acme", false));

        let err = eval.evaluate("Lights", &conditions, &snap).await.unwrap_err();
        assert_eq!(condition_name(err), "skill");
        assert!(resolver.requested.lock().unwrap().is_empty());

        snap.insert("Switch".into(), sibling("acme", true));
        assert!(eval.evaluate("Lights", &conditions, &snap).await.unwrap().is_satisfied());
    }

    #[tokio::test]
    async fn missing_sibling_without_resolver_fails() {
        let conditions = Conditions {
            requires: vec!["Switch".into()],
            ..Default::default()
        };
        assert!(
            evaluator(false)
                .evaluate("Lights", &conditions, &Snapshot::new())
                .await
                .is_err()
        );
    }

    #[test]
    fn host_environment_from_config() {
        let config = HostConfig {
            version: "1.2.0-rc1".into(),
            language: "de".into(),
            stay_completely_offline: true,
            dev_mode: false,
        };
        let env = HostEnvironment::from_config(&config).unwrap();
        assert!(env.version.is_prerelease());
        assert!(env.offline_only);
        assert_eq!(env.language, "de");
    }
}
