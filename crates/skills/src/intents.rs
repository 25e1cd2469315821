//! Intent routing: which active skills handle which intent, and which
//! intents are subscribed at the transport.
//!
//! An intent stays subscribed while at least one active skill declares it.
//! Subscribe and unsubscribe calls are only issued when that aggregate flips.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::debug;

use crate::{
    error::Result,
    host::IntentTransport,
    types::{AuthLevel, DispatchOrigin, IntentSpec, dispatch_order},
};

pub struct IntentRouter {
    transport: Arc<dyn IntentTransport>,
    declared: BTreeMap<String, Vec<IntentSpec>>,
    active: BTreeSet<String>,
    subscribed: BTreeSet<String>,
}

impl IntentRouter {
    pub fn new(transport: Arc<dyn IntentTransport>) -> Self {
        Self {
            transport,
            declared: BTreeMap::new(),
            active: BTreeSet::new(),
            subscribed: BTreeSet::new(),
        }
    }

    /// Record the intents `skill` declares. Subscriptions are untouched until
    /// [`configure_intents`](Self::configure_intents) is called.
    pub fn register(&mut self, skill: &str, intents: Vec<IntentSpec>) {
        self.declared.insert(skill.to_string(), intents);
    }

    pub fn is_registered(&self, skill: &str) -> bool {
        self.declared.contains_key(skill)
    }

    pub fn is_enabled(&self, skill: &str) -> bool {
        self.active.contains(skill)
    }

    /// True if an active skill not listed in `excluding` declares `intent`.
    pub fn is_intent_in_use(&self, intent: &str, excluding: &[&str]) -> bool {
        self.active
            .iter()
            .filter(|skill| !excluding.contains(&skill.as_str()))
            .filter_map(|skill| self.declared.get(skill))
            .any(|intents| intents.iter().any(|i| i.name == intent))
    }

    /// Enable or disable `skill`'s intents, returning the intents whose
    /// transport subscription changed. A no-op if the skill is already in
    /// the requested state.
    ///
    /// If the transport rejects an unsubscribe, the skill stays enabled so
    /// the router keeps matching the transport and a later call retries.
    /// Enabling an enabled skill subscribes any of its intents still missing.
    pub async fn configure_intents(&mut self, skill: &str, enable: bool) -> Result<Vec<String>> {
        if !enable && !self.active.contains(skill) {
            return Ok(Vec::new());
        }

        let intents: Vec<String> = self
            .declared
            .get(skill)
            .map(|specs| specs.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default();

        let mut changed = Vec::new();
        if enable {
            self.active.insert(skill.to_string());
            for intent in intents {
                if self.subscribed.contains(&intent) {
                    continue;
                }
                self.transport.subscribe(&intent).await?;
                self.subscribed.insert(intent.clone());
                changed.push(intent);
            }
        } else {
            self.active.remove(skill);
            for intent in intents {
                if !self.subscribed.contains(&intent) || self.is_intent_in_use(&intent, &[]) {
                    continue;
                }
                if let Err(e) = self.transport.unsubscribe(&intent).await {
                    self.active.insert(skill.to_string());
                    return Err(e);
                }
                self.subscribed.remove(&intent);
                changed.push(intent);
            }
        }

        if !changed.is_empty() {
            debug!(skill, enable, intents = ?changed, "intent subscriptions changed");
        }
        Ok(changed)
    }

    /// Disable `skill` and drop its declarations.
    pub async fn forget(&mut self, skill: &str) -> Result<()> {
        self.configure_intents(skill, false).await?;
        self.declared.remove(skill);
        Ok(())
    }

    /// Intents currently subscribed at the transport.
    pub fn supported_intents(&self) -> BTreeSet<String> {
        self.subscribed.clone()
    }

    pub fn is_subscribed(&self, intent: &str) -> bool {
        self.subscribed.contains(intent)
    }

    /// Active skills handling `intent`, in dispatch order.
    pub fn handlers_for(
        &self,
        intent: &str,
        customization: Option<&str>,
        origin: DispatchOrigin,
    ) -> Vec<String> {
        let handlers = self
            .active
            .iter()
            .filter(|skill| {
                self.declared
                    .get(*skill)
                    .is_some_and(|intents| intents.iter().any(|i| i.name == intent))
            })
            .cloned()
            .collect();
        dispatch_order(handlers, customization, origin)
    }

    /// Most restrictive authorization level any active handler declares for `intent`.
    pub fn required_auth_level(&self, intent: &str) -> Option<AuthLevel> {
        self.active
            .iter()
            .filter_map(|skill| self.declared.get(skill))
            .flatten()
            .filter(|spec| spec.name == intent)
            .filter_map(|spec| spec.auth_level)
            .min()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::error::Error,
        async_trait::async_trait,
        std::sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<String>>,
        reject_unsubscribe: AtomicBool,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IntentTransport for RecordingTransport {
        async fn subscribe(&self, intent: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("+{intent}"));
            Ok(())
        }

        async fn unsubscribe(&self, intent: &str) -> Result<()> {
            if self.reject_unsubscribe.load(Ordering::SeqCst) {
                return Err(Error::message("transport unavailable"));
            }
            self.calls.lock().unwrap().push(format!("-{intent}"));
            Ok(())
        }
    }

    fn router() -> (IntentRouter, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let mut router = IntentRouter::new(transport.clone());
        router.register("Lights", vec![IntentSpec::new("TurnOn"), IntentSpec::new("Dim")]);
        router.register("Switch", vec![IntentSpec::new("TurnOn")]);
        (router, transport)
    }

    #[tokio::test]
    async fn shared_intent_unsubscribed_exactly_once() {
        let (mut router, transport) = router();
        router.configure_intents("Lights", true).await.unwrap();
        router.configure_intents("Switch", true).await.unwrap();
        assert_eq!(transport.calls(), vec!["+TurnOn", "+Dim"]);

        router.configure_intents("Lights", false).await.unwrap();
        assert!(router.is_subscribed("TurnOn"));
        assert!(!router.is_subscribed("Dim"));

        router.configure_intents("Switch", false).await.unwrap();
        let unsubscribes: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c == "-TurnOn")
            .collect();
        assert_eq!(unsubscribes.len(), 1);
        assert!(router.supported_intents().is_empty());
    }

    #[tokio::test]
    async fn repeated_configuration_is_a_noop() {
        let (mut router, transport) = router();
        router.configure_intents("Lights", true).await.unwrap();
        let changed = router.configure_intents("Lights", true).await.unwrap();
        assert!(changed.is_empty());
        router.configure_intents("Lights", false).await.unwrap();
        let changed = router.configure_intents("Lights", false).await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(transport.calls(), vec!["+TurnOn", "+Dim", "-TurnOn", "-Dim"]);
    }

    #[tokio::test]
    async fn rejected_unsubscribe_keeps_skill_enabled_and_retries() {
        let (mut router, transport) = router();
        router.configure_intents("Lights", true).await.unwrap();

        transport.reject_unsubscribe.store(true, Ordering::SeqCst);
        assert!(router.configure_intents("Lights", false).await.is_err());
        assert!(router.is_enabled("Lights"));
        assert!(router.is_intent_in_use("TurnOn", &[]));
        assert!(router.is_subscribed("TurnOn"));

        transport.reject_unsubscribe.store(false, Ordering::SeqCst);
        let changed = router.configure_intents("Lights", false).await.unwrap();
        assert_eq!(changed, vec!["TurnOn", "Dim"]);
        assert!(!router.is_enabled("Lights"));
        assert!(router.supported_intents().is_empty());
    }

    #[tokio::test]
    async fn enabling_again_subscribes_missing_intents() {
        let (mut router, transport) = router();
        router.configure_intents("Lights", true).await.unwrap();
        router.register("Lights", vec![
            IntentSpec::new("TurnOn"),
            IntentSpec::new("Dim"),
            IntentSpec::new("Blink"),
        ]);

        let changed = router.configure_intents("Lights", true).await.unwrap();
        assert_eq!(changed, vec!["Blink"]);
        assert_eq!(transport.calls(), vec!["+TurnOn", "+Dim", "+Blink"]);
    }

    #[tokio::test]
    async fn in_use_respects_exclusions() {
        let (mut router, _) = router();
        router.configure_intents("Lights", true).await.unwrap();
        router.configure_intents("Switch", true).await.unwrap();
        assert!(router.is_intent_in_use("TurnOn", &["Lights"]));
        assert!(!router.is_intent_in_use("TurnOn", &["Lights", "Switch"]));
        assert!(!router.is_intent_in_use("Dim", &["Lights"]));
    }

    #[tokio::test]
    async fn forget_drops_declarations() {
        let (mut router, _) = router();
        router.configure_intents("Lights", true).await.unwrap();
        router.forget("Lights").await.unwrap();
        assert!(!router.is_registered("Lights"));
        assert!(router.supported_intents().is_empty());
    }

    #[tokio::test]
    async fn handlers_follow_dispatch_order() {
        let (mut router, _) = router();
        router.register("Customization", vec![
            IntentSpec::new("TurnOn").with_auth_level(AuthLevel::Admin),
        ]);
        for skill in ["Switch", "Lights", "Customization"] {
            router.configure_intents(skill, true).await.unwrap();
        }
        assert_eq!(
            router.handlers_for("TurnOn", Some("Customization"), DispatchOrigin::User),
            vec!["Customization", "Lights", "Switch"]
        );
        assert_eq!(
            router.handlers_for("TurnOn", Some("Customization"), DispatchOrigin::System),
            vec!["Lights", "Switch", "Customization"]
        );
        assert_eq!(router.required_auth_level("TurnOn"), Some(AuthLevel::Admin));
        assert_eq!(router.required_auth_level("Dim"), None);
    }
}
