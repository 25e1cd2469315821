//! Live skill objects: lifecycle hooks, optional event handlers, and the
//! factory table that turns a bundle descriptor into an instance.

use std::{collections::HashMap, fmt, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    types::{IntentSpec, SkillDescriptor},
};

// ── Events ───────────────────────────────────────────────────────────────────

/// Events broadcast to active skills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SkillEvent {
    Booted,
    SkillInstalled { skill: String },
    SkillUpdated { skill: String },
    FullHour,
    Custom { name: String, payload: Value },
}

impl SkillEvent {
    /// Handler name as exposed to skill authors (`onBooted`, `onSkillInstalled`, ...).
    pub fn handler_name(&self) -> String {
        match self {
            Self::Booted => "onBooted".into(),
            Self::SkillInstalled { .. } => "onSkillInstalled".into(),
            Self::SkillUpdated { .. } => "onSkillUpdated".into(),
            Self::FullHour => "onFullHour".into(),
            Self::Custom { name, .. } if name.starts_with("on") => name.clone(),
            Self::Custom { name, .. } => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => format!("on{}{}", first.to_ascii_uppercase(), chars.as_str()),
                    None => "on".into(),
                }
            },
        }
    }
}

impl fmt::Display for SkillEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.handler_name())
    }
}

/// Optional event handlers. Every method defaults to a no-op, so a skill
/// only overrides what it cares about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_booted(&self) -> Result<()> {
        Ok(())
    }

    async fn on_skill_installed(&self, _skill: &str) -> Result<()> {
        Ok(())
    }

    async fn on_skill_updated(&self, _skill: &str) -> Result<()> {
        Ok(())
    }

    async fn on_full_hour(&self) -> Result<()> {
        Ok(())
    }

    /// Delivered after the specific handler for every event, including custom ones.
    async fn on_event(&self, _event: &SkillEvent) -> Result<()> {
        Ok(())
    }
}

/// Deliver `event` to its specific handler, then to [`EventHandler::on_event`].
pub async fn deliver(handler: &dyn EventHandler, event: &SkillEvent) -> Result<()> {
    match event {
        SkillEvent::Booted => handler.on_booted().await?,
        SkillEvent::SkillInstalled { skill } => handler.on_skill_installed(skill).await?,
        SkillEvent::SkillUpdated { skill } => handler.on_skill_updated(skill).await?,
        SkillEvent::FullHour => handler.on_full_hour().await?,
        SkillEvent::Custom { .. } => {},
    }
    handler.on_event(event).await
}

// ── Skill ────────────────────────────────────────────────────────────────────

/// A loaded skill instance.
#[async_trait]
pub trait Skill: EventHandler {
    fn name(&self) -> &str;

    /// Intents this instance handles.
    fn supported_intents(&self) -> Vec<IntentSpec>;

    /// Start hook. Return [`Error::StartDelayed`] to be started again later.
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

// ── Factories ────────────────────────────────────────────────────────────────

pub type SkillConstructor =
    Arc<dyn Fn(&SkillDescriptor) -> Result<Arc<dyn Skill>> + Send + Sync>;

/// Entry-point table resolving descriptors to constructors.
#[derive(Default, Clone)]
pub struct SkillFactories {
    constructors: HashMap<String, SkillConstructor>,
    fallback: Option<SkillConstructor>,
}

impl SkillFactories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, entry_point: impl Into<String>, constructor: F)
    where
        F: Fn(&SkillDescriptor) -> Result<Arc<dyn Skill>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(entry_point.into(), Arc::new(constructor));
    }

    /// Resolve unknown entry points to a [`DeclarativeSkill`] built from the descriptor.
    pub fn with_declarative_fallback(mut self) -> Self {
        self.fallback = Some(Arc::new(|desc: &SkillDescriptor| {
            Ok(Arc::new(DeclarativeSkill::from_descriptor(desc)) as Arc<dyn Skill>)
        }));
        self
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.constructors.contains_key(entry_point)
    }

    pub fn instantiate(&self, descriptor: &SkillDescriptor) -> Result<Arc<dyn Skill>> {
        let entry = descriptor.entry_point();
        let constructor = self
            .constructors
            .get(entry)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                Error::start_failed(
                    &descriptor.name,
                    format!("no factory registered for entry point '{entry}'"),
                )
            })?;
        debug!(skill = %descriptor.name, entry_point = entry, "instantiating skill");
        constructor(descriptor)
    }
}

/// A skill with no behaviour beyond the intents its descriptor declares.
pub struct DeclarativeSkill {
    name: String,
    intents: Vec<IntentSpec>,
}

impl DeclarativeSkill {
    pub fn from_descriptor(descriptor: &SkillDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            intents: descriptor.intents.clone(),
        }
    }
}

impl EventHandler for DeclarativeSkill {}

#[async_trait]
impl Skill for DeclarativeSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_intents(&self) -> Vec<IntentSpec> {
        self.intents.clone()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::version::Version,
        std::sync::Mutex,
    };

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn on_skill_installed(&self, skill: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("installed:{skill}"));
            Ok(())
        }

        async fn on_event(&self, event: &SkillEvent) -> Result<()> {
            self.calls.lock().unwrap().push(format!("event:{event}"));
            Ok(())
        }
    }

    fn descriptor(name: &str) -> SkillDescriptor {
        SkillDescriptor {
            name: name.into(),
            author: "tester".into(),
            version: Version::new(1, 0, 0),
            description: String::new(),
            alice_min_version: None,
            conditions: Default::default(),
            intents: vec![IntentSpec::new("TurnOn")],
            pip_requirements: vec![],
            system_requirements: vec![],
            script: None,
            entry_point: None,
            path: Default::default(),
        }
    }

    #[tokio::test]
    async fn specific_handler_runs_before_generic() {
        let rec = Recorder::default();
        deliver(&rec, &SkillEvent::SkillInstalled {
            skill: "Lights".into(),
        })
        .await
        .unwrap();
        deliver(&rec, &SkillEvent::FullHour).await.unwrap();

        let calls = rec.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![
            "installed:Lights",
            "event:onSkillInstalled",
            "event:onFullHour"
        ]);
    }

    #[test]
    fn custom_event_names_are_prefixed() {
        let ev = SkillEvent::Custom {
            name: "wakeword".into(),
            payload: Value::Null,
        };
        assert_eq!(ev.handler_name(), "onWakeword");
        let ev = SkillEvent::Custom {
            name: "onSleep".into(),
            payload: Value::Null,
        };
        assert_eq!(ev.handler_name(), "onSleep");
    }

    #[test]
    fn unknown_entry_point_without_fallback_fails() {
        let factories = SkillFactories::new();
        let err = factories.instantiate(&descriptor("Lights")).err().unwrap();
        assert!(matches!(err, Error::StartFailed { .. }));
    }

    #[test]
    fn registered_constructor_wins_over_fallback() {
        let mut factories = SkillFactories::new().with_declarative_fallback();
        factories.register("Lights", |desc: &SkillDescriptor| {
            let mut skill = DeclarativeSkill::from_descriptor(desc);
            skill.intents.push(IntentSpec::new("Dim"));
            Ok(Arc::new(skill) as Arc<dyn Skill>)
        });
        let lights = factories.instantiate(&descriptor("Lights")).unwrap();
        assert_eq!(lights.supported_intents().len(), 2);

        let other = factories.instantiate(&descriptor("Weather")).unwrap();
        assert_eq!(other.name(), "Weather");
        assert_eq!(other.supported_intents(), vec![IntentSpec::new("TurnOn")]);
    }
}
