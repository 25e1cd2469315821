//! Lifecycle notifications for collaborators outside the skill set
//! (admin UI, NLU regeneration).

use {
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::{debug, info},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LifecycleEvent {
    Started,
    Booted,
    Stopped,
    SkillInstalled { skill: String },
    SkillUpdated { skill: String },
    SkillInstallFailed { skill: String, reason: String },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Booted => "booted",
            Self::Stopped => "stopped",
            Self::SkillInstalled { .. } => "skillInstalled",
            Self::SkillUpdated { .. } => "skillUpdated",
            Self::SkillInstallFailed { .. } => "skillInstallFailed",
        }
    }

    pub fn skill(&self) -> Option<&str> {
        match self {
            Self::SkillInstalled { skill }
            | Self::SkillUpdated { skill }
            | Self::SkillInstallFailed { skill, .. } => Some(skill),
            _ => None,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Writes every event to the log and nowhere else.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn publish(&self, event: LifecycleEvent) {
        info!(event = event.name(), skill = event.skill(), "lifecycle event");
    }
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: LifecycleEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "no lifecycle event subscribers");
        }
    }
}
