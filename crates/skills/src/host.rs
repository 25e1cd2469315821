//! Boundaries to the host subsystems the lifecycle core talks to but does not own.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
};

use {async_trait::async_trait, tracing::debug};

use crate::error::Result;

/// Message-transport layer that delivers voice commands to skills.
#[async_trait]
pub trait IntentTransport: Send + Sync {
    async fn subscribe(&self, intent: &str) -> Result<()>;
    async fn unsubscribe(&self, intent: &str) -> Result<()>;
}

/// Presence and activity of other host subsystems ("managers").
pub trait Capabilities: Send + Sync {
    fn is_active(&self, capability: &str) -> bool;

    /// Whether the speech recognizer can capture free-form utterances.
    fn asr_arbitrary_capture(&self) -> bool {
        false
    }
}

/// NLU training and dialog-template pipeline.
#[async_trait]
pub trait NluRegenerator: Send + Sync {
    /// Load a skill's dialog templates, talk strings and widgets.
    async fn load_resources(&self, _skill: &str) -> Result<()> {
        Ok(())
    }

    /// Retrain after the installed skill set changed.
    async fn after_skill_change(&self) -> Result<()> {
        Ok(())
    }
}

/// Runtime status of the host process.
pub trait HostStatus: Send + Sync {
    fn is_online(&self) -> bool;

    /// A higher-priority download (e.g. NLU retraining assets) is in progress.
    fn is_busy(&self) -> bool {
        false
    }
}

// ── Defaults used by the binary and tests ────────────────────────────────────

/// Transport that only records subscriptions in the log.
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl IntentTransport for LoggingTransport {
    async fn subscribe(&self, intent: &str) -> Result<()> {
        debug!(intent, "subscribed intent");
        Ok(())
    }

    async fn unsubscribe(&self, intent: &str) -> Result<()> {
        debug!(intent, "unsubscribed intent");
        Ok(())
    }
}

/// Fixed capability set.
#[derive(Debug, Default, Clone)]
pub struct StaticCapabilities {
    pub active: HashSet<String>,
    pub asr_arbitrary_capture: bool,
}

impl StaticCapabilities {
    pub fn new<I, S>(active: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active: active.into_iter().map(Into::into).collect(),
            asr_arbitrary_capture: false,
        }
    }
}

impl Capabilities for StaticCapabilities {
    fn is_active(&self, capability: &str) -> bool {
        self.active.contains(capability)
    }

    fn asr_arbitrary_capture(&self) -> bool {
        self.asr_arbitrary_capture
    }
}

#[derive(Debug, Default)]
pub struct NoopNlu;

impl NluRegenerator for NoopNlu {}

/// Host status backed by flags that can be flipped at runtime.
#[derive(Debug)]
pub struct FlagStatus {
    online: AtomicBool,
    busy: AtomicBool,
}

impl FlagStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            busy: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl Default for FlagStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HostStatus for FlagStatus {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}
