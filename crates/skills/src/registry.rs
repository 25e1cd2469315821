//! In-memory source of truth for every known skill and its lifecycle state.
//!
//! Mutating operations are serialized through one async mutex; the entry map
//! and the intent router sit behind a read-write lock that is only held for
//! short state updates, never across a skill's own hooks.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

#[cfg(feature = "metrics")]
use alder_metrics::{counter, gauge, labels, skills as skills_metrics};
use {
    alder_config::SkillsConfig,
    tokio::sync::{Mutex, RwLock},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    conditions::{ConditionEvaluator, ConditionOutcome, SiblingInfo, Snapshot},
    config_store::{SkillRecord, SkillsConfigStore},
    error::{Error, Result},
    host::{IntentTransport, NluRegenerator},
    intents::IntentRouter,
    skill::{Skill, SkillEvent, SkillFactories, deliver},
    types::{
        Conditions, DispatchOrigin, SkillDescriptor, SkillInfo, SkillState, dispatch_order,
    },
    version::Version,
};

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub skills_dir: PathBuf,
    pub required: Vec<String>,
    pub customization: Option<String>,
    pub hook_timeout: Duration,
}

impl RegistryOptions {
    pub fn from_config(config: &SkillsConfig) -> Self {
        Self {
            skills_dir: config.skills_dir(),
            required: config.required.clone(),
            customization: config.customization.clone(),
            hook_timeout: Duration::from_secs(config.hook_timeout_secs.max(1)),
        }
    }

    fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

struct SkillEntry {
    descriptor: SkillDescriptor,
    state: SkillState,
    required: bool,
    update_available: bool,
    instance: Option<Arc<dyn Skill>>,
    /// The start hook completed and intents are subscribed.
    started: bool,
}

impl SkillEntry {
    fn info(&self) -> SkillInfo {
        let intents = match &self.instance {
            Some(instance) => instance
                .supported_intents()
                .into_iter()
                .map(|i| i.name)
                .collect(),
            None => self.descriptor.intent_names(),
        };
        SkillInfo {
            name: self.descriptor.name.clone(),
            author: self.descriptor.author.clone(),
            version: self.descriptor.version,
            state: self.state.clone(),
            required: self.required,
            update_available: self.update_available,
            intents,
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        #[cfg(feature = "metrics")]
        counter!(skills_metrics::FAILED_TOTAL, labels::SKILL => self.descriptor.name.clone())
            .increment(1);
        self.state = SkillState::Failed { reason };
        self.started = false;
    }
}

struct Inner {
    entries: BTreeMap<String, SkillEntry>,
    router: IntentRouter,
}

enum StartOutcome {
    Started,
    Skipped,
    Delayed(Duration),
    Failed(String),
}

pub struct SkillRegistry {
    options: RegistryOptions,
    evaluator: ConditionEvaluator,
    factories: SkillFactories,
    config: SkillsConfigStore,
    nlu: Arc<dyn NluRegenerator>,
    ops: Mutex<()>,
    inner: RwLock<Inner>,
    shutdown: CancellationToken,
}

impl SkillRegistry {
    pub fn new(
        options: RegistryOptions,
        evaluator: ConditionEvaluator,
        factories: SkillFactories,
        transport: Arc<dyn IntentTransport>,
        config: SkillsConfigStore,
        nlu: Arc<dyn NluRegenerator>,
    ) -> Self {
        Self {
            options,
            evaluator,
            factories,
            config,
            nlu,
            ops: Mutex::new(()),
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                router: IntentRouter::new(transport),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn config_store(&self) -> &SkillsConfigStore {
        &self.config
    }

    pub fn bundle_dir(&self, name: &str) -> PathBuf {
        self.options.skills_dir.join(name)
    }

    // ── Bootstrap & start ────────────────────────────────────────────────────

    /// Load every skill listed in the persisted configuration.
    ///
    /// Per-skill failures are recorded as [`SkillState::Failed`]. A required
    /// skill that is disabled, missing or fails to load is fatal.
    pub async fn bootstrap(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        let records = self.config.load().await?;

        for required in &self.options.required {
            let loaded = self.is_loaded(required).await;
            let reason = match records.get(required) {
                Some(record) if !record.active => "disabled in configuration",
                None if !loaded => "not installed",
                _ => continue,
            };
            error!(skill = %required, reason, "required skill unavailable");
            return Err(Error::RequiredSkillUnavailable {
                skill: required.clone(),
                reason: reason.into(),
            });
        }

        let mut snapshot: Snapshot = records
            .iter()
            .map(|(name, record)| {
                (name.clone(), SiblingInfo {
                    author: record.author.clone(),
                    active: record.active,
                })
            })
            .collect();
        snapshot.extend(self.snapshot().await);

        for (name, record) in &records {
            if self.is_loaded(name).await {
                debug!(skill = %name, "already loaded, skipping bootstrap");
                continue;
            }
            let entry = self.load_entry(name, record, &snapshot).await;
            if let SkillState::Failed { reason } = &entry.state {
                warn!(skill = %name, %reason, "skill failed to load");
                if entry.required {
                    return Err(Error::RequiredSkillUnavailable {
                        skill: name.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            self.insert_entry(entry).await;
        }

        let inner = self.inner.read().await;
        let active = inner
            .entries
            .values()
            .filter(|e| e.state.is_active())
            .count();
        info!(
            loaded = inner.entries.len(),
            active, "skill registry bootstrapped"
        );
        Ok(())
    }

    /// Start every active skill that is not running yet and return the
    /// aggregate of supported intents.
    pub async fn start_all(self: &Arc<Self>) -> Result<BTreeSet<String>> {
        let _ops = self.ops.lock().await;

        let pending: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .entries
                .values()
                .filter(|e| e.state.is_active() && !e.started)
                .map(|e| e.descriptor.name.clone())
                .collect()
        };

        for name in self.ordered(pending, DispatchOrigin::System) {
            self.start_and_schedule(&name).await;
        }

        let inner = self.inner.read().await;
        if let Some(failed) = inner
            .entries
            .values()
            .find(|e| e.required && matches!(e.state, SkillState::Failed { .. }))
        {
            let reason = match &failed.state {
                SkillState::Failed { reason } => reason.clone(),
                _ => String::new(),
            };
            return Err(Error::RequiredSkillUnavailable {
                skill: failed.descriptor.name.clone(),
                reason,
            });
        }

        let supported = inner.router.supported_intents();
        #[cfg(feature = "metrics")]
        gauge!(skills_metrics::ACTIVE).set(
            inner.entries.values().filter(|e| e.started).count() as f64,
        );
        info!("All skills started. {} intents supported", supported.len());
        Ok(supported)
    }

    /// Run every started skill's stop hook and cancel pending delayed starts.
    pub async fn stop_all(&self) {
        let _ops = self.ops.lock().await;
        self.shutdown.cancel();

        let running: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .entries
                .values()
                .filter(|e| e.started)
                .map(|e| e.descriptor.name.clone())
                .collect()
        };
        for name in self.ordered(running, DispatchOrigin::System) {
            match self.stop_running(&name).await {
                Ok(()) => info!(skill = %name, "stopped skill"),
                Err(e) => warn!(skill = %name, error = %e, "error stopping skill"),
            }
        }
    }

    // ── State transitions ────────────────────────────────────────────────────

    /// `Inactive`/`Failed` → `Active`: re-check conditions, start, subscribe intents.
    /// The persisted flag is only written once the skill is up.
    pub async fn activate(self: &Arc<Self>, name: &str, persist: bool) -> Result<()> {
        let _ops = self.ops.lock().await;
        let (already_running, descriptor, has_instance) = {
            let inner = self.inner.read().await;
            let entry = inner
                .entries
                .get(name)
                .ok_or_else(|| Error::skill_not_found(name))?;
            (
                entry.state.is_active() && entry.started,
                entry.descriptor.clone(),
                entry.instance.is_some(),
            )
        };

        if !already_running {
            self.bring_up(name, &descriptor, has_instance).await?;
            self.after_skill_change().await;
        }
        if persist {
            self.config.set_active(name, true).await?;
        }
        Ok(())
    }

    async fn bring_up(
        self: &Arc<Self>,
        name: &str,
        descriptor: &SkillDescriptor,
        has_instance: bool,
    ) -> Result<()> {
        let snapshot = self.snapshot().await;
        if let ConditionOutcome::Pending { missing } = self
            .evaluator
            .evaluate(name, &descriptor.effective_conditions(), &snapshot)
            .await?
        {
            return Err(Error::condition_not_met(name, "skill", missing.join(", ")));
        }

        let instance = if has_instance {
            None
        } else {
            Some(self.factories.instantiate(descriptor)?)
        };
        {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            if let Some(entry) = inner.entries.get_mut(name) {
                if let Some(instance) = instance {
                    inner
                        .router
                        .register(name, instance.supported_intents());
                    entry.instance = Some(instance);
                }
                entry.state = SkillState::Active;
            }
        }

        match self.try_start(name).await {
            StartOutcome::Failed(reason) => Err(Error::start_failed(name, reason)),
            StartOutcome::Delayed(delay) => {
                self.schedule_start(name.to_string(), delay);
                Ok(())
            },
            StartOutcome::Started | StartOutcome::Skipped => {
                info!(skill = name, "skill activated");
                Ok(())
            },
        }
    }

    /// `Active` → `Inactive`: stop if running, unsubscribe unused intents.
    pub async fn deactivate(&self, name: &str, persist: bool) -> Result<()> {
        let _ops = self.ops.lock().await;
        let state = {
            let inner = self.inner.read().await;
            let entry = inner
                .entries
                .get(name)
                .ok_or_else(|| Error::skill_not_found(name))?;
            if entry.required {
                return Err(Error::RequiredSkill {
                    skill: name.to_string(),
                });
            }
            entry.state.clone()
        };

        if state.is_active()
            && let Err(e) = self.stop_running(name).await
        {
            if self.inner.read().await.router.is_enabled(name) {
                error!(skill = name, error = %e, "intent unsubscription failed, skill stays active");
                return Err(e);
            }
            warn!(skill = name, error = %e, "stop hook failed during deactivation");
        }
        if state != SkillState::Inactive {
            {
                let mut inner = self.inner.write().await;
                if let Some(entry) = inner.entries.get_mut(name) {
                    entry.state = SkillState::Inactive;
                }
            }
            info!(skill = name, previous = %state, "skill deactivated");
            self.after_skill_change().await;
        }

        if persist {
            self.config.set_active(name, false).await?;
        }
        Ok(())
    }

    /// Deactivate, forget and delete a non-required skill.
    pub async fn remove_skill(&self, name: &str) -> Result<()> {
        let _ops = self.ops.lock().await;
        {
            let inner = self.inner.read().await;
            let entry = inner
                .entries
                .get(name)
                .ok_or_else(|| Error::skill_not_found(name))?;
            if entry.required {
                return Err(Error::RequiredSkill {
                    skill: name.to_string(),
                });
            }
        }

        if let Err(e) = self.stop_running(name).await {
            warn!(skill = name, error = %e, "stop hook failed during removal");
        }
        {
            let mut inner = self.inner.write().await;
            inner.router.forget(name).await?;
            inner.entries.remove(name);
        }
        self.config.remove(name).await?;

        let dir = self.bundle_dir(name);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        info!(skill = name, "skill removed");
        self.after_skill_change().await;
        Ok(())
    }

    /// Stop and forget every skill, delete all bundles and clear the
    /// persisted configuration.
    pub async fn wipe(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        let names = self.names().await;
        for name in self.ordered(names.clone(), DispatchOrigin::System) {
            if let Err(e) = self.stop_running(&name).await {
                warn!(skill = %name, error = %e, "stop hook failed during wipe");
            }
        }
        {
            let mut inner = self.inner.write().await;
            for name in &names {
                inner.router.forget(name).await?;
            }
            inner.entries.clear();
        }
        self.config.clear().await?;

        let dir = &self.options.skills_dir;
        if tokio::fs::try_exists(dir).await? {
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await?;
        warn!(count = names.len(), "all skills wiped");
        self.after_skill_change().await;
        Ok(())
    }

    /// Load a freshly installed skill, or reload it if it is already known.
    pub async fn load_skill(self: &Arc<Self>, name: &str) -> Result<SkillState> {
        let _ops = self.ops.lock().await;
        self.reload_locked(name).await
    }

    /// Stop, re-read the bundle, re-check conditions, start again.
    pub async fn reload_skill(self: &Arc<Self>, name: &str) -> Result<SkillState> {
        let _ops = self.ops.lock().await;
        if !self.is_loaded(name).await {
            return Err(Error::skill_not_found(name));
        }
        let state = self.reload_locked(name).await?;
        self.after_skill_change().await;
        Ok(state)
    }

    async fn reload_locked(self: &Arc<Self>, name: &str) -> Result<SkillState> {
        if let Err(e) = self.stop_running(name).await {
            warn!(skill = name, error = %e, "stop hook failed before reload");
        }
        {
            let mut inner = self.inner.write().await;
            inner.router.forget(name).await?;
        }

        let record = self
            .config
            .get(name)
            .await?
            .ok_or_else(|| Error::skill_not_found(name))?;
        let snapshot = self.snapshot().await;
        let mut entry = self.load_entry(name, &record, &snapshot).await;
        entry.update_available = {
            let inner = self.inner.read().await;
            inner.entries.get(name).is_some_and(|previous| {
                previous.update_available && previous.descriptor.version == entry.descriptor.version
            })
        };
        self.insert_entry(entry).await;

        match self.try_start(name).await {
            StartOutcome::Delayed(delay) => self.schedule_start(name.to_string(), delay),
            StartOutcome::Failed(reason) => warn!(skill = name, %reason, "skill failed to start"),
            StartOutcome::Started | StartOutcome::Skipped => {},
        }

        let state = self.state_of(name).await.unwrap_or(SkillState::Inactive);
        info!(skill = name, %state, "skill loaded");
        Ok(state)
    }

    /// Stop a running skill ahead of an update, keeping it `Active`.
    pub async fn stop_skill(&self, name: &str) -> Result<()> {
        let _ops = self.ops.lock().await;
        self.stop_running(name).await
    }

    /// Start an `Active` skill that is not running (e.g. after a failed update).
    pub async fn start_skill(self: &Arc<Self>, name: &str) -> Result<()> {
        let _ops = self.ops.lock().await;
        match self.try_start(name).await {
            StartOutcome::Failed(reason) => Err(Error::start_failed(name, reason)),
            StartOutcome::Delayed(delay) => {
                self.schedule_start(name.to_string(), delay);
                Ok(())
            },
            StartOutcome::Started | StartOutcome::Skipped => Ok(()),
        }
    }

    /// Evaluate `conditions` for `name` against the current registry.
    pub async fn check_conditions(
        &self,
        name: &str,
        conditions: &Conditions,
    ) -> Result<ConditionOutcome> {
        let snapshot = self.snapshot().await;
        self.evaluator.evaluate(name, conditions, &snapshot).await
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Deliver `event` to every running skill not named in `excluding`.
    /// Handler errors are logged and do not stop delivery to the others.
    pub async fn broadcast(&self, event: &SkillEvent, excluding: &[&str], origin: DispatchOrigin) {
        let targets: Vec<(String, Arc<dyn Skill>)> = {
            let inner = self.inner.read().await;
            let names = inner
                .entries
                .values()
                .filter(|e| e.started && !excluding.contains(&e.descriptor.name.as_str()))
                .map(|e| e.descriptor.name.clone())
                .collect();
            self.ordered(names, origin)
                .into_iter()
                .filter_map(|name| {
                    let instance = inner.entries.get(&name)?.instance.clone()?;
                    Some((name, instance))
                })
                .collect()
        };

        for (name, instance) in targets {
            match tokio::time::timeout(self.options.hook_timeout, deliver(instance.as_ref(), event))
                .await
            {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(skill = %name, %event, error = %e, "event handler failed"),
                Err(_) => warn!(skill = %name, %event, "event handler timed out"),
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn get(&self, name: &str) -> Option<SkillInfo> {
        self.inner.read().await.entries.get(name).map(SkillEntry::info)
    }

    pub async fn list(&self) -> Vec<SkillInfo> {
        self.inner
            .read()
            .await
            .entries
            .values()
            .map(SkillEntry::info)
            .collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.entries.keys().cloned().collect()
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.inner.read().await.entries.contains_key(name)
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .is_some_and(|e| e.state.is_active())
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .is_some_and(|e| e.started)
    }

    pub async fn state_of(&self, name: &str) -> Option<SkillState> {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .map(|e| e.state.clone())
    }

    pub async fn installed_version(&self, name: &str) -> Option<Version> {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .map(|e| e.descriptor.version)
    }

    pub async fn set_update_available(&self, name: &str, available: bool) -> bool {
        let mut inner = self.inner.write().await;
        match inner.entries.get_mut(name) {
            Some(entry) => {
                entry.update_available = available;
                true
            },
            None => false,
        }
    }

    /// Name, author and activity of every known skill.
    pub async fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .map(|(name, e)| {
                (name.clone(), SiblingInfo {
                    author: e.descriptor.author.clone(),
                    active: e.state.is_active(),
                })
            })
            .collect()
    }

    pub async fn supported_intents(&self) -> BTreeSet<String> {
        self.inner.read().await.router.supported_intents()
    }

    pub async fn is_intent_in_use(&self, intent: &str, excluding: &[&str]) -> bool {
        self.inner.read().await.router.is_intent_in_use(intent, excluding)
    }

    /// Running skills handling `intent`, in dispatch order.
    pub async fn handlers_for(&self, intent: &str, origin: DispatchOrigin) -> Vec<String> {
        self.inner.read().await.router.handlers_for(
            intent,
            self.options.customization.as_deref(),
            origin,
        )
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn after_skill_change(&self) {
        if let Err(e) = self.nlu.after_skill_change().await {
            warn!(error = %e, "NLU regeneration after skill change failed");
        }
    }

    fn ordered(&self, names: Vec<String>, origin: DispatchOrigin) -> Vec<String> {
        dispatch_order(names, self.options.customization.as_deref(), origin)
    }

    async fn insert_entry(&self, entry: SkillEntry) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let name = entry.descriptor.name.clone();
        if let Some(instance) = &entry.instance {
            inner.router.register(&name, instance.supported_intents());
        }
        inner.entries.insert(name, entry);
    }

    /// Build an entry from the bundle on disk. Never fails: problems end up
    /// in the entry's state.
    async fn load_entry(&self, name: &str, record: &SkillRecord, snapshot: &Snapshot) -> SkillEntry {
        let required = self.options.is_required(name);
        let descriptor = match SkillDescriptor::load(&self.bundle_dir(name), name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                let mut entry = self.placeholder_entry(name, record, required);
                entry.fail(format!("cannot read bundle descriptor: {e}"));
                return entry;
            },
        };

        let mut entry = SkillEntry {
            descriptor,
            state: SkillState::Inactive,
            required,
            update_available: false,
            instance: None,
            started: false,
        };
        if !record.active {
            return entry;
        }

        let conditions = entry.descriptor.effective_conditions();
        match self.evaluator.evaluate(name, &conditions, snapshot).await {
            Ok(ConditionOutcome::Satisfied) => {},
            Ok(ConditionOutcome::Pending { missing }) => {
                entry.fail(format!("awaiting required skills: {}", missing.join(", ")));
                return entry;
            },
            Err(e) => {
                entry.fail(e.to_string());
                return entry;
            },
        }

        match self.factories.instantiate(&entry.descriptor) {
            Ok(instance) => {
                entry.instance = Some(instance);
                entry.state = SkillState::Active;
            },
            Err(e) => entry.fail(e.to_string()),
        }
        entry
    }

    fn placeholder_entry(&self, name: &str, record: &SkillRecord, required: bool) -> SkillEntry {
        SkillEntry {
            descriptor: SkillDescriptor {
                name: name.to_string(),
                author: record.author.clone(),
                version: record.version,
                description: String::new(),
                alice_min_version: None,
                conditions: Conditions::default(),
                intents: Vec::new(),
                pip_requirements: Vec::new(),
                system_requirements: Vec::new(),
                script: None,
                entry_point: None,
                path: self.bundle_dir(name),
            },
            state: SkillState::Inactive,
            required,
            update_available: false,
            instance: None,
            started: false,
        }
    }

    async fn try_start(&self, name: &str) -> StartOutcome {
        let instance = {
            let inner = self.inner.read().await;
            match inner.entries.get(name) {
                Some(entry) if entry.state.is_active() && !entry.started => {
                    match &entry.instance {
                        Some(instance) => Arc::clone(instance),
                        None => return StartOutcome::Failed("skill is not instantiated".into()),
                    }
                },
                _ => return StartOutcome::Skipped,
            }
        };

        let timeout = self.options.hook_timeout;
        let result = match tokio::time::timeout(timeout, instance.on_start()).await {
            Ok(result) => result,
            Err(_) => Err(Error::start_failed(
                name,
                format!("start hook timed out after {}s", timeout.as_secs()),
            )),
        };

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(entry) = inner.entries.get_mut(name) else {
            return StartOutcome::Skipped;
        };
        match result {
            Ok(()) => match inner.router.configure_intents(name, true).await {
                Ok(_) => {
                    entry.started = true;
                    info!(skill = name, version = %entry.descriptor.version, "skill started");
                    StartOutcome::Started
                },
                Err(e) => {
                    let reason = format!("intent subscription failed: {e}");
                    if let Err(e) = inner.router.configure_intents(name, false).await {
                        warn!(skill = name, error = %e, "failed to roll back intent subscriptions");
                    }
                    entry.fail(reason.clone());
                    StartOutcome::Failed(reason)
                },
            },
            Err(Error::StartDelayed { delay, .. }) => StartOutcome::Delayed(delay),
            Err(e) => {
                let reason = match e {
                    Error::StartFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                error!(skill = name, %reason, "skill failed to start");
                entry.fail(reason.clone());
                StartOutcome::Failed(reason)
            },
        }
    }

    async fn start_and_schedule(self: &Arc<Self>, name: &str) {
        if let StartOutcome::Delayed(delay) = self.try_start(name).await {
            self.schedule_start(name.to_string(), delay);
        }
    }

    fn schedule_start(self: &Arc<Self>, name: String, delay: Duration) {
        info!(skill = %name, delay_secs = delay.as_secs_f64(), "skill start delayed");
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.delayed_start(name, delay).await });
    }

    async fn delayed_start(self: Arc<Self>, name: String, mut delay: Duration) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }
            let _ops = self.ops.lock().await;
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.try_start(&name).await {
                StartOutcome::Delayed(next) => delay = next,
                _ => return,
            }
        }
    }

    /// Run the stop hook of a running skill and unsubscribe its intents.
    /// The skill is marked not running even if the hook or the transport
    /// fails; on a transport error its intents stay enabled in the router.
    async fn stop_running(&self, name: &str) -> Result<()> {
        let instance = {
            let inner = self.inner.read().await;
            match inner.entries.get(name) {
                Some(entry) if entry.started => entry.instance.clone(),
                _ => None,
            }
        };
        let Some(instance) = instance else {
            return Ok(());
        };

        let hook = match tokio::time::timeout(self.options.hook_timeout, instance.on_stop()).await {
            Ok(result) => result,
            Err(_) => Err(Error::message(format!(
                "stop hook of '{name}' timed out after {}s",
                self.options.hook_timeout.as_secs()
            ))),
        };

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(entry) = inner.entries.get_mut(name) {
            entry.started = false;
        }
        inner.router.configure_intents(name, false).await?;
        hook
    }
}
