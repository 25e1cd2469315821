//! Install pipeline: the single consumer of the ticket queue.
//!
//! A batch claims every pending ticket under one busy flag, takes each
//! through condition checks, fetch and provisioning into a staging
//! directory, and only moves a bundle into place once all of that
//! succeeded. Installed skills are reloaded together after the batch.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

#[cfg(feature = "metrics")]
use alder_metrics::{counter, histogram, labels, skills as skills_metrics};
use {
    alder_config::AlderConfig,
    tokio::{
        fs,
        sync::{Mutex, Notify},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    conditions::ConditionOutcome,
    config_store::SkillRecord,
    error::{Error, Result},
    events::{EventSink, LifecycleEvent},
    fetch::SourceFetcher,
    host::{HostStatus, NluRegenerator},
    provision::{self, Provisioner},
    registry::SkillRegistry,
    skill::SkillEvent,
    ticket::{InstallTicket, QueuedTicket, TicketQueue},
    types::{DispatchOrigin, SkillDescriptor},
};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub staging_dir: PathBuf,
    pub interval: Duration,
    pub dev_mode: bool,
    pub offline_only: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &AlderConfig) -> Self {
        Self {
            staging_dir: config.skills.staging_dir(),
            interval: Duration::from_secs(config.skills.install_interval_secs.max(1)),
            dev_mode: config.host.dev_mode,
            offline_only: config.host.stay_completely_offline,
        }
    }
}

/// What happened to one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    Installed { skill: String },
    Updated { skill: String },
    /// Installed version is already the same or newer.
    UpToDate { skill: String },
    /// Left in the queue until these skills are active.
    Pending { skill: String, missing: Vec<String> },
    Failed { skill: String, reason: String },
}

/// Summary of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<TicketOutcome>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Skills installed or updated, in processing order, with the update flag.
    pub fn changed(&self) -> Vec<(String, bool)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TicketOutcome::Installed { skill } => Some((skill.clone(), false)),
                TicketOutcome::Updated { skill } => Some((skill.clone(), true)),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TicketOutcome::Failed { skill, .. } => Some(skill.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn pending(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                TicketOutcome::Pending { skill, .. } => Some(skill.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Clears the busy flag when the batch ends, including on early return.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct InstallPipeline {
    options: PipelineOptions,
    queue: TicketQueue,
    registry: Arc<SkillRegistry>,
    fetcher: Arc<dyn SourceFetcher>,
    provisioner: Arc<dyn Provisioner>,
    status: Arc<dyn HostStatus>,
    nlu: Arc<dyn NluRegenerator>,
    events: Arc<dyn EventSink>,
    busy: AtomicBool,
    wake: Notify,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InstallPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: PipelineOptions,
        queue: TicketQueue,
        registry: Arc<SkillRegistry>,
        fetcher: Arc<dyn SourceFetcher>,
        provisioner: Arc<dyn Provisioner>,
        status: Arc<dyn HostStatus>,
        nlu: Arc<dyn NluRegenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            options,
            queue,
            registry,
            fetcher,
            provisioner,
            status,
            nlu,
            events,
            busy: AtomicBool::new(false),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &TicketQueue {
        &self.queue
    }

    /// A batch is running right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    // ── Polling loop ─────────────────────────────────────────────────────────

    /// Start the polling task. Calling it twice keeps the first task.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let pipeline = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { pipeline.poll_loop().await }));
        info!(interval_secs = self.options.interval.as_secs(), "install pipeline started");
    }

    /// Run the next batch now instead of waiting for the interval.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Signal the polling task and wait for the ticket in flight to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "install pipeline task ended abnormally");
        }
        info!("install pipeline stopped");
    }

    async fn poll_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {},
                () = self.wake.notified() => debug!("install pipeline woken"),
            }
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_batch().await {
                error!(error = %e, "install batch failed");
            }
        }
    }

    // ── Batch ────────────────────────────────────────────────────────────────

    /// Process every pending ticket. Returns an empty report when there was
    /// nothing to do or the batch could not run right now.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        if self.options.offline_only || !self.status.is_online() {
            debug!("offline, install batch skipped");
            return Ok(BatchReport::default());
        }
        if self.status.is_busy() {
            debug!("higher-priority download in progress, install batch skipped");
            return Ok(BatchReport::default());
        }
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("install batch already running");
            return Ok(BatchReport::default());
        };

        let tickets = self.queue.list().await?;
        if tickets.is_empty() {
            return Ok(BatchReport::default());
        }

        #[cfg(feature = "metrics")]
        counter!(skills_metrics::INSTALL_BATCHES_TOTAL).increment(1);
        info!(count = tickets.len(), "processing install tickets");

        let mut report = BatchReport::default();
        for queued in &tickets {
            if self.cancel.is_cancelled() {
                info!("shutdown requested, leaving remaining tickets queued");
                break;
            }
            report.outcomes.push(self.process_ticket(queued).await);
        }

        self.finish_batch(&report).await;
        Ok(report)
    }

    /// Reload everything the batch installed, then notify skills and collaborators.
    async fn finish_batch(&self, report: &BatchReport) {
        let changed = report.changed();
        if changed.is_empty() {
            return;
        }

        for (skill, _) in &changed {
            if let Err(e) = self.registry.load_skill(skill).await {
                warn!(skill = %skill, error = %e, "failed to load installed skill");
                continue;
            }
            if let Err(e) = self.nlu.load_resources(skill).await {
                warn!(skill = %skill, error = %e, "failed to load skill resources");
            }
        }

        for (skill, updated) in &changed {
            let (event, lifecycle) = if *updated {
                (
                    SkillEvent::SkillUpdated {
                        skill: skill.clone(),
                    },
                    LifecycleEvent::SkillUpdated {
                        skill: skill.clone(),
                    },
                )
            } else {
                (
                    SkillEvent::SkillInstalled {
                        skill: skill.clone(),
                    },
                    LifecycleEvent::SkillInstalled {
                        skill: skill.clone(),
                    },
                )
            };
            self.registry.broadcast(&event, &[], DispatchOrigin::System).await;
            self.events.publish(lifecycle);
        }

        if let Err(e) = self.nlu.after_skill_change().await {
            warn!(error = %e, "NLU regeneration after skill change failed");
        }
        info!(count = changed.len(), "install batch done");
    }

    async fn process_ticket(&self, queued: &QueuedTicket) -> TicketOutcome {
        let ticket = match queued.read().await {
            Ok(ticket) => ticket,
            Err(e) => {
                let skill = queued.id();
                error!(ticket = %skill, error = %e, "unreadable install ticket");
                return self.fail(queued, &skill, &e, false).await;
            },
        };
        let skill = ticket.name.clone();

        match self
            .registry
            .check_conditions(&skill, &ticket.effective_conditions())
            .await
        {
            Ok(ConditionOutcome::Satisfied) => {},
            Ok(ConditionOutcome::Pending { missing }) => {
                info!(skill = %skill, missing = ?missing, "install waiting for required skills");
                return TicketOutcome::Pending { skill, missing };
            },
            Err(e) => {
                warn!(skill = %skill, error = %e, "install ticket does not meet conditions");
                return self.fail(queued, &skill, &e, false).await;
            },
        }

        let bundle_dir = self.registry.bundle_dir(&skill);
        let installed = if SkillDescriptor::file_path(&bundle_dir, &skill).is_file() {
            self.registry.installed_version(&skill).await
        } else {
            None
        };
        if let Some(installed) = installed
            && installed >= ticket.version
        {
            info!(skill = %skill, %installed, requested = %ticket.version, "already up to date");
            self.discard(queued).await;
            return TicketOutcome::UpToDate { skill };
        }

        let was_running = self.registry.is_running(&skill).await;
        if was_running && let Err(e) = self.registry.stop_skill(&skill).await {
            error!(skill = %skill, error = %e, "cannot stop skill for update");
            return self.fail(queued, &skill, &e, true).await;
        }

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        #[cfg(feature = "metrics")]
        counter!(skills_metrics::INSTALL_ATTEMPTS_TOTAL).increment(1);

        if let Err(e) = self.install_bundle(&ticket, &bundle_dir).await {
            return self.fail(queued, &skill, &e, was_running).await;
        }

        let record = SkillRecord {
            active: true,
            version: ticket.version,
            author: ticket.author.clone(),
            conditions: ticket.effective_conditions(),
        };
        if let Err(e) = self
            .registry
            .config_store()
            .upsert_keep_active(&skill, record)
            .await
        {
            return self.fail(queued, &skill, &e, was_running).await;
        }

        self.discard(queued).await;
        #[cfg(feature = "metrics")]
        histogram!(skills_metrics::INSTALL_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if installed.is_some() {
            info!(skill = %skill, version = %ticket.version, "skill updated");
            TicketOutcome::Updated { skill }
        } else {
            info!(skill = %skill, version = %ticket.version, "skill installed");
            TicketOutcome::Installed { skill }
        }
    }

    /// Fetch and provision into staging, then move into `bundle_dir`.
    async fn install_bundle(&self, ticket: &InstallTicket, bundle_dir: &Path) -> Result<()> {
        let skill = &ticket.name;
        let staging = self.options.staging_dir.join(skill);
        remove_dir_if_exists(&staging).await?;

        match self.fetcher.fetch(skill, &staging).await {
            Ok(()) => {},
            Err(Error::FetchNotFound { .. })
                if self.options.dev_mode && SkillDescriptor::file_path(bundle_dir, skill).is_file() =>
            {
                remove_dir_if_exists(&staging).await?;
                info!(skill = %skill, "repository not found, using local bundle in dev mode");
                return self.provision(ticket, bundle_dir).await;
            },
            Err(e) => {
                remove_dir_if_exists(&staging).await?;
                match &e {
                    Error::FetchAuthFailed { .. } => {
                        error!(skill = %skill, "skill source rejected credentials, check the github token");
                    },
                    Error::FetchRateLimited { .. } => {
                        error!(skill = %skill, "skill source rate limit reached, try again later");
                    },
                    Error::FetchNotFound { .. } => {
                        warn!(skill = %skill, "skill not found at the skill source");
                    },
                    other => error!(skill = %skill, error = %other, "fetching skill failed"),
                }
                return Err(e);
            },
        }

        let descriptor = SkillDescriptor::file_path(&staging, skill);
        if !descriptor.is_file() {
            debug!(skill = %skill, "bundle has no descriptor, writing it from the ticket");
            fs::write(&descriptor, serde_json::to_vec_pretty(ticket)?).await?;
        }

        if let Err(e) = self.provision(ticket, &staging).await {
            remove_dir_if_exists(&staging).await?;
            return Err(e);
        }

        if let Err(e) = replace_bundle(&staging, bundle_dir).await {
            error!(skill = %skill, error = %e, "moving the new bundle into place failed");
            remove_dir_if_exists(&staging).await?;
            return Err(e);
        }
        Ok(())
    }

    async fn provision(&self, ticket: &InstallTicket, dir: &Path) -> Result<()> {
        for step in provision::plan(ticket)? {
            self.provisioner
                .run(&ticket.name, &step, dir)
                .await
                .map_err(|e| match e {
                    e @ Error::ProvisioningFailed { .. } => e,
                    other => Error::provisioning_failed(&ticket.name, other.to_string()),
                })?;
        }
        Ok(())
    }

    /// Terminal failure: drop the ticket, restart the previous version if it
    /// was stopped for this ticket, and report the failure.
    async fn fail(
        &self,
        queued: &QueuedTicket,
        skill: &str,
        err: &Error,
        restart_previous: bool,
    ) -> TicketOutcome {
        self.discard(queued).await;
        if restart_previous
            && let Err(e) = self.registry.start_skill(skill).await
        {
            warn!(skill, error = %e, "failed to restart previous version");
        }

        #[cfg(feature = "metrics")]
        counter!(
            skills_metrics::INSTALL_ERRORS_TOTAL,
            labels::REASON => err.kind(),
            labels::SKILL => skill.to_string()
        )
        .increment(1);

        let reason = err.to_string();
        self.events.publish(LifecycleEvent::SkillInstallFailed {
            skill: skill.to_string(),
            reason: reason.clone(),
        });
        TicketOutcome::Failed {
            skill: skill.to_string(),
            reason,
        }
    }

    async fn discard(&self, queued: &QueuedTicket) {
        if let Err(e) = self.queue.remove(queued).await {
            warn!(ticket = %queued.id(), error = %e, "failed to delete install ticket");
        }
    }
}

/// Swap `staged` in as `bundle_dir`. The previous bundle is kept aside
/// until the new one is in place and restored if the move fails.
async fn replace_bundle(staged: &Path, bundle_dir: &Path) -> Result<()> {
    if let Some(parent) = bundle_dir.parent() {
        fs::create_dir_all(parent).await?;
    }
    let backup = sibling(bundle_dir, "previous");
    remove_dir_if_exists(&backup).await?;

    let had_previous = fs::try_exists(bundle_dir).await?;
    if had_previous {
        fs::rename(bundle_dir, &backup).await?;
    }

    if let Err(e) = move_dir(staged, bundle_dir).await {
        if let Err(cleanup) = remove_dir_if_exists(bundle_dir).await {
            warn!(path = %bundle_dir.display(), error = %cleanup, "failed to clean up partial bundle");
        }
        if had_previous {
            fs::rename(&backup, bundle_dir).await?;
        }
        return Err(e);
    }

    if had_previous && let Err(e) = remove_dir_if_exists(&backup).await {
        warn!(path = %backup.display(), error = %e, "failed to delete previous bundle");
    }
    Ok(())
}

/// Rename, falling back to copy-then-rename when `from` is on another filesystem.
async fn move_dir(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), to = %to.display(), "staging is on another filesystem, copying");
        },
        Err(e) => return Err(e.into()),
    }

    let incoming = sibling(to, "incoming");
    remove_dir_if_exists(&incoming).await?;
    if let Err(e) = copy_dir(from, &incoming).await {
        remove_dir_if_exists(&incoming).await?;
        return Err(e);
    }
    fs::rename(&incoming, to).await?;
    remove_dir_if_exists(from).await
}

async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

/// `<dir>.<suffix>` next to `dir`, e.g. `skills/Lights.previous`.
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(BusyGuard::acquire(&flag).is_some());
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn report_groups_outcomes() {
        let report = BatchReport {
            outcomes: vec![
                TicketOutcome::Installed {
                    skill: "Switch".into(),
                },
                TicketOutcome::Pending {
                    skill: "Lights".into(),
                    missing: vec!["Switch".into()],
                },
                TicketOutcome::Updated {
                    skill: "Weather".into(),
                },
                TicketOutcome::Failed {
                    skill: "Ghost".into(),
                    reason: "not found".into(),
                },
            ],
        };
        assert_eq!(report.changed(), vec![
            ("Switch".to_string(), false),
            ("Weather".to_string(), true)
        ]);
        assert_eq!(report.pending(), vec!["Lights"]);
        assert_eq!(report.failed(), vec!["Ghost"]);
    }

    #[tokio::test]
    async fn remove_dir_tolerates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        remove_dir_if_exists(&tmp.path().join("nope")).await.unwrap();
        let dir = tmp.path().join("staged/inner");
        std::fs::create_dir_all(&dir).unwrap();
        remove_dir_if_exists(&tmp.path().join("staged")).await.unwrap();
        assert!(!tmp.path().join("staged").exists());
    }

    fn bundle(dir: &Path, marker: &str) {
        std::fs::create_dir_all(dir.join("dialogs")).unwrap();
        std::fs::write(dir.join("marker"), marker).unwrap();
        std::fs::write(dir.join("dialogs/en.json"), marker).unwrap();
    }

    #[tokio::test]
    async fn replace_bundle_swaps_and_drops_the_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let installed = tmp.path().join("skills/Lights");
        let staged = tmp.path().join("staging/Lights");
        bundle(&installed, "old");
        bundle(&staged, "new");

        replace_bundle(&staged, &installed).await.unwrap();

        assert_eq!(std::fs::read_to_string(installed.join("marker")).unwrap(), "new");
        assert!(!staged.exists());
        assert!(!tmp.path().join("skills/Lights.previous").exists());
    }

    #[tokio::test]
    async fn failed_move_restores_the_previous_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let installed = tmp.path().join("skills/Lights");
        bundle(&installed, "old");

        let missing = tmp.path().join("staging/Lights");
        assert!(replace_bundle(&missing, &installed).await.is_err());

        assert_eq!(std::fs::read_to_string(installed.join("marker")).unwrap(), "old");
        assert_eq!(
            std::fs::read_to_string(installed.join("dialogs/en.json")).unwrap(),
            "old"
        );
        assert!(!tmp.path().join("skills/Lights.previous").exists());
    }

    #[tokio::test]
    async fn copy_dir_copies_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("from");
        bundle(&from, "copied");

        copy_dir(&from, &tmp.path().join("to")).await.unwrap();

        let to = tmp.path().join("to");
        assert_eq!(std::fs::read_to_string(to.join("marker")).unwrap(), "copied");
        assert_eq!(std::fs::read_to_string(to.join("dialogs/en.json")).unwrap(), "copied");
        assert!(from.join("marker").exists());
    }

    #[test]
    fn sibling_appends_suffix_to_the_directory_name() {
        assert_eq!(
            sibling(Path::new("/data/skills/Lights"), "previous"),
            PathBuf::from("/data/skills/Lights.previous")
        );
    }
}
