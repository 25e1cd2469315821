//! Top-level lifecycle: boot, periodic update checks, shutdown.

use std::{collections::BTreeSet, sync::Arc};

use {
    alder_config::AlderConfig,
    tracing::{info, warn},
};

use crate::{
    conditions::{ConditionEvaluator, HostEnvironment},
    config_store::SkillsConfigStore,
    error::Result,
    events::{EventSink, LifecycleEvent, LoggingSink},
    fetch::{GithubClient, GithubFetcher, SourceFetcher},
    host::{
        Capabilities, FlagStatus, HostStatus, IntentTransport, LoggingTransport, NluRegenerator,
        NoopNlu, StaticCapabilities,
    },
    pipeline::{BatchReport, InstallPipeline, PipelineOptions},
    provision::{CommandProvisioner, Provisioner},
    registry::{RegistryOptions, SkillRegistry},
    skill::{SkillEvent, SkillFactories},
    store::{GithubSkillStore, SkillStore, TicketResolver, queue_install},
    ticket::TicketQueue,
    types::DispatchOrigin,
    update::check_for_updates,
};

/// Everything the lifecycle core talks to but does not own.
pub struct Collaborators {
    pub transport: Arc<dyn IntentTransport>,
    pub capabilities: Arc<dyn Capabilities>,
    pub nlu: Arc<dyn NluRegenerator>,
    pub status: Arc<dyn HostStatus>,
    pub events: Arc<dyn EventSink>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub store: Arc<dyn SkillStore>,
    pub provisioner: Arc<dyn Provisioner>,
    pub factories: SkillFactories,
}

impl Collaborators {
    /// GitHub catalog and fetcher, child-process provisioning, and log-only
    /// stand-ins for the transport, NLU and event consumers.
    pub fn github(config: &AlderConfig, factories: SkillFactories) -> Self {
        let client = GithubClient::from_config(config);
        Self {
            transport: Arc::new(LoggingTransport),
            capabilities: Arc::new(StaticCapabilities::default()),
            nlu: Arc::new(NoopNlu),
            status: Arc::new(FlagStatus::default()),
            events: Arc::new(LoggingSink),
            fetcher: Arc::new(GithubFetcher::new(client.clone())),
            store: Arc::new(GithubSkillStore::new(client)),
            provisioner: Arc::new(CommandProvisioner),
            factories,
        }
    }
}

pub struct LifecycleOrchestrator {
    registry: Arc<SkillRegistry>,
    pipeline: Arc<InstallPipeline>,
    store: Arc<dyn SkillStore>,
    queue: TicketQueue,
    status: Arc<dyn HostStatus>,
    events: Arc<dyn EventSink>,
    defaults: Vec<String>,
    auto_update: bool,
    offline_only: bool,
}

impl LifecycleOrchestrator {
    pub fn new(config: &AlderConfig, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            transport,
            capabilities,
            nlu,
            status,
            events,
            fetcher,
            store,
            provisioner,
            factories,
        } = collaborators;

        let queue = TicketQueue::new(config.skills.tickets_dir());
        let resolver = Arc::new(TicketResolver::new(Arc::clone(&store), queue.clone()));
        let host = HostEnvironment::from_config(&config.host)?;
        let evaluator = ConditionEvaluator::new(host, capabilities).with_resolver(resolver);

        let registry = Arc::new(SkillRegistry::new(
            RegistryOptions::from_config(&config.skills),
            evaluator,
            factories,
            transport,
            SkillsConfigStore::new(config.skills.config_path()),
            Arc::clone(&nlu),
        ));
        let pipeline = Arc::new(InstallPipeline::new(
            PipelineOptions::from_config(config),
            queue.clone(),
            Arc::clone(&registry),
            fetcher,
            provisioner,
            Arc::clone(&status),
            nlu,
            Arc::clone(&events),
        ));

        Ok(Self {
            registry,
            pipeline,
            store,
            queue,
            status,
            events,
            defaults: config.skills.defaults.clone(),
            auto_update: config.skills.auto_update,
            offline_only: config.host.stay_completely_offline,
        })
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<InstallPipeline> {
        &self.pipeline
    }

    pub fn queue(&self) -> &TicketQueue {
        &self.queue
    }

    fn can_reach_network(&self) -> bool {
        !self.offline_only && self.status.is_online()
    }

    /// Boot the skill set and start the install poller.
    ///
    /// With an empty configuration the default skills are installed first.
    /// Otherwise the registry is loaded, updates are checked, and any found
    /// are installed before the skills start. Returns the supported intents.
    pub async fn start(&self) -> Result<BTreeSet<String>> {
        let fresh = self.registry.config_store().load().await?.is_empty();
        if fresh {
            info!(defaults = ?self.defaults, "no skills configured, installing defaults");
            self.queue_defaults().await;
            self.run_batch().await?;
        }

        self.registry.bootstrap().await?;

        if !fresh && self.can_reach_network() {
            match self.check_updates().await {
                Ok(found) if found > 0 && self.auto_update => {
                    self.run_batch().await?;
                },
                Ok(_) => {},
                Err(e) => warn!(error = %e, "update check failed"),
            }
        }

        let intents = self.registry.start_all().await?;
        self.pipeline.start().await;
        self.events.publish(LifecycleEvent::Started);
        Ok(intents)
    }

    /// Tell every skill the host finished booting.
    pub async fn booted(&self) {
        self.registry
            .broadcast(&SkillEvent::Booted, &[], DispatchOrigin::System)
            .await;
        self.events.publish(LifecycleEvent::Booted);
    }

    /// Hourly tick: check for updates and notify skills.
    pub async fn on_full_hour(&self) -> usize {
        let mut found = 0;
        if self.can_reach_network() {
            match self.check_updates().await {
                Ok(n) => found = n,
                Err(e) => warn!(error = %e, "update check failed"),
            }
            if found > 0 && self.auto_update {
                self.pipeline.wake();
            }
        }
        self.registry
            .broadcast(&SkillEvent::FullHour, &[], DispatchOrigin::System)
            .await;
        found
    }

    pub async fn check_updates(&self) -> Result<usize> {
        check_for_updates(
            &self.registry,
            self.store.as_ref(),
            &self.queue,
            self.auto_update,
        )
        .await
    }

    /// Queue an install of `skill` from the catalog. Returns `false` if one
    /// was already pending.
    pub async fn install(&self, skill: &str) -> Result<bool> {
        let queued = queue_install(self.store.as_ref(), &self.queue, skill).await?;
        if queued {
            self.pipeline.wake();
        }
        Ok(queued)
    }

    pub async fn run_batch(&self) -> Result<BatchReport> {
        self.pipeline.run_batch().await
    }

    /// Stop polling, let the ticket in flight finish, then stop every skill.
    pub async fn stop(&self) {
        self.pipeline.stop().await;
        self.registry.stop_all().await;
        self.events.publish(LifecycleEvent::Stopped);
        info!("skill lifecycle stopped");
    }

    /// Delete every installed skill and its configuration. With
    /// `add_defaults` the default skills are queued for install again.
    pub async fn wipe_skills(&self, add_defaults: bool) -> Result<()> {
        self.registry.wipe().await?;
        if add_defaults {
            self.queue_defaults().await;
            self.pipeline.wake();
        }
        Ok(())
    }

    async fn queue_defaults(&self) {
        for skill in &self.defaults {
            if let Err(e) = queue_install(self.store.as_ref(), &self.queue, skill).await {
                warn!(skill = %skill, error = %e, "failed to queue default skill");
            }
        }
    }
}
