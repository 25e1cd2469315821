//! Remote skill catalog: latest published versions and install tickets.

use std::sync::Arc;

use {async_trait::async_trait, tracing::debug};

use crate::{
    conditions::DependencyResolver,
    error::Result,
    fetch::GithubClient,
    ticket::{InstallTicket, TICKET_EXTENSION, TicketQueue},
    version::Version,
};

#[async_trait]
pub trait SkillStore: Send + Sync {
    /// The install descriptor published for `skill` on the update channel.
    async fn fetch_ticket(&self, skill: &str) -> Result<InstallTicket>;

    async fn latest_version(&self, skill: &str) -> Result<Version> {
        Ok(self.fetch_ticket(skill).await?.version)
    }
}

/// Reads `<Name>.install` from the root of each skill repository.
pub struct GithubSkillStore {
    client: GithubClient,
}

impl GithubSkillStore {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SkillStore for GithubSkillStore {
    async fn fetch_ticket(&self, skill: &str) -> Result<InstallTicket> {
        let url = self
            .client
            .raw_url(skill, &format!("{skill}.{TICKET_EXTENSION}"));
        let raw = self.client.get(skill, &url).await?.text().await?;
        let ticket = InstallTicket::parse(skill, &raw)?;
        debug!(skill, version = %ticket.version, "fetched install descriptor");
        Ok(ticket)
    }
}

/// Download `skill`'s descriptor and queue it, unless a ticket is already pending.
pub async fn queue_install(store: &dyn SkillStore, queue: &TicketQueue, skill: &str) -> Result<bool> {
    if queue.contains(skill).await {
        return Ok(false);
    }
    let ticket = store.fetch_ticket(skill).await?;
    queue.enqueue(&ticket).await
}

/// Resolves missing sibling skills by queueing install tickets from the catalog.
pub struct TicketResolver {
    store: Arc<dyn SkillStore>,
    queue: TicketQueue,
}

impl TicketResolver {
    pub fn new(store: Arc<dyn SkillStore>, queue: TicketQueue) -> Self {
        Self { store, queue }
    }
}

#[async_trait]
impl DependencyResolver for TicketResolver {
    async fn request_install(&self, skill: &str) -> Result<bool> {
        queue_install(self.store.as_ref(), &self.queue, skill).await
    }
}
