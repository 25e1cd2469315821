//! Install tickets and the directory-backed queue holding them.
//!
//! One `<Name>.install` JSON file per pending install or update. Producers
//! write through [`TicketQueue::enqueue`], which renames a fully written
//! temp file into place so the pipeline never reads a partial ticket.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tokio::fs,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    types::Conditions,
    version::Version,
};

pub const TICKET_EXTENSION: &str = "install";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallTicket {
    pub name: String,
    pub version: Version,
    pub author: String,
    pub alice_min_version: Version,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pip_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Remaining descriptor fields (intents, description, entry point).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InstallTicket {
    pub fn new(name: impl Into<String>, version: Version, author: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            author: author.into(),
            alice_min_version: Version::new(0, 0, 0),
            conditions: Conditions::default(),
            pip_requirements: Vec::new(),
            system_requirements: Vec::new(),
            script: None,
            extra: Map::new(),
        }
    }

    pub fn effective_conditions(&self) -> Conditions {
        self.conditions
            .clone()
            .with_min_host_version(Some(self.alice_min_version))
    }

    pub fn parse(ticket: &str, raw: &str) -> Result<Self> {
        let parsed: Self =
            serde_json::from_str(raw).map_err(|e| Error::invalid_ticket(ticket, e.to_string()))?;
        if parsed.name.trim().is_empty() {
            return Err(Error::invalid_ticket(ticket, "empty skill name"));
        }
        if parsed.name.contains(['/', '\\']) || parsed.name.starts_with('.') {
            return Err(Error::invalid_ticket(ticket, "skill name is not a plain file name"));
        }
        Ok(parsed)
    }
}

/// A ticket file found in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTicket {
    pub path: PathBuf,
}

impl QueuedTicket {
    /// File stem, used as the ticket's identity in logs.
    pub fn id(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn read(&self) -> Result<InstallTicket> {
        let raw = fs::read_to_string(&self.path).await?;
        InstallTicket::parse(&self.id(), &raw)
    }
}

#[derive(Debug, Clone)]
pub struct TicketQueue {
    dir: PathBuf,
}

impl TicketQueue {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{TICKET_EXTENSION}"))
    }

    pub async fn contains(&self, name: &str) -> bool {
        fs::metadata(self.path_for(name))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Pending tickets, sorted by file name.
    pub async fn list(&self) -> Result<Vec<QueuedTicket>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tickets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == TICKET_EXTENSION) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                tickets.push(QueuedTicket { path });
            }
        }
        tickets.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(tickets)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.list().await?.is_empty())
    }

    /// Write `ticket` into the queue. Returns `false` without touching the
    /// queue if a ticket for the same skill is already pending.
    pub async fn enqueue(&self, ticket: &InstallTicket) -> Result<bool> {
        let target = self.path_for(&ticket.name);
        if fs::try_exists(&target).await? {
            debug!(skill = %ticket.name, "install ticket already queued");
            return Ok(false);
        }
        fs::create_dir_all(&self.dir).await?;
        let tmp = target.with_extension(format!("{TICKET_EXTENSION}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(ticket)?).await?;
        fs::rename(&tmp, &target).await?;
        debug!(skill = %ticket.name, version = %ticket.version, "queued install ticket");
        Ok(true)
    }

    /// Delete a consumed ticket. Already-deleted tickets are not an error.
    pub async fn remove(&self, ticket: &QueuedTicket) -> Result<()> {
        match fs::remove_file(&ticket.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticket_file_and_keeps_extra_fields() {
        let raw = r#"{
            "name": "Lights",
            "version": "2.0",
            "author": "acme",
            "aliceMinVersion": "0.9",
            "conditions": {"skill": ["Switch"]},
            "systemRequirements": ["libhue"],
            "intents": ["TurnOn"]
        }"#;
        let ticket = InstallTicket::parse("Lights", raw).unwrap();
        assert_eq!(ticket.version, Version::new(2, 0, 0));
        assert_eq!(ticket.system_requirements, vec!["libhue".to_string()]);
        assert!(ticket.extra.contains_key("intents"));
        assert_eq!(
            ticket.effective_conditions().min_host_version,
            Some(Version::new(0, 9, 0))
        );
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = InstallTicket::parse("x", r#"{"name": "Lights", "version": "2.0"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidTicket { .. }));
    }

    #[test]
    fn rejects_path_like_names() {
        let raw = r#"{"name": "../etc", "version": "1", "author": "a", "aliceMinVersion": "0"}"#;
        assert!(InstallTicket::parse("x", raw).is_err());
    }

    #[tokio::test]
    async fn enqueue_is_atomic_and_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = TicketQueue::new(tmp.path().join("tickets"));
        assert!(queue.list().await.unwrap().is_empty());

        let ticket = InstallTicket::new("Switch", Version::new(1, 0, 0), "acme");
        assert!(queue.enqueue(&ticket).await.unwrap());
        assert!(!queue.enqueue(&ticket).await.unwrap());
        assert!(queue.contains("Switch").await);
        assert!(!queue.contains("Lights").await);

        let files: Vec<_> = std::fs::read_dir(queue.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn list_is_sorted_and_ignores_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = TicketQueue::new(tmp.path().to_path_buf());
        for name in ["Weather", "Alarm"] {
            queue
                .enqueue(&InstallTicket::new(name, Version::new(1, 0, 0), "acme"))
                .await
                .unwrap();
        }
        std::fs::write(tmp.path().join("Half.install.tmp"), "{").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();

        let listed = queue.list().await.unwrap();
        let ids: Vec<_> = listed.iter().map(QueuedTicket::id).collect();
        assert_eq!(ids, vec!["Alarm", "Weather"]);

        let first = &listed[0];
        assert_eq!(first.read().await.unwrap().name, "Alarm");
        queue.remove(first).await.unwrap();
        queue.remove(first).await.unwrap();
        assert_eq!(queue.list().await.unwrap().len(), 1);
    }
}
