use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tokio::{fs, sync::Mutex},
};

use crate::{
    error::Result,
    types::{Conditions, SkillDescriptor},
    version::Version,
};

/// Durable record for one known skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRecord {
    pub active: bool,
    pub version: Version,
    pub author: String,
    #[serde(default)]
    pub conditions: Conditions,
}

impl SkillRecord {
    pub fn from_descriptor(descriptor: &SkillDescriptor, active: bool) -> Self {
        Self {
            active,
            version: descriptor.version,
            author: descriptor.author.clone(),
            conditions: descriptor.effective_conditions(),
        }
    }
}

pub type SkillRecords = BTreeMap<String, SkillRecord>;

/// Persisted skill configuration with atomic writes.
///
/// Every read-modify-write runs under one lock, so callers outside the
/// registry's operation lock cannot drop each other's records.
pub struct SkillsConfigStore {
    path: PathBuf,
    write: Mutex<()>,
}

impl SkillsConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records from disk, returning an empty set if the file is missing.
    pub async fn load(&self) -> Result<SkillRecords> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(SkillRecords::new());
        }
        let data = fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(SkillRecords::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    /// Write to a temp file, then rename over the target.
    async fn save(&self, records: &SkillRecords) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(records)?;
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<SkillRecord>> {
        Ok(self.load().await?.remove(name))
    }

    /// Flip the `active` flag. Returns `false` if the skill is unknown.
    pub async fn set_active(&self, name: &str, active: bool) -> Result<bool> {
        let _write = self.write.lock().await;
        let mut records = self.load().await?;
        let Some(record) = records.get_mut(name) else {
            return Ok(false);
        };
        if record.active != active {
            record.active = active;
            self.save(&records).await?;
        }
        Ok(true)
    }

    pub async fn upsert(&self, name: &str, record: SkillRecord) -> Result<()> {
        let _write = self.write.lock().await;
        let mut records = self.load().await?;
        records.insert(name.to_string(), record);
        self.save(&records).await
    }

    /// Store `record` for `name`, keeping the `active` flag of an existing record.
    pub async fn upsert_keep_active(&self, name: &str, mut record: SkillRecord) -> Result<()> {
        let _write = self.write.lock().await;
        let mut records = self.load().await?;
        if let Some(existing) = records.get(name) {
            record.active = existing.active;
        }
        records.insert(name.to_string(), record);
        self.save(&records).await
    }

    /// Returns `true` if an entry was removed.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let _write = self.write.lock().await;
        let mut records = self.load().await?;
        let removed = records.remove(name).is_some();
        if removed {
            self.save(&records).await?;
        }
        Ok(removed)
    }

    /// Forget every skill.
    pub async fn clear(&self) -> Result<()> {
        let _write = self.write.lock().await;
        self.save(&SkillRecords::new()).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    fn record(active: bool) -> SkillRecord {
        SkillRecord {
            active,
            version: Version::new(1, 0, 0),
            author: "acme".into(),
            conditions: Conditions::default(),
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SkillsConfigStore::new(tmp.path().join("missing.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SkillsConfigStore::new(tmp.path().join("nested/skills.json"));
        store.upsert("Lights", record(true)).await.unwrap();

        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
        assert_eq!(store.get("Lights").await.unwrap(), Some(record(true)));
    }

    #[tokio::test]
    async fn set_active_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SkillsConfigStore::new(tmp.path().join("skills.json"));
        store.upsert("Lights", record(true)).await.unwrap();

        assert!(store.set_active("Lights", false).await.unwrap());
        assert!(!store.get("Lights").await.unwrap().unwrap().active);
        assert!(!store.set_active("Nope", true).await.unwrap());

        assert!(store.remove("Lights").await.unwrap());
        assert!(!store.remove("Lights").await.unwrap());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_keep_active_preserves_a_disabled_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SkillsConfigStore::new(tmp.path().join("skills.json"));
        store.upsert("Lights", record(false)).await.unwrap();

        let mut newer = record(true);
        newer.version = Version::new(2, 0, 0);
        store.upsert_keep_active("Lights", newer).await.unwrap();
        store.upsert_keep_active("Switch", record(true)).await.unwrap();

        let lights = store.get("Lights").await.unwrap().unwrap();
        assert!(!lights.active);
        assert_eq!(lights.version, Version::new(2, 0, 0));
        assert!(store.get("Switch").await.unwrap().unwrap().active);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_keep_every_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(SkillsConfigStore::new(tmp.path().join("skills.json")));
        store.upsert("Toggle", record(true)).await.unwrap();

        let installer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..50 {
                    store.upsert(&format!("Skill{i}"), record(true)).await.unwrap();
                }
            })
        };
        let toggler = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..50 {
                    store.set_active("Toggle", i % 2 == 0).await.unwrap();
                }
            })
        };
        installer.await.unwrap();
        toggler.await.unwrap();

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 51);
        assert!(records.contains_key("Toggle"));
    }

    #[tokio::test]
    async fn parses_install_file_style_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills.json");
        std::fs::write(
            &path,
            r#"{"HubCore": {"active": false, "version": "1.0.2", "author": "core", "conditions": {"lang": ["en"]}}}"#,
        )
        .unwrap();
        let records = SkillsConfigStore::new(path).load().await.unwrap();
        let core = &records["HubCore"];
        assert!(!core.active);
        assert_eq!(core.conditions.languages, vec!["en".to_string()]);
    }
}
