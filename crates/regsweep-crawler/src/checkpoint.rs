//! Durable "last completed prefix" marker for one day's crawl.
//!
//! A checkpoint only ever describes the day it was written for. Loading it on
//! any other day yields nothing, even though the record may still be stored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last completed prefix for `day`, `None` when absent or stale.
    async fn load(&self, day: NaiveDate, jurisdiction: &str) -> Result<Option<String>>;

    async fn save(&self, day: NaiveDate, jurisdiction: &str, prefix: &str) -> Result<()>;

    async fn clear(&self, day: NaiveDate, jurisdiction: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: String,
    pub jurisdiction: String,
    pub crawl_day: NaiveDate,
    pub last_prefix: Option<String>,
    pub updated_at: NaiveDate,
}

impl CheckpointRecord {
    pub fn new(day: NaiveDate, jurisdiction: &str, prefix: &str) -> Self {
        Self {
            id: checkpoint_id(day, jurisdiction),
            jurisdiction: jurisdiction.to_string(),
            crawl_day: day,
            last_prefix: Some(prefix.to_string()),
            updated_at: Utc::now().date_naive(),
        }
    }

    /// The stored prefix if this record belongs to `day`.
    pub fn prefix_for(&self, day: NaiveDate) -> Option<&str> {
        if self.crawl_day != day {
            log::info!(
                "Ignoring stale checkpoint {} from {} (today is {day})",
                self.id,
                self.crawl_day
            );
            return None;
        }
        self.last_prefix.as_deref()
    }
}

pub fn checkpoint_id(day: NaiveDate, jurisdiction: &str) -> String {
    format!("{jurisdiction}_daily_{day}")
}

/// Keeps one record per jurisdiction in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<String, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` as is, bypassing the day it was written for.
    pub fn insert(&self, record: CheckpointRecord) -> Result<()> {
        self.lock()?.insert(record.jurisdiction.clone(), record);
        Ok(())
    }

    pub fn get(&self, jurisdiction: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self.lock()?.get(jurisdiction).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CheckpointRecord>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("Checkpoint store lock poisoned"))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, day: NaiveDate, jurisdiction: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(jurisdiction)
            .and_then(|r| r.prefix_for(day).map(String::from)))
    }

    async fn save(&self, day: NaiveDate, jurisdiction: &str, prefix: &str) -> Result<()> {
        self.insert(CheckpointRecord::new(day, jurisdiction, prefix))
    }

    async fn clear(&self, day: NaiveDate, jurisdiction: &str) -> Result<()> {
        let mut records = self.lock()?;
        if records
            .get(jurisdiction)
            .is_some_and(|r| r.crawl_day == day)
        {
            records.remove(jurisdiction);
        }
        Ok(())
    }
}

/// One JSON file per jurisdiction inside a directory.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, jurisdiction: &str) -> PathBuf {
        self.dir.join(format!(".{jurisdiction}-checkpoint.json"))
    }

    fn read(path: &Path) -> Result<Option<CheckpointRecord>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs_err::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                log::warn!("Ignoring unreadable checkpoint {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn write(&self, record: &CheckpointRecord) -> Result<()> {
        let path = self.path(&record.jurisdiction);
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(record)?;

        fs_err::create_dir_all(&self.dir)?;
        {
            let mut file = fs_err::File::create(&temp_path)?;
            std::io::Write::write_all(&mut file, content.as_bytes())?;
            file.sync_all()?;
        }
        fs_err::rename(&temp_path, &path)
            .with_context(|| format!("Couldn't move checkpoint into {}", path.display()))?;
        Ok(())
    }

    fn remove_if_day(&self, day: NaiveDate, jurisdiction: &str) -> Result<()> {
        let path = self.path(jurisdiction);
        if let Some(record) = Self::read(&path)? {
            if record.crawl_day == day {
                fs_err::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Runs file work on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .context("Checkpoint file task failed")?
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn load(&self, day: NaiveDate, jurisdiction: &str) -> Result<Option<String>> {
        let jurisdiction = jurisdiction.to_string();
        let record = self
            .blocking(move |store| Self::read(&store.path(&jurisdiction)))
            .await?;
        Ok(record.and_then(|r| r.prefix_for(day).map(String::from)))
    }

    async fn save(&self, day: NaiveDate, jurisdiction: &str, prefix: &str) -> Result<()> {
        let record = CheckpointRecord::new(day, jurisdiction, prefix);
        self.blocking(move |store| store.write(&record)).await
    }

    async fn clear(&self, day: NaiveDate, jurisdiction: &str) -> Result<()> {
        let jurisdiction = jurisdiction.to_string();
        self.blocking(move |store| store.remove_if_day(day, &jurisdiction))
            .await
    }
}
