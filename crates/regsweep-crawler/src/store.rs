use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::record::EntityRecord;

/// Rows written by one [`EntityStore::persist`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Set-like storage of entity records keyed by `entity_number`.
///
/// A record whose key is already stored, or repeated earlier in the same
/// batch, is dropped. Nothing is ever overwritten.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn persist(&self, records: &[EntityRecord]) -> Result<PersistOutcome>;

    /// Records of `jurisdiction` last seen on `day` (UTC).
    async fn seen_on(&self, day: NaiveDate, jurisdiction: &str) -> Result<Vec<EntityRecord>>;
}

/// Keeps the first record for each key, in batch order.
pub fn dedup_batch(records: &[EntityRecord]) -> Vec<&EntityRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.entity_number))
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    rows: Mutex<BTreeMap<i64, EntityRecord>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, entity_number: i64) -> Option<EntityRecord> {
        self.rows
            .lock()
            .ok()
            .and_then(|rows| rows.get(&entity_number).cloned())
    }

    pub fn all(&self) -> Vec<EntityRecord> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn persist(&self, records: &[EntityRecord]) -> Result<PersistOutcome> {
        if records.is_empty() {
            return Ok(PersistOutcome::default());
        }
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("Entity store lock poisoned"))?;
        let mut outcome = PersistOutcome::default();
        for record in records {
            if rows.contains_key(&record.entity_number) {
                outcome.skipped += 1;
            } else {
                rows.insert(record.entity_number, record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn seen_on(&self, day: NaiveDate, jurisdiction: &str) -> Result<Vec<EntityRecord>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("Entity store lock poisoned"))?;
        Ok(rows
            .values()
            .filter(|r| r.source_state == jurisdiction)
            .filter(|r| r.source_last_seen_at.date_naive() == day)
            .cloned()
            .collect())
    }
}
