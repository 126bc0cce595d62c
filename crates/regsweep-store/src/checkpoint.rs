use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use regsweep_crawler::checkpoint::checkpoint_id;
use regsweep_crawler::{CheckpointRecord, CheckpointStore};
use sqlx::{PgPool, Row};

pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The record saved for `day`, if any.
    pub async fn get(&self, day: NaiveDate, jurisdiction: &str) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, jurisdiction, crawl_day, last_prefix, updated_at
            FROM scraper_checkpoints
            WHERE id = $1
            "#,
        )
        .bind(checkpoint_id(day, jurisdiction))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load checkpoint")?;

        row.map(|r| {
            Ok(CheckpointRecord {
                id: r.try_get("id")?,
                jurisdiction: r.try_get("jurisdiction")?,
                crawl_day: r.try_get("crawl_day")?,
                last_prefix: r.try_get("last_prefix")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, day: NaiveDate, jurisdiction: &str) -> Result<Option<String>> {
        Ok(self
            .get(day, jurisdiction)
            .await?
            .and_then(|r| r.prefix_for(day).map(String::from)))
    }

    async fn save(&self, day: NaiveDate, jurisdiction: &str, prefix: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraper_checkpoints (id, jurisdiction, crawl_day, last_prefix, updated_at)
            VALUES ($1, $2, $3, $4, CURRENT_DATE)
            ON CONFLICT (id) DO UPDATE
            SET last_prefix = EXCLUDED.last_prefix, updated_at = CURRENT_DATE
            "#,
        )
        .bind(checkpoint_id(day, jurisdiction))
        .bind(jurisdiction)
        .bind(day)
        .bind(prefix)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save checkpoint {prefix:?}"))?;
        Ok(())
    }

    /// Removes the day's row along with any older rows of the jurisdiction.
    async fn clear(&self, day: NaiveDate, jurisdiction: &str) -> Result<()> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM scraper_checkpoints
            WHERE id = $1 OR (jurisdiction = $2 AND crawl_day < $3)
            "#,
        )
        .bind(checkpoint_id(day, jurisdiction))
        .bind(jurisdiction)
        .bind(day)
        .execute(&self.pool)
        .await
        .context("Failed to clear checkpoint")?
        .rows_affected();
        log::debug!("Cleared {deleted} {jurisdiction} checkpoint rows up to {day}");
        Ok(())
    }
}
