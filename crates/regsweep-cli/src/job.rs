//! What happens once a day's crawl has covered the whole prefix space.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regsweep_crawler::{CheckpointStore, EntityStore, ErrorCounter};
use regsweep_export::{run_export, ExportConfig, ExportOutput, ExportRun};

pub struct DailyJob {
    pub jurisdiction: String,
    pub entities: Arc<dyn EntityStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub errors: Arc<dyn ErrorCounter>,
    pub export: Option<ExportConfig>,
}

impl DailyJob {
    /// Clears the checkpoint, captures the error count, exports, then resets
    /// the counter. A failed export leaves the counter untouched.
    pub async fn finalize(&self, day: NaiveDate, crawl_duration: Duration) -> Result<Option<ExportOutput>> {
        let jurisdiction = self.jurisdiction.as_str();
        self.checkpoints
            .clear(day, jurisdiction)
            .await
            .context("Couldn't clear checkpoint")?;
        let crawl_errors = self.errors.load();

        let output = match &self.export {
            Some(conf) => Some(self.export(conf, day, crawl_duration, crawl_errors).await?),
            None => {
                log::info!("Export disabled, {crawl_errors} crawl errors recorded for {day}");
                None
            }
        };

        self.errors.reset().context("Couldn't reset error counter")?;
        Ok(output)
    }

    pub async fn export(
        &self,
        conf: &ExportConfig,
        day: NaiveDate,
        crawl_duration: Duration,
        crawl_errors: u64,
    ) -> Result<ExportOutput> {
        let records = self.entities.seen_on(day, &self.jurisdiction).await?;
        let run = ExportRun {
            jurisdiction: &self.jurisdiction,
            day,
            crawl_duration,
            crawl_errors,
        };
        run_export(conf, &run, &records).context("Export failed")
    }
}
