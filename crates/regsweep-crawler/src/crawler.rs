use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use futures::{future, stream, StreamExt};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::assemble::{Assemble, Assembly, EntityAssembler};
use crate::checkpoint::CheckpointStore;
use crate::config::{CrawlerConfig, OnError};
use crate::fetch::FetchClient;
use crate::prefixes::PrefixSpace;
use crate::record::{EntityRecord, RawEntity};
use crate::registry;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    LoadingCheckpoint,
    Iterating,
    Completed,
    Interrupted,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub start_index: usize,
    pub prefixes: usize,
    pub search_failures: usize,
    pub found: usize,
    pub recent: usize,
    pub assembled: usize,
    pub inserted: usize,
    pub last_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Every prefix of the space is done for the day.
    Completed(CrawlStats),
    /// Stopped early by shutdown or by the per-run limit. The checkpoint
    /// points at the last finished prefix.
    Interrupted(CrawlStats),
}

impl CrawlOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn stats(&self) -> &CrawlStats {
        match self {
            Self::Completed(stats) | Self::Interrupted(stats) => stats,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PrefixReport {
    search_failed: bool,
    found: usize,
    recent: usize,
    assembled: usize,
    inserted: usize,
}

/// Walks the prefix space for one jurisdiction and day.
pub struct Crawler {
    config: CrawlerConfig,
    space: PrefixSpace,
    client: FetchClient,
    assembler: Arc<dyn Assemble>,
    entities: Arc<dyn EntityStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    shutdown: CancellationToken,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        client: FetchClient,
        entities: Arc<dyn EntityStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let space = PrefixSpace::new(&config.prefix_alphabet, config.prefix_length)?;
        let assembler = Arc::new(EntityAssembler::new(
            client.clone(),
            config.registry.clone(),
        ));
        Ok(Self {
            config,
            space,
            client,
            assembler,
            entities,
            checkpoints,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn Assemble>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn prefix_space(&self) -> &PrefixSpace {
        &self.space
    }

    pub fn jurisdiction(&self) -> &str {
        &self.config.registry.jurisdiction
    }

    /// Crawls every prefix not yet done for `day`.
    ///
    /// Errors are fatal to the run: the checkpoint keeps the last prefix whose
    /// entities were persisted, so the next run picks up from there.
    pub async fn run(&self, day: NaiveDate) -> Result<CrawlOutcome> {
        let mut state = CrawlState::LoadingCheckpoint;
        log::info!(
            "Starting {} crawl for {day} over {} prefixes",
            self.jurisdiction(),
            self.space.len()
        );

        let start = match self.resume_index(day).await {
            Ok(start) => start,
            Err(e) => {
                transition(&mut state, CrawlState::Failed);
                return Err(e);
            }
        };

        transition(&mut state, CrawlState::Iterating);
        match self.iterate(day, start).await {
            Ok(outcome) => {
                let next = if outcome.is_completed() {
                    CrawlState::Completed
                } else {
                    CrawlState::Interrupted
                };
                transition(&mut state, next);
                let stats = outcome.stats();
                log::info!(
                    "Crawl {next:?} after {} prefixes: {} found, {} recent, {} assembled, {} inserted, {} search failures",
                    stats.prefixes,
                    stats.found,
                    stats.recent,
                    stats.assembled,
                    stats.inserted,
                    stats.search_failures
                );
                Ok(outcome)
            }
            Err(e) => {
                transition(&mut state, CrawlState::Failed);
                log::error!("Crawl failed: {e:#}");
                Err(e)
            }
        }
    }

    async fn resume_index(&self, day: NaiveDate) -> Result<usize> {
        let checkpoint = self
            .checkpoints
            .load(day, self.jurisdiction())
            .await
            .context("Couldn't load checkpoint")?;

        let Some(prefix) = checkpoint else {
            log::info!("No checkpoint for {day}, starting from the first prefix");
            return Ok(0);
        };
        match self.space.position(&prefix) {
            Some(index) => {
                log::info!("Resuming after checkpoint {prefix:?} (index {})", index + 1);
                Ok(index + 1)
            }
            None => {
                log::warn!("Checkpoint {prefix:?} is not part of the prefix space, starting over");
                Ok(0)
            }
        }
    }

    async fn iterate(&self, day: NaiveDate, start: usize) -> Result<CrawlOutcome> {
        let remaining = self.space.len().saturating_sub(start);
        let planned = self.config.limit.map_or(remaining, |l| l.min(remaining));
        let shutdown = self.shutdown.clone();

        let mut results = stream::iter(self.space.iter_from(start).take(planned))
            .take_while(move |_| future::ready(!shutdown.is_cancelled()))
            .map(|prefix| async move {
                let report = self.process_prefix(day, &prefix).await;
                (prefix, report)
            })
            .buffered(self.config.prefix_concurrency.max(1));

        let mut stats = CrawlStats {
            start_index: start,
            ..Default::default()
        };
        while let Some((prefix, report)) = results.next().await {
            let report = report.with_context(|| format!("Prefix {prefix:?} failed"))?;
            self.checkpoints
                .save(day, self.jurisdiction(), &prefix)
                .await
                .with_context(|| format!("Couldn't save checkpoint at {prefix:?}"))?;

            stats.prefixes += 1;
            stats.search_failures += usize::from(report.search_failed);
            stats.found += report.found;
            stats.recent += report.recent;
            stats.assembled += report.assembled;
            stats.inserted += report.inserted;
            stats.last_prefix = Some(prefix);
        }

        if stats.prefixes == remaining {
            Ok(CrawlOutcome::Completed(stats))
        } else {
            if self.shutdown.is_cancelled() {
                log::warn!("Shutdown requested, stopped at {:?}", stats.last_prefix);
            } else {
                log::info!("Run limit reached at {:?}", stats.last_prefix);
            }
            Ok(CrawlOutcome::Interrupted(stats))
        }
    }

    async fn process_prefix(&self, day: NaiveDate, prefix: &str) -> Result<PrefixReport> {
        log::info!("Fetching entities for prefix {prefix:?}");
        let registry = &self.config.registry;
        let body = match self
            .client
            .post_json(
                &registry.search_url(),
                &registry::search_payload(registry, prefix),
            )
            .await
        {
            Ok(body) => body,
            Err(e) => match self.config.on_search_error {
                OnError::SkipAndLog => {
                    log::warn!("Skipping prefix {prefix:?}: {e}");
                    return Ok(PrefixReport {
                        search_failed: true,
                        ..Default::default()
                    });
                }
                OnError::Fail => return Err(e.into()),
            },
        };

        let raw = registry::search_results(&body);
        if raw.is_empty() {
            log::info!("Empty search result list for prefix {prefix:?}");
            return Ok(PrefixReport::default());
        }

        let cutoff = day - Duration::days(i64::from(self.config.retention_days));
        let found = raw.len();
        let recent = filter_recent(raw, cutoff);
        log::info!(
            "Found {} entities filed since {cutoff} for prefix {prefix:?} ({found} total)",
            recent.len()
        );
        if recent.is_empty() {
            return Ok(PrefixReport {
                found,
                ..Default::default()
            });
        }

        let recent_count = recent.len();
        let records = self.assemble_all(prefix, recent).await;
        let outcome = self
            .entities
            .persist(&records)
            .await
            .with_context(|| format!("Couldn't persist entities for prefix {prefix:?}"))?;
        if !records.is_empty() {
            log::info!(
                "Persisted {} entities for prefix {prefix:?} ({} duplicates skipped)",
                outcome.inserted,
                outcome.skipped
            );
        }

        Ok(PrefixReport {
            search_failed: false,
            found,
            recent: recent_count,
            assembled: records.len(),
            inserted: outcome.inserted,
        })
    }

    /// Assembles every entity concurrently. A failing or panicking task only
    /// loses its own entity.
    async fn assemble_all(&self, prefix: &str, raw: Vec<RawEntity>) -> Vec<EntityRecord> {
        let mut tasks = JoinSet::new();
        for (index, raw) in raw.into_iter().enumerate() {
            let assembler = self.assembler.clone();
            tasks.spawn(async move { (index, assembler.assemble(&raw).await) });
        }

        let mut built = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Assembly::Built(record))) => built.push((index, record)),
                Ok((_, Assembly::Dropped { dos_id, reason })) => {
                    log::info!("Dropped entity {dos_id:?} for prefix {prefix:?}: {reason}");
                }
                Err(e) => {
                    log::error!("Assembly task for prefix {prefix:?} failed: {e}");
                }
            }
        }
        built.sort_by_key(|(index, _)| *index);
        built.into_iter().map(|(_, record)| record).collect()
    }
}

/// Keeps search hits whose initial filing date is on or after `cutoff`.
pub fn filter_recent(raw: Vec<Value>, cutoff: NaiveDate) -> Vec<RawEntity> {
    raw.into_iter()
        .map(RawEntity::from)
        .filter(|entity| entity.initial_filing_date().is_some_and(|d| d >= cutoff))
        .collect()
}

fn transition(state: &mut CrawlState, next: CrawlState) {
    log::debug!("Crawl state {state:?} -> {next:?}");
    *state = next;
}
