#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental ingestion of NYC parking tickets into the `PostGIS` store.
//!
//! A [`Pipeline`] owns the store handle and the dataset client. Each run
//! walks one dataset page by page: fetch, map, upsert, and finally move
//! the dataset's cursor to the largest source update timestamp seen.

pub mod config;
pub mod scheduler;
pub mod writer;

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use futures::TryStreamExt as _;
use ticket_map_database::{PgStore, StoreError, TicketStore};
use ticket_map_database_models::StatsSummary;
use ticket_map_ingest_models::{CycleReport, DatasetFailure, RunKind, RunState, SyncReport};
use ticket_map_source::{FetchError, mapping, socrata::SocrataClient};
use ticket_map_source_models::{Dataset, SyncMode};

use crate::{
    config::IngestConfig,
    writer::BatchWriter,
};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tracks and logs the state of one run.
struct RunTracker {
    dataset: Dataset,
    state: RunState,
}

impl RunTracker {
    const fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            state: RunState::Start,
        }
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal run transition {} -> {next}",
            self.state
        );
        log::debug!("{}: {} -> {next}", self.dataset, self.state);
        self.state = next;
    }
}

/// The ingestion pipeline: dataset client, batch writer, and store.
pub struct Pipeline {
    store: Arc<dyn TicketStore>,
    client: SocrataClient,
    writer: BatchWriter,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("client", &self.client)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assembles a pipeline from its parts.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, client: SocrataClient, writer: BatchWriter) -> Self {
        Self {
            store,
            client,
            writer,
        }
    }

    /// Connects to Postgres, ensures the schema, and builds the dataset
    /// client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the store is unreachable or the HTTP
    /// client cannot be built.
    pub async fn connect(config: &IngestConfig) -> Result<Self, IngestError> {
        let store = PgStore::connect(&config.database_url).await?;
        let client = SocrataClient::new(config.socrata.clone())?;
        Ok(Self::new(
            Arc::new(store),
            client,
            BatchWriter::new(config.batch_size),
        ))
    }

    /// The store this pipeline writes to.
    #[must_use]
    pub fn store(&self) -> &dyn TicketStore {
        self.store.as_ref()
    }

    /// Full pull of `dataset` ordered by source row id.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if a page fetch or store operation fails.
    pub async fn run_backfill(&self, dataset: Dataset) -> Result<SyncReport, IngestError> {
        self.run(dataset, RunKind::Backfill).await
    }

    /// Pull of the rows of `dataset` updated after its stored cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if a page fetch or store operation fails.
    pub async fn run_sync(&self, dataset: Dataset) -> Result<SyncReport, IngestError> {
        self.run(dataset, RunKind::Incremental).await
    }

    /// Stored ticket counts.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] if the query fails.
    pub async fn get_stats(&self) -> Result<StatsSummary, IngestError> {
        Ok(self.store.stats().await?)
    }

    /// Runs `dataset` once in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if a page fetch or store operation fails.
    /// Pages written before the failure stay written and the cursor does
    /// not move.
    pub async fn run(&self, dataset: Dataset, kind: RunKind) -> Result<SyncReport, IngestError> {
        let mut tracker = RunTracker::new(dataset);

        match self.execute(dataset, kind, &mut tracker).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let failed_in = tracker.state;
                tracker.transition(RunState::Failed);
                log::error!("{dataset}: {kind} run failed while {failed_in}: {e}");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        dataset: Dataset,
        kind: RunKind,
        tracker: &mut RunTracker,
    ) -> Result<SyncReport, IngestError> {
        let start = Instant::now();
        let cursor = self.store.read_cursor(dataset).await?;

        let mode = match kind {
            RunKind::Backfill => SyncMode::Backfill,
            RunKind::Incremental => SyncMode::Incremental { since: cursor },
        };

        log::info!(
            "{dataset}: {kind} of {} from cursor {}",
            dataset.name(),
            cursor.to_rfc3339()
        );

        let mut report = SyncReport {
            dataset,
            mode: kind,
            pages: 0,
            rows_fetched: 0,
            rows_used: 0,
            rows_rejected: 0,
            rows_changed: 0,
            watermark: None,
            cursor_advanced: false,
            duration: start.elapsed(),
        };

        tracker.transition(RunState::Fetching);
        let pages = self.client.pages(dataset, mode).into_stream();
        let mut pages = std::pin::pin!(pages);

        while let Some(page) = pages.try_next().await? {
            tracker.transition(RunState::Mapping);
            let mapped = mapping::map_page(dataset, &page);

            report.pages += 1;
            report.rows_fetched += page.len() as u64;
            report.rows_used += mapped.records.len() as u64;
            report.rows_rejected += mapped.rejected;
            report.watermark = match (report.watermark, mapped.max_updated_at) {
                (Some(max), Some(ts)) => Some(max.max(ts)),
                (max, ts) => max.or(ts),
            };

            tracker.transition(RunState::Writing);
            let changed = self.writer.write(self.store.as_ref(), &mapped.records).await?;
            report.rows_changed += changed;

            log::info!(
                "{dataset}: page {} mapped {}/{} rows, {changed} changed",
                report.pages,
                mapped.records.len(),
                page.len()
            );

            tracker.transition(RunState::Fetching);
        }

        if let Some(watermark) = advance_target(report.rows_used, report.watermark, cursor) {
            tracker.transition(RunState::Advancing);
            self.store.advance_cursor(dataset, watermark).await?;
            report.cursor_advanced = true;
        }

        tracker.transition(RunState::Done);
        report.duration = start.elapsed();

        log::info!(
            "{dataset}: {kind} complete: {} fetched, {} used, {} rejected, {} changed, cursor {} ({:.1}s)",
            report.rows_fetched,
            report.rows_used,
            report.rows_rejected,
            report.rows_changed,
            if report.cursor_advanced {
                report
                    .watermark
                    .map_or_else(String::new, |w| format!("advanced to {}", w.to_rfc3339()))
            } else {
                "unchanged".to_string()
            },
            report.duration.as_secs_f64()
        );

        Ok(report)
    }

    /// Runs every dataset in `datasets` one after another. A failing
    /// dataset is logged and recorded; the remaining datasets still run.
    pub async fn run_cycle(&self, datasets: &[Dataset], kind: RunKind) -> CycleReport {
        let mut cycle = CycleReport::default();

        log::info!(
            "Starting {kind} cycle over {} dataset(s): {}",
            datasets.len(),
            datasets
                .iter()
                .map(|d| d.id())
                .collect::<Vec<_>>()
                .join(", ")
        );

        for &dataset in datasets {
            match self.run(dataset, kind).await {
                Ok(report) => cycle.succeeded.push(report),
                Err(e) => {
                    log::warn!("{dataset}: skipped for this cycle: {e}");
                    cycle.failed.push(DatasetFailure {
                        dataset,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Cycle finished: {} ok, {} failed, {} fetched, {} changed",
            cycle.succeeded.len(),
            cycle.failed.len(),
            cycle.rows_fetched(),
            cycle.rows_changed()
        );

        cycle
    }
}

/// New cursor value for a finished run, if it should move: at least one
/// record was mapped and the maximum over every fetched row is strictly
/// past the current cursor.
fn advance_target(
    rows_used: u64,
    watermark: Option<DateTime<Utc>>,
    cursor: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if rows_used == 0 {
        return None;
    }
    watermark.filter(|w| *w > cursor)
}
