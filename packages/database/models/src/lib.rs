#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database row types.
//!
//! These are the shapes of the sync state and the aggregates read back
//! from the store. The tickets themselves are stored as
//! [`ticket_map_source_models::TicketRecord`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ticket_map_source_models::Dataset;

/// Watermark assigned to a dataset that has never been synced.
pub const EPOCH_WATERMARK: DateTime<Utc> = DateTime::UNIX_EPOCH;

/// One `sync_cursors` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRow {
    /// Dataset this cursor tracks.
    pub dataset_id: String,
    /// Largest source update timestamp successfully processed.
    pub last_updated_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl CursorRow {
    /// A freshly created cursor at the epoch watermark.
    #[must_use]
    pub fn initial(dataset: Dataset, now: DateTime<Utc>) -> Self {
        Self {
            dataset_id: dataset.id().to_string(),
            last_updated_at: EPOCH_WATERMARK,
            updated_at: now,
        }
    }
}

/// Row counts across the ticket table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    /// Total stored tickets.
    pub total: u64,
    /// Stored tickets keyed by the dataset that last wrote them.
    pub per_dataset: BTreeMap<String, u64>,
}

impl StatsSummary {
    /// Number of tickets last written by `dataset`.
    #[must_use]
    pub fn count_for(&self, dataset: Dataset) -> u64 {
        self.per_dataset.get(dataset.id()).copied().unwrap_or(0)
    }
}
