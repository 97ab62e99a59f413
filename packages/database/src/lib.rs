#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Ticket and sync cursor persistence.
//!
//! [`TicketStore`] is the seam the ingestion pipeline writes through.
//! [`db::PgStore`] implements it on `PostGIS` via `switchy_database` raw
//! SQL; [`memory::MemoryStore`] implements the same contract in process.

pub mod db;
pub mod memory;
pub mod queries;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ticket_map_database_models::{CursorRow, StatsSummary};
use ticket_map_source_models::{Dataset, TicketRecord};

pub use db::PgStore;
pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or constraint failure reported by the database.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Could not open a connection.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Persistence contract for tickets and per-dataset sync cursors.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Returns the dataset's watermark, creating it at the epoch if it
    /// does not exist yet. Concurrent first calls must not fail or create
    /// duplicate cursors.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cursor cannot be read or created.
    async fn read_cursor(&self, dataset: Dataset) -> Result<DateTime<Utc>, StoreError>;

    /// Sets the dataset's watermark unconditionally and stamps the
    /// last-write time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn advance_cursor(
        &self,
        dataset: Dataset,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Upserts one batch keyed on `summons_number`.
    ///
    /// Existing rows are overwritten only when the incoming
    /// `source_updated_at` differs from the stored one. Returns the number
    /// of rows inserted or changed. Callers must not pass the same key
    /// twice in one batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch fails. The batch is atomic.
    async fn upsert_tickets(&self, records: &[TicketRecord]) -> Result<u64, StoreError>;

    /// Counts stored tickets in total and per dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn stats(&self) -> Result<StatsSummary, StoreError>;

    /// Lists every sync cursor, ordered by dataset id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn cursors(&self) -> Result<Vec<CursorRow>, StoreError>;
}
