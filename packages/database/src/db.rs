//! Postgres connection and the [`TicketStore`] implementation on top of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use switchy_database::Database;
use switchy_database_connection::Credentials;
use ticket_map_database_models::{CursorRow, StatsSummary};
use ticket_map_source_models::{Dataset, TicketRecord};

use crate::{StoreError, TicketStore, queries};

/// Opens a Postgres connection from a `postgres://` URL.
///
/// Configures a 120-second `statement_timeout` so a stalled upsert fails
/// instead of hanging the run.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the URL cannot be parsed or the
/// connection fails.
pub async fn connect(url: &str) -> Result<Box<dyn Database>, StoreError> {
    // The credentials parser rejects query parameters such as
    // `?sslmode=require`; TLS is negotiated by the connector.
    let url_base = url.split('?').next().unwrap_or(url);

    let creds = Credentials::from_url(url_base).map_err(|e| StoreError::Connection {
        message: e.to_string(),
    })?;
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| StoreError::Connection {
            message: e.to_string(),
        })?;

    db.exec_raw("SET statement_timeout = '120s'").await?;

    Ok(db)
}

/// `PostGIS`-backed ticket store. Owns its connection; dropping the store
/// closes it.
pub struct PgStore {
    db: Box<dyn Database>,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore").finish_non_exhaustive()
    }
}

impl PgStore {
    /// Connects and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or any schema statement
    /// fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let db = connect(url).await?;
        queries::ensure_schema(db.as_ref()).await?;
        log::info!("Connected to ticket store");
        Ok(Self { db })
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn read_cursor(&self, dataset: Dataset) -> Result<DateTime<Utc>, StoreError> {
        queries::read_cursor(self.db.as_ref(), dataset).await
    }

    async fn advance_cursor(
        &self,
        dataset: Dataset,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        queries::advance_cursor(self.db.as_ref(), dataset, watermark).await
    }

    async fn upsert_tickets(&self, records: &[TicketRecord]) -> Result<u64, StoreError> {
        queries::upsert_tickets(self.db.as_ref(), records).await
    }

    async fn stats(&self) -> Result<StatsSummary, StoreError> {
        queries::get_stats(self.db.as_ref()).await
    }

    async fn cursors(&self) -> Result<Vec<CursorRow>, StoreError> {
        queries::list_cursors(self.db.as_ref()).await
    }
}
