//! Raw SQL for the ticket and cursor tables.
//!
//! All statements go through `query_raw_params()` / `exec_raw_params()`
//! with positional `$n` parameters.

use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use ticket_map_database_models::{CursorRow, EPOCH_WATERMARK, StatsSummary};
use ticket_map_source_models::{Dataset, TicketRecord};

use crate::StoreError;

/// Postgres bind parameter limit per statement.
pub const PG_MAX_PARAMS: usize = 65_535;

/// Ticket columns in bind order, with the cast applied to each
/// placeholder. The first column is the conflict key.
const TICKET_COLUMNS: &[(&str, &str)] = &[
    ("summons_number", ""),
    ("source_dataset", ""),
    ("plate_id", ""),
    ("registration_state", ""),
    ("issue_date", "::text::date"),
    ("violation_time", ""),
    ("violation_code", ""),
    ("violation_description", ""),
    ("street_name", ""),
    ("house_number", ""),
    ("intersecting_street", ""),
    ("borough", ""),
    ("precinct", ""),
    ("fine_amount", ""),
    ("source_row_id", ""),
    ("source_created_at", ""),
    ("source_updated_at", ""),
];

/// Bind parameters used by one ticket row.
pub const PARAMS_PER_TICKET: usize = TICKET_COLUMNS.len();

const SCHEMA: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS postgis",
    "CREATE TABLE IF NOT EXISTS tickets (
        summons_number TEXT PRIMARY KEY,
        source_dataset TEXT NOT NULL,
        plate_id TEXT,
        registration_state TEXT,
        issue_date DATE,
        violation_time TEXT,
        violation_code INTEGER,
        violation_description TEXT,
        street_name TEXT,
        house_number TEXT,
        intersecting_street TEXT,
        borough TEXT,
        precinct INTEGER,
        fine_amount DOUBLE PRECISION,
        source_row_id TEXT,
        source_created_at TIMESTAMP,
        source_updated_at TIMESTAMP,
        location geography(Point, 4326),
        ingested_at TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'UTC')
    )",
    "CREATE INDEX IF NOT EXISTS idx_tickets_source_dataset ON tickets (source_dataset)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_issue_date ON tickets (issue_date)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_location ON tickets USING GIST (location)",
    "CREATE TABLE IF NOT EXISTS sync_cursors (
        dataset_id TEXT PRIMARY KEY,
        last_updated_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )",
];

/// Creates the `PostGIS` extension, tables, and indexes if missing.
///
/// # Errors
///
/// Returns [`StoreError`] if any statement fails.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), StoreError> {
    for statement in SCHEMA {
        db.exec_raw(statement).await?;
    }
    log::debug!("Schema ensured ({} statements)", SCHEMA.len());
    Ok(())
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

fn text(value: Option<&String>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |s| DatabaseValue::String(s.clone()))
}

fn timestamp(value: Option<DateTime<Utc>>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |dt| {
        DatabaseValue::DateTime(dt.naive_utc())
    })
}

/// Creates an epoch cursor unless the dataset already has one.
pub const CREATE_CURSOR_SQL: &str = "INSERT INTO sync_cursors (dataset_id, last_updated_at, updated_at)
     VALUES ($1, $2, NOW() AT TIME ZONE 'UTC')
     ON CONFLICT (dataset_id) DO NOTHING";

pub const READ_CURSOR_SQL: &str = "SELECT last_updated_at FROM sync_cursors WHERE dataset_id = $1";

/// Sets the watermark, creating the row if needed.
pub const ADVANCE_CURSOR_SQL: &str = "INSERT INTO sync_cursors (dataset_id, last_updated_at, updated_at)
     VALUES ($1, $2, NOW() AT TIME ZONE 'UTC')
     ON CONFLICT (dataset_id) DO UPDATE SET
        last_updated_at = EXCLUDED.last_updated_at,
        updated_at = EXCLUDED.updated_at";

/// Returns the stored watermark, inserting an epoch cursor first if the
/// dataset has none. The insert is conflict-safe.
///
/// # Errors
///
/// Returns [`StoreError`] if either statement fails.
pub async fn read_cursor(db: &dyn Database, dataset: Dataset) -> Result<DateTime<Utc>, StoreError> {
    db.exec_raw_params(
        CREATE_CURSOR_SQL,
        &[
            DatabaseValue::String(dataset.id().to_string()),
            DatabaseValue::DateTime(EPOCH_WATERMARK.naive_utc()),
        ],
    )
    .await?;

    let rows = db
        .query_raw_params(
            READ_CURSOR_SQL,
            &[DatabaseValue::String(dataset.id().to_string())],
        )
        .await?;

    let row = rows.first().ok_or_else(|| StoreError::Conversion {
        message: format!("cursor for {dataset} missing after insert"),
    })?;

    let naive: NaiveDateTime =
        row.to_value("last_updated_at")
            .map_err(|e| StoreError::Conversion {
                message: format!("Failed to read last_updated_at: {e}"),
            })?;

    Ok(to_utc(naive))
}

/// Upserts the dataset's watermark and stamps `updated_at`.
///
/// # Errors
///
/// Returns [`StoreError`] if the statement fails.
pub async fn advance_cursor(
    db: &dyn Database,
    dataset: Dataset,
    watermark: DateTime<Utc>,
) -> Result<(), StoreError> {
    db.exec_raw_params(
        ADVANCE_CURSOR_SQL,
        &[
            DatabaseValue::String(dataset.id().to_string()),
            DatabaseValue::DateTime(watermark.naive_utc()),
        ],
    )
    .await?;

    Ok(())
}

/// Returns every cursor row, ordered by dataset id.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails or a row cannot be decoded.
pub async fn list_cursors(db: &dyn Database) -> Result<Vec<CursorRow>, StoreError> {
    let rows = db
        .query_raw_params(
            "SELECT dataset_id, last_updated_at, updated_at
             FROM sync_cursors ORDER BY dataset_id",
            &[],
        )
        .await?;

    let mut cursors = Vec::with_capacity(rows.len());
    for row in &rows {
        let dataset_id: String = row.to_value("dataset_id").map_err(|e| StoreError::Conversion {
            message: format!("Failed to read dataset_id: {e}"),
        })?;
        let last_updated_at: NaiveDateTime =
            row.to_value("last_updated_at")
                .map_err(|e| StoreError::Conversion {
                    message: format!("Failed to read last_updated_at: {e}"),
                })?;
        let updated_at: NaiveDateTime = row.to_value("updated_at").map_err(|e| StoreError::Conversion {
            message: format!("Failed to read updated_at: {e}"),
        })?;

        cursors.push(CursorRow {
            dataset_id,
            last_updated_at: to_utc(last_updated_at),
            updated_at: to_utc(updated_at),
        });
    }

    Ok(cursors)
}

/// Builds the multi-row upsert for `rows` tickets.
///
/// On conflict every non-key column is overwritten, but only when the
/// stored `source_updated_at` differs from the incoming one, so replaying
/// an unchanged record affects zero rows.
#[must_use]
pub fn upsert_tickets_sql(rows: usize) -> String {
    let columns = TICKET_COLUMNS
        .iter()
        .map(|(column, _)| *column)
        .collect::<Vec<_>>()
        .join(", ");

    let mut idx = 1usize;
    let values = (0..rows)
        .map(|_| {
            let placeholders = TICKET_COLUMNS
                .iter()
                .map(|(_, cast)| {
                    let placeholder = format!("${idx}{cast}");
                    idx += 1;
                    placeholder
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let updates = TICKET_COLUMNS
        .iter()
        .skip(1)
        .map(|(column, _)| format!("{column} = EXCLUDED.{column}"))
        .collect::<Vec<_>>()
        .join(",\n            ");

    format!(
        "INSERT INTO tickets ({columns}) VALUES {values}
         ON CONFLICT (summons_number) DO UPDATE SET
            {updates},
            ingested_at = NOW() AT TIME ZONE 'UTC'
         WHERE tickets.source_updated_at IS DISTINCT FROM EXCLUDED.source_updated_at"
    )
}

/// Bind values for one ticket, in [`TICKET_COLUMNS`] order.
fn ticket_params(record: &TicketRecord) -> [DatabaseValue; PARAMS_PER_TICKET] {
    [
        DatabaseValue::String(record.summons_number.clone()),
        DatabaseValue::String(record.source_dataset.id().to_string()),
        text(record.plate_id.as_ref()),
        text(record.registration_state.as_ref()),
        record.issue_date.map_or(DatabaseValue::Null, |d| {
            DatabaseValue::String(d.format("%Y-%m-%d").to_string())
        }),
        text(record.violation_time.as_ref()),
        record
            .violation_code
            .map_or(DatabaseValue::Null, DatabaseValue::Int32),
        text(record.violation_description.as_ref()),
        text(record.street_name.as_ref()),
        text(record.house_number.as_ref()),
        text(record.intersecting_street.as_ref()),
        text(record.borough.as_ref()),
        record.precinct.map_or(DatabaseValue::Null, DatabaseValue::Int32),
        record
            .fine_amount
            .map_or(DatabaseValue::Null, DatabaseValue::Real64),
        text(record.source_row_id.as_ref()),
        timestamp(record.source_created_at),
        timestamp(record.source_updated_at),
    ]
}

/// Upserts one batch of tickets in a single statement and returns the
/// number of rows inserted or changed.
///
/// # Errors
///
/// Returns [`StoreError::Conversion`] if the batch exceeds the bind
/// parameter limit, or [`StoreError::Database`] if the statement fails.
pub async fn upsert_tickets(db: &dyn Database, records: &[TicketRecord]) -> Result<u64, StoreError> {
    if records.is_empty() {
        return Ok(0);
    }

    if records.len() * PARAMS_PER_TICKET > PG_MAX_PARAMS {
        return Err(StoreError::Conversion {
            message: format!(
                "batch of {} tickets exceeds {PG_MAX_PARAMS} bind parameters",
                records.len()
            ),
        });
    }

    let sql = upsert_tickets_sql(records.len());
    let params: Vec<DatabaseValue> = records.iter().flat_map(ticket_params).collect();

    Ok(db.exec_raw_params(&sql, &params).await?)
}

/// Counts tickets in total and per source dataset.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails or a row cannot be decoded.
pub async fn get_stats(db: &dyn Database) -> Result<StatsSummary, StoreError> {
    let rows = db
        .query_raw_params(
            "SELECT source_dataset, COUNT(*) AS count
             FROM tickets GROUP BY source_dataset ORDER BY source_dataset",
            &[],
        )
        .await?;

    let mut stats = StatsSummary::default();
    for row in &rows {
        let dataset: String = row.to_value("source_dataset").map_err(|e| StoreError::Conversion {
            message: format!("Failed to read source_dataset: {e}"),
        })?;
        let count: i64 = row.to_value("count").map_err(|e| StoreError::Conversion {
            message: format!("Failed to read count: {e}"),
        })?;
        let count = u64::try_from(count).unwrap_or(0);

        stats.total += count;
        stats.per_dataset.insert(dataset, count);
    }

    Ok(stats)
}
