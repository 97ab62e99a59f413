//! In-process [`TicketStore`] with the same upsert and cursor semantics
//! as the Postgres store. Used by tests and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ticket_map_database_models::{CursorRow, StatsSummary};
use ticket_map_source_models::{Dataset, TicketRecord};
use tokio::sync::Mutex;

use crate::{StoreError, TicketStore};

#[derive(Debug, Default)]
struct State {
    tickets: BTreeMap<String, TicketRecord>,
    cursors: BTreeMap<String, CursorRow>,
}

/// Ticket store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored ticket for `summons_number`.
    pub async fn ticket(&self, summons_number: &str) -> Option<TicketRecord> {
        self.state.lock().await.tickets.get(summons_number).cloned()
    }

    /// Number of stored tickets.
    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn read_cursor(&self, dataset: Dataset) -> Result<DateTime<Utc>, StoreError> {
        let mut state = self.state.lock().await;
        let cursor = state
            .cursors
            .entry(dataset.id().to_string())
            .or_insert_with(|| CursorRow::initial(dataset, Utc::now()));
        Ok(cursor.last_updated_at)
    }

    async fn advance_cursor(
        &self,
        dataset: Dataset,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let cursor = state
            .cursors
            .entry(dataset.id().to_string())
            .or_insert_with(|| CursorRow::initial(dataset, now));
        cursor.last_updated_at = watermark;
        cursor.updated_at = now;
        Ok(())
    }

    async fn upsert_tickets(&self, records: &[TicketRecord]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = 0u64;

        for record in records {
            match state.tickets.get_mut(&record.summons_number) {
                Some(existing) if existing.source_updated_at == record.source_updated_at => {}
                Some(existing) => {
                    *existing = record.clone();
                    changed += 1;
                }
                None => {
                    state
                        .tickets
                        .insert(record.summons_number.clone(), record.clone());
                    changed += 1;
                }
            }
        }

        Ok(changed)
    }

    async fn stats(&self) -> Result<StatsSummary, StoreError> {
        let state = self.state.lock().await;
        let mut stats = StatsSummary::default();
        for record in state.tickets.values() {
            stats.total += 1;
            *stats
                .per_dataset
                .entry(record.source_dataset.id().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn cursors(&self) -> Result<Vec<CursorRow>, StoreError> {
        Ok(self.state.lock().await.cursors.values().cloned().collect())
    }
}
