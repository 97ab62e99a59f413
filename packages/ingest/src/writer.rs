//! Deduplicating batch writer.

use std::collections::BTreeMap;

use ticket_map_database::{
    StoreError, TicketStore,
    queries::{PARAMS_PER_TICKET, PG_MAX_PARAMS},
};
use ticket_map_source_models::TicketRecord;

/// Largest batch one upsert statement can carry.
pub const MAX_BATCH_SIZE: usize = PG_MAX_PARAMS / PARAMS_PER_TICKET;

/// Splits records into fixed-size upserts, written one after another.
#[derive(Debug, Clone, Copy)]
pub struct BatchWriter {
    batch_size: usize,
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new(500)
    }
}

impl BatchWriter {
    /// Creates a writer; `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Effective batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes `records` and returns the number of rows actually changed.
    ///
    /// Keys repeated within `records` collapse to their last occurrence
    /// before chunking. Batches already written stay written if a later
    /// one fails.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] of the first failing batch.
    pub async fn write(
        &self,
        store: &dyn TicketStore,
        records: &[TicketRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let deduped = dedupe_last(records);
        if deduped.len() < records.len() {
            log::debug!(
                "Deduplicated write: {} -> {} records",
                records.len(),
                deduped.len()
            );
        }

        let mut changed = 0u64;
        for chunk in deduped.chunks(self.batch_size) {
            changed += store.upsert_tickets(chunk).await?;
        }

        Ok(changed)
    }
}

/// Keeps the last occurrence of each summons number, preserving the order
/// of those survivors.
fn dedupe_last(records: &[TicketRecord]) -> Vec<TicketRecord> {
    let mut last_seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        last_seen.insert(&record.summons_number, i);
    }

    records
        .iter()
        .enumerate()
        .filter(|(i, record)| last_seen.get(record.summons_number.as_str()) == Some(i))
        .map(|(_, record)| record.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use ticket_map_database::MemoryStore;
    use ticket_map_database_models::{CursorRow, StatsSummary};
    use ticket_map_source_models::Dataset;

    use super::*;

    /// Records every batch handed to the store.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        batches: Mutex<Vec<Vec<String>>>,
        fail_on_batch: Option<usize>,
    }

    #[async_trait]
    impl TicketStore for RecordingStore {
        async fn read_cursor(&self, dataset: Dataset) -> Result<DateTime<Utc>, StoreError> {
            self.inner.read_cursor(dataset).await
        }

        async fn advance_cursor(
            &self,
            dataset: Dataset,
            watermark: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.advance_cursor(dataset, watermark).await
        }

        async fn upsert_tickets(&self, records: &[TicketRecord]) -> Result<u64, StoreError> {
            let index = {
                let mut batches = self.batches.lock().unwrap();
                batches.push(records.iter().map(|r| r.summons_number.clone()).collect());
                batches.len() - 1
            };
            if self.fail_on_batch == Some(index) {
                return Err(StoreError::Conversion {
                    message: "injected failure".to_string(),
                });
            }
            self.inner.upsert_tickets(records).await
        }

        async fn stats(&self) -> Result<StatsSummary, StoreError> {
            self.inner.stats().await
        }

        async fn cursors(&self) -> Result<Vec<CursorRow>, StoreError> {
            self.inner.cursors().await
        }
    }

    fn ticket(key: &str, plate: &str) -> TicketRecord {
        let mut record = TicketRecord::new(key.to_string(), Dataset::OpenParkingCameraViolations);
        record.plate_id = Some(plate.to_string());
        record
    }

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(BatchWriter::new(0).batch_size(), 1);
        assert_eq!(BatchWriter::new(100_000).batch_size(), MAX_BATCH_SIZE);
        assert_eq!(BatchWriter::default().batch_size(), 500);
        assert!(MAX_BATCH_SIZE * PARAMS_PER_TICKET <= PG_MAX_PARAMS);
    }

    #[test]
    fn dedupe_keeps_last_occurrence() {
        let records = vec![ticket("1", "A"), ticket("2", "B"), ticket("1", "C")];
        let deduped = dedupe_last(&records);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].summons_number, "2");
        assert_eq!(deduped[1].summons_number, "1");
        assert_eq!(deduped[1].plate_id.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn writes_sequential_fixed_size_batches() {
        let store = RecordingStore::default();
        let records: Vec<_> = (0..5).map(|i| ticket(&i.to_string(), "P")).collect();

        let changed = BatchWriter::new(2).write(&store, &records).await.unwrap();

        assert_eq!(changed, 5);
        assert_eq!(
            *store.batches.lock().unwrap(),
            vec![
                vec!["0".to_string(), "1".to_string()],
                vec!["2".to_string(), "3".to_string()],
                vec!["4".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn second_identical_write_changes_nothing() {
        let store = MemoryStore::new();
        let writer = BatchWriter::new(2);
        let records: Vec<_> = (0..3).map(|i| ticket(&i.to_string(), "P")).collect();

        assert_eq!(writer.write(&store, &records).await.unwrap(), 3);
        assert_eq!(writer.write(&store, &records).await.unwrap(), 0);
        assert_eq!(store.ticket_count().await, 3);
    }

    #[tokio::test]
    async fn duplicate_keys_count_once() {
        let store = MemoryStore::new();
        let records = vec![ticket("1", "A"), ticket("1", "A"), ticket("1", "B")];

        assert_eq!(BatchWriter::default().write(&store, &records).await.unwrap(), 1);
        assert_eq!(
            store.ticket("1").await.unwrap().plate_id.as_deref(),
            Some("B")
        );
    }

    #[tokio::test]
    async fn failed_batch_keeps_earlier_batches() {
        let store = RecordingStore {
            fail_on_batch: Some(1),
            ..RecordingStore::default()
        };
        let records: Vec<_> = (0..4).map(|i| ticket(&i.to_string(), "P")).collect();

        let result = BatchWriter::new(2).write(&store, &records).await;

        assert!(matches!(result, Err(StoreError::Conversion { .. })));
        assert_eq!(store.inner.ticket_count().await, 2);
        assert_eq!(store.batches.lock().unwrap().len(), 2);
    }
}
