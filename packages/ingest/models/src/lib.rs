#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion run states and result types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use ticket_map_source_models::Dataset;

/// Which kind of run to perform on a dataset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunKind {
    /// Full pull ordered by the source row id.
    Backfill,
    /// Rows updated after the stored cursor.
    Incremental,
}

/// Phase of a single dataset run.
///
/// `Start → Fetching → Mapping → Writing → (Fetching ...) → Advancing →
/// Done`, with `Failed` reachable from every state except `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Cursor read, nothing fetched yet.
    Start,
    /// Waiting on a page from the API.
    Fetching,
    /// Translating a page into canonical records.
    Mapping,
    /// Upserting a page's records.
    Writing,
    /// Persisting the new watermark.
    Advancing,
    /// Finished successfully.
    Done,
    /// Aborted by an error.
    Failed,
}

impl RunState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Done | Self::Failed, _) => false,
            (_, Self::Failed)
            | (Self::Start | Self::Writing, Self::Fetching)
            | (Self::Fetching, Self::Mapping | Self::Advancing | Self::Done)
            | (Self::Mapping, Self::Writing)
            | (Self::Advancing, Self::Done) => true,
            _ => false,
        }
    }
}

/// Outcome of one successful dataset run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Dataset that was synced.
    pub dataset: Dataset,
    /// How the dataset was walked.
    pub mode: RunKind,
    /// Non-empty pages processed.
    pub pages: u64,
    /// Raw rows returned by the API.
    pub rows_fetched: u64,
    /// Rows that mapped to canonical records.
    pub rows_used: u64,
    /// Rows rejected by the mapper.
    pub rows_rejected: u64,
    /// Rows inserted or changed in the store.
    pub rows_changed: u64,
    /// Largest source update timestamp seen across all fetched rows.
    pub watermark: Option<DateTime<Utc>>,
    /// Whether the stored cursor moved.
    pub cursor_advanced: bool,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

/// A dataset whose run failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetFailure {
    /// Dataset that failed.
    pub dataset: Dataset,
    /// Rendered error.
    pub error: String,
}

/// Outcome of one pass over several datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Reports of the runs that succeeded, in execution order.
    pub succeeded: Vec<SyncReport>,
    /// Runs that failed, in execution order.
    pub failed: Vec<DatasetFailure>,
}

impl CycleReport {
    /// Raw rows fetched across all successful runs.
    #[must_use]
    pub fn rows_fetched(&self) -> u64 {
        self.succeeded.iter().map(|r| r.rows_fetched).sum()
    }

    /// Rows changed across all successful runs.
    #[must_use]
    pub fn rows_changed(&self) -> u64 {
        self.succeeded.iter().map(|r| r.rows_changed).sum()
    }

    /// Whether every dataset in the cycle succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            RunState::Start,
            RunState::Fetching,
            RunState::Mapping,
            RunState::Writing,
            RunState::Fetching,
            RunState::Advancing,
            RunState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn failed_is_reachable_until_done() {
        for state in [
            RunState::Start,
            RunState::Fetching,
            RunState::Mapping,
            RunState::Writing,
            RunState::Advancing,
        ] {
            assert!(state.can_transition_to(RunState::Failed));
        }
        assert!(!RunState::Done.can_transition_to(RunState::Failed));
        assert!(!RunState::Failed.can_transition_to(RunState::Fetching));
    }

    #[test]
    fn skipping_states_is_illegal() {
        assert!(!RunState::Start.can_transition_to(RunState::Writing));
        assert!(!RunState::Mapping.can_transition_to(RunState::Advancing));
        assert!(!RunState::Writing.can_transition_to(RunState::Done));
    }

    #[test]
    fn run_state_displays_screaming_snake_case() {
        assert_eq!(RunState::Advancing.to_string(), "ADVANCING");
        assert_eq!(
            serde_json::to_string(&RunState::Fetching).unwrap(),
            "\"FETCHING\""
        );
    }

    #[test]
    fn run_kind_parses_from_cli_text() {
        assert_eq!("incremental".parse::<RunKind>().unwrap(), RunKind::Incremental);
        assert_eq!(RunKind::Backfill.to_string(), "backfill");
        assert!("full".parse::<RunKind>().is_err());
    }

    #[test]
    fn cycle_totals_sum_successful_runs() {
        let report = |rows_fetched, rows_changed| SyncReport {
            dataset: Dataset::OpenParkingCameraViolations,
            mode: RunKind::Backfill,
            pages: 1,
            rows_fetched,
            rows_used: rows_fetched,
            rows_rejected: 0,
            rows_changed,
            watermark: None,
            cursor_advanced: false,
            duration: Duration::from_secs(1),
        };

        let cycle = CycleReport {
            succeeded: vec![report(10, 4), report(5, 5)],
            failed: vec![DatasetFailure {
                dataset: Dataset::ParkingViolationsFy2024,
                error: "boom".to_string(),
            }],
        };

        assert_eq!(cycle.rows_fetched(), 15);
        assert_eq!(cycle.rows_changed(), 9);
        assert!(!cycle.is_clean());
    }
}
