#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset identities and the canonical normalized ticket format.
//!
//! Every supported external dataset produces [`TicketRecord`]s that are
//! independent of the source schema. Records are unique by their
//! `summons_number` across all datasets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// One raw row as returned by the dataset API: field name to untyped value.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// The supported external datasets, keyed by their stable Socrata id.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Dataset {
    /// Open Parking and Camera Violations (rolling, all fiscal years).
    #[serde(rename = "nc67-uf89")]
    #[strum(serialize = "nc67-uf89")]
    OpenParkingCameraViolations,
    /// Parking Violations Issued, Fiscal Year 2024.
    #[serde(rename = "pvqr-7yc4")]
    #[strum(serialize = "pvqr-7yc4")]
    ParkingViolationsFy2024,
}

impl Dataset {
    /// Every supported dataset, in the order cycles process them.
    pub const ALL: &[Self] = &[
        Self::OpenParkingCameraViolations,
        Self::ParkingViolationsFy2024,
    ];

    /// Returns the stable external id (e.g. `"nc67-uf89"`).
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::OpenParkingCameraViolations => "nc67-uf89",
            Self::ParkingViolationsFy2024 => "pvqr-7yc4",
        }
    }

    /// Returns the human-readable dataset name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenParkingCameraViolations => "Open Parking and Camera Violations",
            Self::ParkingViolationsFy2024 => "Parking Violations Issued - Fiscal Year 2024",
        }
    }
}

/// How a run walks the source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// Full historical pull ordered by the stable source row id.
    Backfill,
    /// Rows whose source update timestamp is strictly after `since`,
    /// ordered by that timestamp.
    Incremental {
        /// Exclusive lower bound on the source update timestamp.
        since: DateTime<Utc>,
    },
}

impl SyncMode {
    /// Short label for log lines.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Backfill => "backfill",
            Self::Incremental { .. } => "incremental",
        }
    }
}

/// A parking ticket normalized to the canonical schema.
///
/// Only `summons_number` and `source_dataset` are guaranteed. Concepts a
/// dataset does not expose are left `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    /// Natural key shared by every dataset that reports this ticket.
    pub summons_number: String,
    /// Dataset this version of the record came from.
    pub source_dataset: Dataset,
    /// License plate.
    pub plate_id: Option<String>,
    /// Plate registration state (e.g. `"NY"`).
    pub registration_state: Option<String>,
    /// Calendar date the ticket was issued.
    pub issue_date: Option<NaiveDate>,
    /// Time of day the violation was recorded, `HH:MM` (24-hour).
    pub violation_time: Option<String>,
    /// Numeric violation code.
    pub violation_code: Option<i32>,
    /// Violation description text.
    pub violation_description: Option<String>,
    /// Street the vehicle was parked on.
    pub street_name: Option<String>,
    /// House number on `street_name`.
    pub house_number: Option<String>,
    /// Nearest cross street.
    pub intersecting_street: Option<String>,
    /// Borough name (e.g. `"Brooklyn"`).
    pub borough: Option<String>,
    /// Police precinct number.
    pub precinct: Option<i32>,
    /// Fine amount in dollars.
    pub fine_amount: Option<f64>,
    /// Source-side row identifier (`:id`).
    pub source_row_id: Option<String>,
    /// Source-reported creation time (`:created_at`).
    pub source_created_at: Option<DateTime<Utc>>,
    /// Source-reported update time (`:updated_at`).
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl TicketRecord {
    /// Creates a record with only the key and source tag set.
    #[must_use]
    pub const fn new(summons_number: String, source_dataset: Dataset) -> Self {
        Self {
            summons_number,
            source_dataset,
            plate_id: None,
            registration_state: None,
            issue_date: None,
            violation_time: None,
            violation_code: None,
            violation_description: None,
            street_name: None,
            house_number: None,
            intersecting_street: None,
            borough: None,
            precinct: None,
            fine_amount: None,
            source_row_id: None,
            source_created_at: None,
            source_updated_at: None,
        }
    }
}
