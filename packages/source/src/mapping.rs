//! Row mapper: raw dataset rows to canonical [`TicketRecord`]s.

use chrono::{DateTime, Utc};
use ticket_map_source_models::{Dataset, RawRecord, TicketRecord};

use crate::{
    datasets::{self, CREATED_AT_FIELD, ROW_ID_FIELD, UPDATED_AT_FIELD},
    parsing,
};

/// Why a raw row produced no canonical record.
///
/// Rejections are expected per-row outcomes, counted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingRejection {
    /// The natural key column is absent, null, or blank.
    MissingSummonsNumber,
}

/// Result of mapping one page.
#[derive(Debug, Default)]
pub struct MappedPage {
    /// Records that passed mapping, in page order.
    pub records: Vec<TicketRecord>,
    /// Number of rows rejected.
    pub rejected: u64,
    /// Latest `:updated_at` across every row of the page, rejected rows
    /// included.
    pub max_updated_at: Option<DateTime<Utc>>,
}

/// Maps one raw row into the canonical format.
///
/// Only a missing natural key rejects the row. Any other missing or
/// unparseable value leaves its canonical field unset.
///
/// # Errors
///
/// * [`MappingRejection::MissingSummonsNumber`] if the key is absent or
///   blank
pub fn map_record(dataset: Dataset, raw: &RawRecord) -> Result<TicketRecord, MappingRejection> {
    let mapping = &datasets::descriptor(dataset).mapping;

    let summons_number = parsing::get_text(raw, mapping.summons_number)
        .ok_or(MappingRejection::MissingSummonsNumber)?;

    let text = |field: Option<&str>| field.and_then(|f| parsing::get_text(raw, f));
    let value = |field: Option<&str>| field.and_then(|f| parsing::get_value(raw, f));

    let mut record = TicketRecord::new(summons_number, dataset);
    record.plate_id = text(mapping.plate_id);
    record.registration_state = text(mapping.registration_state);
    record.issue_date = text(mapping.issue_date).and_then(|s| parsing::parse_date(&s));
    record.violation_time =
        text(mapping.violation_time).and_then(|s| parsing::parse_violation_time(&s));
    record.violation_code = value(mapping.violation_code).and_then(parsing::parse_i32);
    record.violation_description = text(mapping.violation_description);
    record.street_name = text(mapping.street_name);
    record.house_number = text(mapping.house_number);
    record.intersecting_street = text(mapping.intersecting_street);
    record.borough = text(mapping.county)
        .and_then(|s| parsing::normalize_borough(&s))
        .map(str::to_string);
    record.precinct = value(mapping.precinct)
        .and_then(parsing::parse_i32)
        .filter(|p| *p != 0);
    record.fine_amount = value(mapping.fine_amount).and_then(parsing::parse_f64);
    record.source_row_id = parsing::get_text(raw, ROW_ID_FIELD);
    record.source_created_at =
        parsing::get_text(raw, CREATED_AT_FIELD).and_then(|s| parsing::parse_timestamp(&s));
    record.source_updated_at =
        parsing::get_text(raw, UPDATED_AT_FIELD).and_then(|s| parsing::parse_timestamp(&s));

    Ok(record)
}

/// Maps every row of a page, counting rejections.
#[must_use]
pub fn map_page(dataset: Dataset, rows: &[RawRecord]) -> MappedPage {
    let mut page = MappedPage {
        records: Vec::with_capacity(rows.len()),
        rejected: 0,
        max_updated_at: None,
    };

    for raw in rows {
        if let Some(ts) =
            parsing::get_text(raw, UPDATED_AT_FIELD).and_then(|s| parsing::parse_timestamp(&s))
        {
            page.max_updated_at = Some(page.max_updated_at.map_or(ts, |max| max.max(ts)));
        }

        match map_record(dataset, raw) {
            Ok(record) => page.records.push(record),
            Err(rejection) => {
                log::debug!("{dataset}: skipping row ({rejection:?})");
                page.rejected += 1;
            }
        }
    }

    page
}
