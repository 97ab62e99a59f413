//! Per-dataset descriptors: which fields to request and how each source
//! field maps onto the canonical [`TicketRecord`] columns.
//!
//! The datasets describe the same tickets with different column names,
//! and some concepts exist in only one of them. A `None` in a
//! [`FieldMapping`] means the dataset has no such column and the
//! canonical field is always left unset.
//!
//! [`TicketRecord`]: ticket_map_source_models::TicketRecord

use ticket_map_source_models::Dataset;

/// Socrata system field holding the stable row identifier.
pub const ROW_ID_FIELD: &str = ":id";
/// Socrata system field holding the row creation time.
pub const CREATED_AT_FIELD: &str = ":created_at";
/// Socrata system field holding the row update time.
pub const UPDATED_AT_FIELD: &str = ":updated_at";

/// Source column names for each canonical field.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    /// Natural key column. Rows without it are rejected.
    pub summons_number: &'static str,
    /// License plate.
    pub plate_id: Option<&'static str>,
    /// Plate registration state.
    pub registration_state: Option<&'static str>,
    /// Issue date, in any representation [`crate::parsing::parse_date`]
    /// understands.
    pub issue_date: Option<&'static str>,
    /// Violation time (`HHMMA` / `HH:MMP`).
    pub violation_time: Option<&'static str>,
    /// Numeric violation code.
    pub violation_code: Option<&'static str>,
    /// Violation description text.
    pub violation_description: Option<&'static str>,
    /// Street name.
    pub street_name: Option<&'static str>,
    /// House number.
    pub house_number: Option<&'static str>,
    /// Cross street.
    pub intersecting_street: Option<&'static str>,
    /// County code, normalized to a borough name.
    pub county: Option<&'static str>,
    /// Police precinct.
    pub precinct: Option<&'static str>,
    /// Fine amount.
    pub fine_amount: Option<&'static str>,
}

impl FieldMapping {
    /// Every source column this mapping reads, in canonical field order.
    #[must_use]
    pub fn source_fields(&self) -> Vec<&'static str> {
        let optional = [
            self.plate_id,
            self.registration_state,
            self.issue_date,
            self.violation_time,
            self.violation_code,
            self.violation_description,
            self.street_name,
            self.house_number,
            self.intersecting_street,
            self.county,
            self.precinct,
            self.fine_amount,
        ];
        std::iter::once(self.summons_number)
            .chain(optional.into_iter().flatten())
            .collect()
    }
}

/// Everything the pipeline needs to know about one external dataset.
#[derive(Debug)]
pub struct DatasetDescriptor {
    /// Dataset identity.
    pub dataset: Dataset,
    /// Ordered data columns to request (system fields are added by
    /// [`Self::select_clause`]).
    pub fields: &'static [&'static str],
    /// Column translation table.
    pub mapping: FieldMapping,
}

impl DatasetDescriptor {
    /// Builds the `$select` value: the data columns followed by the
    /// provenance system fields.
    #[must_use]
    pub fn select_clause(&self) -> String {
        self.fields
            .iter()
            .copied()
            .chain([ROW_ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD])
            .collect::<Vec<_>>()
            .join(",")
    }
}

static OPEN_PARKING_CAMERA_VIOLATIONS: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::OpenParkingCameraViolations,
    fields: &[
        "summons_number",
        "plate",
        "state",
        "issue_date",
        "violation_time",
        "violation",
        "fine_amount",
        "precinct",
        "county",
    ],
    mapping: FieldMapping {
        summons_number: "summons_number",
        plate_id: Some("plate"),
        registration_state: Some("state"),
        issue_date: Some("issue_date"),
        violation_time: Some("violation_time"),
        violation_code: None,
        violation_description: Some("violation"),
        street_name: None,
        house_number: None,
        intersecting_street: None,
        county: Some("county"),
        precinct: Some("precinct"),
        fine_amount: Some("fine_amount"),
    },
};

static PARKING_VIOLATIONS_FY2024: DatasetDescriptor = DatasetDescriptor {
    dataset: Dataset::ParkingViolationsFy2024,
    fields: &[
        "summons_number",
        "plate_id",
        "registration_state",
        "issue_date",
        "violation_code",
        "violation_time",
        "violation_county",
        "violation_precinct",
        "street_name",
        "house_number",
        "intersecting_street",
    ],
    mapping: FieldMapping {
        summons_number: "summons_number",
        plate_id: Some("plate_id"),
        registration_state: Some("registration_state"),
        issue_date: Some("issue_date"),
        violation_time: Some("violation_time"),
        violation_code: Some("violation_code"),
        violation_description: None,
        street_name: Some("street_name"),
        house_number: Some("house_number"),
        intersecting_street: Some("intersecting_street"),
        county: Some("violation_county"),
        precinct: Some("violation_precinct"),
        fine_amount: None,
    },
};

/// Returns the descriptor for a dataset.
#[must_use]
pub const fn descriptor(dataset: Dataset) -> &'static DatasetDescriptor {
    match dataset {
        Dataset::OpenParkingCameraViolations => &OPEN_PARKING_CAMERA_VIOLATIONS,
        Dataset::ParkingViolationsFy2024 => &PARKING_VIOLATIONS_FY2024,
    }
}
