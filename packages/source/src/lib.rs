#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Ticket dataset fetching and normalization.
//!
//! [`socrata::SocrataClient`] pages through a dataset in backfill or
//! incremental order, every request going through the retry loop in
//! [`retry`]. Each raw row is then translated into the canonical
//! [`ticket_map_source_models::TicketRecord`] by [`mapping::map_record`]
//! using the per-dataset tables in [`datasets`].

pub mod datasets;
pub mod mapping;
pub mod parsing;
pub mod retry;
pub mod socrata;

/// Errors that can occur while fetching from the dataset API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure (connect, timeout, reset, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Final request URL.
        url: String,
        /// Leading part of the response body.
        body: String,
    },

    /// The response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every attempt in the retry budget failed.
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error observed on the final attempt.
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns the HTTP status behind this error, looking through
    /// [`FetchError::Exhausted`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status(),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Json(_) => None,
        }
    }
}
