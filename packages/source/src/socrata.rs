//! Socrata SODA API page sequencer.
//!
//! Walks a dataset with `$limit`/`$offset` pagination in either backfill
//! order (`:id`) or incremental order (`:updated_at` after a watermark).
//! Pagination state lives in the [`PageSequencer`], so two sequencers for
//! the same dataset and mode request identical page boundaries.

use std::time::Duration;

use futures::Stream;
use ticket_map_source_models::{Dataset, RawRecord, SyncMode};

use crate::{
    FetchError,
    datasets::{self, ROW_ID_FIELD, UPDATED_AT_FIELD},
    retry::{self, RetryPolicy},
};

/// Public NYC Open Data host.
pub const DEFAULT_BASE_URL: &str = "https://data.cityofnewyork.us";

/// Format for the incremental `$where` bound. Socrata compares system
/// timestamps against floating timestamps with millisecond precision.
const WATERMARK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Connection and pacing settings for the dataset API.
#[derive(Debug, Clone)]
pub struct SocrataConfig {
    /// Scheme and host, without a trailing `/resource` path.
    pub base_url: String,
    /// Optional app token sent as `X-App-Token`.
    pub app_token: Option<String>,
    /// Rows per page.
    pub page_size: u64,
    /// Pause before requesting the page after a full page.
    pub page_delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry budget applied to every page request.
    pub retry: RetryPolicy,
}

impl Default for SocrataConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_token: None,
            page_size: 1000,
            page_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// HTTP client bound to one Socrata host.
#[derive(Debug, Clone)]
pub struct SocrataClient {
    http: reqwest::Client,
    config: SocrataConfig,
}

impl SocrataClient {
    /// Builds the underlying HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the TLS backend cannot be
    /// initialized.
    pub fn new(config: SocrataConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("ticket_map/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    /// JSON resource endpoint for a dataset.
    #[must_use]
    pub fn resource_url(&self, dataset: Dataset) -> String {
        format!(
            "{}/resource/{}.json",
            self.config.base_url.trim_end_matches('/'),
            dataset.id()
        )
    }

    /// Starts a fresh page sequence at offset zero.
    #[must_use]
    pub fn pages(&self, dataset: Dataset, mode: SyncMode) -> PageSequencer<'_> {
        PageSequencer {
            client: self,
            dataset,
            mode,
            url: self.resource_url(dataset),
            offset: 0,
            delay_pending: false,
            finished: false,
        }
    }
}

/// Lazy, finite sequence of raw-record pages for one dataset and mode.
#[derive(Debug)]
pub struct PageSequencer<'a> {
    client: &'a SocrataClient,
    dataset: Dataset,
    mode: SyncMode,
    url: String,
    offset: u64,
    delay_pending: bool,
    finished: bool,
}

impl<'a> PageSequencer<'a> {
    /// Offset the next request will use.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Query parameters for the page at the current offset.
    fn query(&self) -> Vec<(&'static str, String)> {
        let descriptor = datasets::descriptor(self.dataset);
        let mut query = vec![("$select", descriptor.select_clause())];

        match self.mode {
            SyncMode::Backfill => {
                query.push(("$order", ROW_ID_FIELD.to_string()));
            }
            SyncMode::Incremental { since } => {
                query.push((
                    "$where",
                    format!(
                        "{UPDATED_AT_FIELD} > '{}'",
                        since.format(WATERMARK_FORMAT)
                    ),
                ));
                query.push(("$order", format!("{UPDATED_AT_FIELD}, {ROW_ID_FIELD}")));
            }
        }

        query.push(("$limit", self.client.config.page_size.to_string()));
        query.push(("$offset", self.offset.to_string()));
        query
    }

    /// Fetches the next page.
    ///
    /// Returns `Ok(None)` once the sequence is exhausted: after a page
    /// shorter than the page size, or when a page comes back empty. A
    /// failed request leaves the offset unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the [`FetchError`] of the failing page.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawRecord>>, FetchError> {
        if self.finished {
            return Ok(None);
        }

        if self.delay_pending && !self.client.config.page_delay.is_zero() {
            tokio::time::sleep(self.client.config.page_delay).await;
        }
        self.delay_pending = false;

        let query = self.query();
        let config = &self.client.config;
        let rows: Vec<RawRecord> = retry::send_json(&config.retry, || {
            let request = self
                .client
                .http
                .get(&self.url)
                .query(&query)
                .header(reqwest::header::ACCEPT, "application/json");
            match &config.app_token {
                Some(token) => request.header("X-App-Token", token),
                None => request,
            }
        })
        .await?;

        let count = rows.len() as u64;
        log::info!(
            "{}: fetched {count} rows at offset {} ({})",
            self.dataset,
            self.offset,
            self.mode.label()
        );

        if count == 0 {
            self.finished = true;
            return Ok(None);
        }

        self.offset += count;
        if count < config.page_size {
            self.finished = true;
        } else {
            self.delay_pending = true;
        }

        Ok(Some(rows))
    }

    /// Converts the sequencer into a [`Stream`] of pages. The stream ends
    /// after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<RawRecord>, FetchError>> + 'a {
        futures::stream::try_unfold(self, |mut pages| async move {
            Ok(pages.next_page().await?.map(|page| (page, pages)))
        })
    }
}
