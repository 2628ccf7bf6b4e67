//! Socrata SODA API incident source.
//!
//! Fetches a time window of a Socrata dataset using `$where`, `$order`,
//! `$limit`, and `$offset`, paging until the feed runs dry or the record
//! cap is reached. The whole fetch, retries included, is bounded by a
//! single timeout.

use std::time::Duration;

use async_trait::async_trait;
use crime_radius_incident_models::IncidentRecord;

use crate::feed::FeedDefinition;
use crate::parsing::{format_socrata_date, records_from_page};
use crate::{FetchError, FetchOptions, IncidentSource, retry};

/// Default time budget for a full windowed fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request timeout inside a fetch.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// A Socrata dataset exposed as an [`IncidentSource`].
pub struct SocrataSource {
    feed: FeedDefinition,
    client: reqwest::Client,
    timeout: Duration,
}

impl SocrataSource {
    /// Creates a source for `feed` with the default fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(feed: FeedDefinition) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            feed,
            client,
            timeout: DEFAULT_FETCH_TIMEOUT,
        })
    }

    /// Overrides the total fetch timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The feed this source reads.
    #[must_use]
    pub const fn feed(&self) -> &FeedDefinition {
        &self.feed
    }

    /// Query parameters for one page.
    fn page_params(&self, options: &FetchOptions, offset: u64, limit: u64) -> Vec<(String, String)> {
        let column = &self.feed.date_column;
        vec![
            (
                "$where".to_string(),
                format!("{column} >= '{}'", format_socrata_date(options.since)),
            ),
            ("$order".to_string(), format!("{column} DESC")),
            ("$limit".to_string(), limit.to_string()),
            ("$offset".to_string(), offset.to_string()),
        ]
    }

    async fn fetch_pages(&self, options: &FetchOptions) -> Result<Vec<IncidentRecord>, FetchError> {
        let cap = options.limit.min(self.feed.max_records);
        let mut records: Vec<IncidentRecord> = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let remaining = cap.saturating_sub(offset);
            if remaining == 0 {
                break;
            }
            let page_limit = remaining.min(self.feed.page_size);
            let params = self.page_params(options, offset, page_limit);

            log::info!(
                "Fetching {} data: offset={offset}, limit={page_limit}",
                self.feed.id
            );
            let body = retry::send_json(|| self.client.get(&self.feed.api_url).query(&params)).await?;

            let page = records_from_page(body, records.len())?;
            let count = page.len() as u64;
            records.extend(page);
            offset += count;

            if count < page_limit {
                break;
            }
        }

        log::info!("Downloaded {} {} records total", records.len(), self.feed.id);
        Ok(records)
    }
}

#[async_trait]
impl IncidentSource for SocrataSource {
    fn id(&self) -> &str {
        &self.feed.id
    }

    async fn fetch(&self, options: &FetchOptions) -> Result<Vec<IncidentRecord>, FetchError> {
        tokio::time::timeout(self.timeout, self.fetch_pages(options))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }
}
