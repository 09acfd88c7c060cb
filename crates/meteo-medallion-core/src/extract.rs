//! HTTP extractors producing raw-layer batches.
//!
//! Every extractor is stateless between calls: what to fetch is carried by an
//! [`ExtractRequest`] value, so one extractor can serve concurrent requests
//! for different cities.
use std::time::Duration;

use arrow::{array::RecordBatch, error::ArrowError};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use snafu::{Backtrace, prelude::*};

use crate::registry::City;

mod open_meteo;
mod stations;

pub use open_meteo::{OpenMeteoEndpoint, OpenMeteoExtractor};
pub use stations::{Authenticator, NearestStationsExtractor, RapidApiAuth};

/// Days of history fetched by a default request.
pub const LOOKBACK_WINDOW_DAYS: u64 = 7;

/// Default timeout applied to every upstream HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the extraction layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExtractError {
    /// The upstream could not be reached or did not answer in time.
    #[snafu(display("Upstream {url} is unavailable: {source}"))]
    UpstreamUnavailable {
        /// Requested URL.
        url: String,
        /// Underlying HTTP client error.
        source: reqwest::Error,
        /// Backtrace captured when the error was created.
        backtrace: Backtrace,
    },

    /// The upstream answered with a non-success status.
    #[snafu(display("Upstream {url} answered {status}: {body}"))]
    UpstreamStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: StatusCode,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The response body did not have the expected shape.
    #[snafu(display("Unexpected response from {url}: {source}"))]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying JSON error.
        source: serde_json::Error,
        /// Backtrace captured when the error was created.
        backtrace: Backtrace,
    },

    /// A response field was missing or inconsistent.
    #[snafu(display("Malformed response from {url}: {detail}"))]
    Malformed {
        /// Requested URL.
        url: String,
        /// What was wrong.
        detail: String,
    },

    /// The requested date window is empty.
    #[snafu(display("Invalid date window: start {start} is after end {end}"))]
    InvalidWindow {
        /// First day requested.
        start: NaiveDate,
        /// Last day requested.
        end: NaiveDate,
    },

    /// The HTTP client could not be built.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client {
        /// Underlying HTTP client error.
        source: reqwest::Error,
    },

    /// Building the output batch failed.
    #[snafu(display("Failed to build batch: {source}"))]
    Batch {
        /// Underlying Arrow error.
        source: ArrowError,
        /// Backtrace captured when the error was created.
        backtrace: Backtrace,
    },
}

impl ExtractError {
    /// Transport failures, timeouts, throttling and 5xx answers are worth
    /// another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::UpstreamUnavailable { .. } => true,
            ExtractError::UpstreamStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    /// `start..=end`; fails when `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ExtractError> {
        ensure!(start <= end, InvalidWindowSnafu { start, end });
        Ok(Self { start, end })
    }

    /// The `days` days before `end`, plus `end` itself.
    pub fn lookback(end: NaiveDate, days: u64) -> Self {
        let start = end.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    /// First day of the window.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the window.
    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// Everything one extraction call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    /// Location to fetch for.
    pub city: City,
    /// Days covered by range-based endpoints (the archive).
    pub window: DateWindow,
    /// Day stamped into `date_retrieved`.
    pub retrieved_on: NaiveDate,
}

impl ExtractRequest {
    /// Request for `city` retrieved on `retrieved_on`, looking back
    /// [`LOOKBACK_WINDOW_DAYS`].
    pub fn new(city: City, retrieved_on: NaiveDate) -> Self {
        Self {
            city,
            window: DateWindow::lookback(retrieved_on, LOOKBACK_WINDOW_DAYS),
            retrieved_on,
        }
    }

    /// Replace the date window.
    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
    }

    pub(crate) fn date_retrieved(&self) -> String {
        self.retrieved_on.format("%Y-%m-%d").to_string()
    }
}

/// A source of raw observations.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Raw dataset this extractor feeds (e.g. `forecast`).
    fn dataset(&self) -> &'static str;

    /// Fetch and wrangle one batch for `request`.
    async fn extract(&self, request: &ExtractRequest) -> Result<RecordBatch, ExtractError>;
}

/// HTTP client with the default request timeout.
pub fn http_client(timeout: Duration) -> Result<Client, ExtractError> {
    Client::builder().timeout(timeout).build().context(ClientSnafu)
}

const MAX_ERROR_BODY: usize = 512;

/// Send `request` and decode a JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
) -> Result<T, ExtractError> {
    let response = request
        .send()
        .await
        .context(UpstreamUnavailableSnafu { url })?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .context(UpstreamUnavailableSnafu { url })?;

    if !status.is_success() {
        let mut text = String::from_utf8_lossy(&body).into_owned();
        if text.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(0);
            text.truncate(cut);
        }
        return UpstreamStatusSnafu {
            url,
            status,
            body: text,
        }
        .fail();
    }

    serde_json::from_slice(&body).context(DecodeSnafu { url })
}
