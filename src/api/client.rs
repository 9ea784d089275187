//! HTTP client for the content-hosting REST API.
//!
//! This module provides the [`ApiClient`] struct which lists hosted items
//! page by page and resolves hoster links into direct URLs. Every request,
//! including each in-call retry, first passes through the shared
//! [`RateLimiter`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::backoff::{BackoffPolicy, BackoffReason, RetryDecision, StatusClass, classify_status};
use super::error::ApiError;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::source::ContentSource;
use super::types::{FileEntry, ItemDetails, RemoteItem, ResolvedFile, UnrestrictResponse};
use crate::filter::{is_subtitle_extension, is_video_extension};
use crate::user_agent;

/// Connect timeout for API requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout for API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Items requested per page.
pub const PAGE_SIZE: u32 = 100;

/// Safety cap on pages fetched in one listing.
pub const MAX_PAGES: u32 = 1000;

/// Listing endpoint, relative to the base URL.
const LIST_PATH: &str = "torrents";

/// Resolution endpoint, relative to the base URL.
const RESOLVE_PATH: &str = "unrestrict/link";

/// Per-item detail endpoint, relative to the base URL.
const DETAILS_PATH: &str = "torrents/info";

/// Parses `base_url` and checks it is an http(s) URL.
///
/// # Errors
///
/// Returns the reason the URL was rejected.
pub(crate) fn validate_base_url(base_url: &str) -> Result<Url, String> {
    let parsed = Url::parse(base_url).map_err(|e| e.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    Ok(parsed)
}

/// Errors raised while constructing an [`ApiClient`].
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// Base URL did not parse or is not http(s).
    #[error("invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Token contains characters that cannot appear in a header.
    #[error("API token is not a valid header value")]
    InvalidToken,

    /// reqwest refused the builder configuration.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Rate-limited client for the content API.
///
/// Cloning is cheap: the connection pool and the rate limiter are shared.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use strm_sync_core::api::{ApiClient, BackoffPolicy, ContentSource, RateLimiter};
/// use tokio_util::sync::CancellationToken;
/// use futures_util::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = Arc::new(RateLimiter::new(200));
/// let client = ApiClient::new(
///     "https://api.real-debrid.com/rest/1.0",
///     "token",
///     limiter,
///     BackoffPolicy::default(),
/// )?;
///
/// let mut items = client.fetch_all_pages(CancellationToken::new());
/// while let Some(item) = items.next().await {
///     println!("{}", item?.filename);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Arc<str>,
    limiter: Arc<RateLimiter>,
    backoff: BackoffPolicy,
}

impl ApiClient {
    /// Creates a client authenticating every request with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if the base URL is not an http(s) URL,
    /// the token is not a valid header value, or reqwest fails to build.
    pub fn new(
        base_url: &str,
        token: &str,
        limiter: Arc<RateLimiter>,
        backoff: BackoffPolicy,
    ) -> Result<Self, ClientBuildError> {
        validate_base_url(base_url).map_err(|reason| ClientBuildError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        })?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientBuildError::InvalidToken)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .user_agent(user_agent::default_api_user_agent())
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()?;

        Ok(Self {
            http,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            limiter,
            backoff,
        })
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Fetches one listing page.
    ///
    /// Returns `Ok(None)` when the server answers 404 for the page, which the
    /// listing endpoint uses to signal the end of data.
    #[instrument(skip(self, cancel))]
    async fn fetch_page(
        &self,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RemoteItem>>, ApiError> {
        let endpoint = self.endpoint(LIST_PATH);
        let label = format!("{endpoint}?page={page}");
        let request = || {
            self.http
                .get(&endpoint)
                .query(&[("page", page), ("limit", PAGE_SIZE)])
        };

        let response = match self.send_with_backoff(&label, request, cancel).await {
            Ok(response) => response,
            Err(ApiError::ClientError { status: 404, .. }) => {
                debug!(page, "page returned 404, treating as end of data");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(&label, e))?;
        if body.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        let items: Vec<RemoteItem> =
            serde_json::from_str(&body).map_err(|e| ApiError::decode(&label, e.to_string()))?;
        debug!(page, count = items.len(), "fetched page");
        Ok(Some(items))
    }

    /// Fills in `item.files` for an item listed with bare links.
    ///
    /// A single link on an item named like a media file is that file. Any
    /// other item is looked up on the detail endpoint, whose selected files
    /// pair with the links in order.
    async fn attach_files(
        &self,
        mut item: RemoteItem,
        cancel: &CancellationToken,
    ) -> Result<RemoteItem, ApiError> {
        if let [link] = item.links.as_slice() {
            let entry = FileEntry {
                relative_path: item.filename.clone(),
                size_bytes: item.bytes,
                link: link.clone(),
            };
            if entry
                .extension()
                .is_some_and(|ext| is_video_extension(&ext) || is_subtitle_extension(&ext))
            {
                item.files.push(entry);
                return Ok(item);
            }
        }

        let (entries, mismatch) = self.fetch_details(&item.id, cancel).await?.into_entries();
        if mismatch {
            warn!(
                id = %item.id,
                links = item.links.len(),
                files = entries.len(),
                "selected files and links differ in count, pairing what lines up"
            );
        }
        item.files = entries;
        Ok(item)
    }

    #[instrument(skip(self, cancel))]
    async fn fetch_details(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<ItemDetails, ApiError> {
        let endpoint = format!("{}/{id}", self.endpoint(DETAILS_PATH));
        let request = || self.http.get(&endpoint);

        let response = self.send_with_backoff(&endpoint, request, cancel).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(&endpoint, e))?;
        let details: ItemDetails =
            serde_json::from_str(&body).map_err(|e| ApiError::decode(&endpoint, e.to_string()))?;
        debug!(id, files = details.files.len(), "fetched item details");
        Ok(details)
    }

    /// Sends a request built by `build`, retrying 429 and 5xx responses
    /// according to the backoff policy.
    ///
    /// Only 2xx responses are returned as `Ok`.
    async fn send_with_backoff<F>(
        &self,
        url: &str,
        build: F,
        cancel: &CancellationToken,
    ) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts: u32 = 0;
        let mut rate_limit_retries: u32 = 0;
        let mut unavailable_retries: u32 = 0;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ApiError::cancelled(url)),
                () = self.limiter.acquire() => {}
            }

            attempts += 1;
            let response = build()
                .send()
                .await
                .map_err(|e| ApiError::transport(url, e))?;
            let status = response.status().as_u16();

            let reason = match classify_status(status) {
                StatusClass::Success => return Ok(response),
                StatusClass::ClientError => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::client_error(url, status, &body));
                }
                StatusClass::Backoff(reason) => reason,
            };

            let retries_done = match reason {
                BackoffReason::RateLimited => &mut rate_limit_retries,
                BackoffReason::ServerUnavailable => &mut unavailable_retries,
            };

            let delay = match self.backoff.should_retry(reason, *retries_done) {
                RetryDecision::Retry { delay, attempt } => {
                    *retries_done = attempt;
                    delay
                }
                RetryDecision::DoNotRetry { reason: why } => {
                    debug!(url, status, attempts, why, "giving up");
                    return Err(match reason {
                        BackoffReason::RateLimited => ApiError::RateLimited {
                            url: url.to_string(),
                            attempts,
                        },
                        BackoffReason::ServerUnavailable => ApiError::ServerUnavailable {
                            url: url.to_string(),
                            status,
                            attempts,
                        },
                    });
                }
            };

            let delay = if reason == BackoffReason::RateLimited {
                let server_delay = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_retry_after);
                let delay = server_delay.map_or(delay, |server| server.max(delay));
                self.limiter.record_rate_limit(delay);
                delay
            } else {
                delay
            };

            warn!(
                url,
                status,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                "upstream throttled request, backing off"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ApiError::cancelled(url)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Pagination cursor carried through `stream::unfold`.
struct PageCursor {
    client: ApiClient,
    cancel: CancellationToken,
    next_page: u32,
    seen: HashSet<String>,
    buffered: VecDeque<RemoteItem>,
    finished: bool,
}

impl PageCursor {
    async fn next_item(mut self) -> Option<(Result<RemoteItem, ApiError>, Self)> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                if !(item.is_downloaded() && item.needs_file_details()) {
                    return Some((Ok(item), self));
                }
                match self.client.attach_files(item, &self.cancel).await {
                    Ok(item) => return Some((Ok(item), self)),
                    Err(error) if error.is_cancelled() => {
                        info!("listing interrupted by shutdown");
                        return None;
                    }
                    Err(error) => {
                        self.finished = true;
                        self.buffered.clear();
                        return Some((Err(error), self));
                    }
                }
            }
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                info!(page = self.next_page, "listing interrupted by shutdown");
                return None;
            }
            if self.next_page > MAX_PAGES {
                warn!(max_pages = MAX_PAGES, "pagination safety cap reached");
                self.finished = true;
                let error = ApiError::PageLimit {
                    url: self.client.endpoint(LIST_PATH),
                    pages: MAX_PAGES,
                };
                return Some((Err(error), self));
            }

            match self.client.fetch_page(self.next_page, &self.cancel).await {
                Ok(Some(items)) if !items.is_empty() => {
                    let before = self.buffered.len();
                    for item in items {
                        if self.seen.insert(item.id.clone()) {
                            self.buffered.push_back(item);
                        }
                    }
                    debug!(
                        page = self.next_page,
                        new_items = self.buffered.len() - before,
                        total_seen = self.seen.len(),
                        "page accepted"
                    );
                    self.next_page += 1;
                }
                Ok(_) => {
                    debug!(
                        pages = self.next_page - 1,
                        items = self.seen.len(),
                        "listing complete"
                    );
                    return None;
                }
                Err(error) if error.is_cancelled() => {
                    info!(page = self.next_page, "listing interrupted by shutdown");
                    return None;
                }
                Err(error) => {
                    self.finished = true;
                    return Some((Err(error), self));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ContentSource for ApiClient {
    fn fetch_all_pages(
        &self,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<RemoteItem, ApiError>> {
        let cursor = PageCursor {
            client: self.clone(),
            cancel,
            next_page: 1,
            seen: HashSet::new(),
            buffered: VecDeque::new(),
            finished: false,
        };
        stream::unfold(cursor, PageCursor::next_item).boxed()
    }

    #[instrument(skip(self, entry, cancel), fields(path = %entry.relative_path))]
    async fn resolve(
        &self,
        entry: &FileEntry,
        cancel: &CancellationToken,
    ) -> Result<ResolvedFile, ApiError> {
        let endpoint = self.endpoint(RESOLVE_PATH);
        let request = || {
            self.http
                .post(&endpoint)
                .form(&[("link", entry.link.as_str())])
        };

        let response = self.send_with_backoff(&endpoint, request, cancel).await?;
        let body: UnrestrictResponse = response
            .json()
            .await
            .map_err(|e| ApiError::transport(&endpoint, e))?;
        if body.download.trim().is_empty() {
            return Err(ApiError::decode(&endpoint, "empty download URL"));
        }

        debug!(filename = %body.filename, "resolved link");
        Ok(body.into_resolved(entry))
    }
}
