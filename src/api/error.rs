//! Error types for the content API client.
//!
//! HTTP status codes are classified once, at the client boundary, into the
//! closed [`ErrorKind`] taxonomy. Downstream code switches on the kind and
//! never inspects raw status codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of response-body bytes kept in error messages.
const MAX_BODY_EXCERPT: usize = 200;

/// Classification of a failed unit of work.
///
/// Persisted in the retry queue, so variants are serialized in `snake_case`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 429 persisted through every in-call backoff attempt.
    TransientRateLimited,
    /// HTTP 503 (or other 5xx) persisted through every in-call retry.
    TransientServerUnavailable,
    /// Connection failure, timeout, or undecodable response.
    TransientNetwork,
    /// The output writer failed after a successful resolution.
    TransientWriteFailure,
    /// Any other 4xx. Never retried.
    PermanentClientError,
}

impl ErrorKind {
    /// Returns the serialized string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientRateLimited => "transient_rate_limited",
            Self::TransientServerUnavailable => "transient_server_unavailable",
            Self::TransientNetwork => "transient_network",
            Self::TransientWriteFailure => "transient_write_failure",
            Self::PermanentClientError => "permanent_client_error",
        }
    }

    /// Returns true for every kind that may succeed on a later attempt.
    #[must_use]
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::PermanentClientError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced by [`ApiClient`](super::ApiClient) requests.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server kept answering 429 after all backoff attempts.
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimited {
        /// The request URL.
        url: String,
        /// Total requests made, including the first.
        attempts: u32,
    },

    /// The server kept answering 5xx after all in-call retries.
    #[error("server unavailable (HTTP {status}) at {url} after {attempts} attempts")]
    ServerUnavailable {
        /// The request URL.
        url: String,
        /// The last status code received.
        status: u16,
        /// Total requests made, including the first.
        attempts: u32,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The request URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before a response arrived.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The request URL.
        url: String,
    },

    /// The response body could not be decoded into the expected shape.
    #[error("invalid response from {url}: {reason}")]
    Decode {
        /// The request URL.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// A 4xx response other than 429.
    #[error("HTTP {status} from {url}: {body}")]
    ClientError {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Excerpt of the response body.
        body: String,
    },

    /// Pagination hit the safety cap before an empty page was seen.
    #[error("pagination of {url} stopped after {pages} pages without reaching the end")]
    PageLimit {
        /// The listing endpoint.
        url: String,
        /// Number of pages fetched.
        pages: u32,
    },

    /// The call was abandoned because shutdown was requested.
    #[error("request to {url} cancelled by shutdown")]
    Cancelled {
        /// The request URL.
        url: String,
    },
}

impl ApiError {
    /// Creates a transport error from a reqwest error, splitting out timeouts.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else if source.is_decode() {
            Self::Decode {
                url: url.into(),
                reason: source.to_string(),
            }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a client error, keeping only a short excerpt of the body.
    pub fn client_error(url: impl Into<String>, status: u16, body: &str) -> Self {
        let body: String = body.trim().chars().take(MAX_BODY_EXCERPT).collect();
        Self::ClientError {
            url: url.into(),
            status,
            body,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Maps this error onto the closed failure taxonomy.
    ///
    /// `Cancelled` maps to [`ErrorKind::TransientNetwork`]; callers that need to
    /// distinguish shutdown should check [`is_cancelled`](Self::is_cancelled) first.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::TransientRateLimited,
            Self::ServerUnavailable { .. } => ErrorKind::TransientServerUnavailable,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Decode { .. }
            | Self::PageLimit { .. }
            | Self::Cancelled { .. } => ErrorKind::TransientNetwork,
            Self::ClientError { .. } => ErrorKind::PermanentClientError,
        }
    }

    /// Returns true if the call was abandoned for shutdown.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the HTTP status when the error carries one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ServerUnavailable { status, .. } | Self::ClientError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
