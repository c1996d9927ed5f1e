//! Error types for the live feed and the request/response API.

use thiserror::Error;
use url::Url;

/// Failure of one feed connection. Each subscription sees at most one of
/// these; the connection is dead once it is reported.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed connect failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("feed rejected with HTTP status {0}")]
    Status(u16),

    #[error("feed endpoint is not an event stream (content-type {0:?})")]
    NotEventStream(String),

    #[error("feed read failed: {0}")]
    Read(#[source] reqwest::Error),

    #[error("feed closed by the server")]
    RemoteClosed,
}

/// Failure of a single API request. Callers decide whether to retry on the
/// next poll tick; the client itself never retries.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend URL '{url}' must be http or https")]
    InvalidBase { url: Url },

    #[error("building the HTTP client failed: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP status {status} from {endpoint}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("invalid response body from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}
