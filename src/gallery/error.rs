use std::io;

use thiserror::Error;

use crate::gallery::ledger::LedgerError;

/// Errors raised by the browsing layer while talking to the remote site.
#[derive(Error, Debug)]
pub(crate) enum BrowseError {
    /// Timeouts, refused connections, HTTP 5xx and 429. Worth another try.
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Any other non-success HTTP status.
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    /// An expected link, form, field or button was not on the page.
    #[error("page structure changed: {0}")]
    Structure(String),

    /// A URL could not be parsed or joined.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BrowseError {
    /// Whether repeating the same request has a chance of succeeding.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, BrowseError::Transient { .. })
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(url, status.as_u16());
        }
        BrowseError::Transient {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn from_status(url: &str, status: u16) -> Self {
        if status == 429 || status >= 500 {
            BrowseError::Transient {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            }
        } else {
            BrowseError::Status {
                url: url.to_string(),
                status,
            }
        }
    }
}

/// Errors raised while processing a single item of a batch.
#[derive(Error, Debug)]
pub(crate) enum ItemError {
    #[error(transparent)]
    Browse(#[from] BrowseError),

    #[error("{page} has no download link")]
    MissingAsset { page: String },

    #[error("expected {expected} bytes from {url} but received {received}")]
    SizeMismatch {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("local file error: {0}")]
    Io(#[from] io::Error),

    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

impl ItemError {
    /// Only a broken ledger stops the run; everything else skips the item.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, ItemError::Ledger(_))
    }
}

/// Errors that end a whole run.
#[derive(Error, Debug)]
pub(crate) enum RunError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("watchlist feed unavailable: {0}")]
    Feed(#[from] BrowseError),

    #[error("{0} has no watchlist feed")]
    Unsupported(&'static str),
}

impl From<ItemError> for RunError {
    fn from(err: ItemError) -> Self {
        match err {
            ItemError::Ledger(e) => RunError::Ledger(e),
            ItemError::Browse(e) => RunError::Feed(e),
            other => RunError::Feed(BrowseError::Structure(other.to_string())),
        }
    }
}
