use std::time::Duration;

use thiserror::Error;

/// An error that happens when fetching a context from the backing store.
///
/// The error is [`Clone`], since the result of a single fetch is handed out to every caller
/// that was waiting for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The backing store has no context for the requested hash.
    #[error("context not found")]
    NotFound,
    /// The backing store could not be reached, or failed to answer.
    ///
    /// The attached string contains the reason reported by the store.
    #[error("fetching context failed: {0}")]
    Transport(String),
    /// The backing store did not answer within the configured deadline.
    #[error("fetching context timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Whether retrying the fetch later has a chance to succeed.
    ///
    /// A missing context stays missing, while transport failures and timeouts are transient.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    /// A short name of the error kind, used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
        }
    }
}
