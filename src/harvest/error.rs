//! Error types for report fetching
//!
//! [`FetchError`] is the outcome taxonomy a [`ReportFetcher`](super::ReportFetcher)
//! reports back to the pipeline. [`HarvestError`] covers failures to set a
//! harvest up at all.

use thiserror::Error;

/// Outcome classes of a failed fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Remote source is throttling the caller
    #[error("Rate limited by remote source")]
    RateLimited,

    /// Remote source rejected or could not produce the exact range requested
    #[error("Invalid report: {0}")]
    InvalidReport(String),

    /// Transport, decode, or any other unclassified failure
    #[error("{0}")]
    Failure(String),
}

impl FetchError {
    /// Build a generic failure from any error, falling back to its debug form
    /// when the display message is empty
    pub fn failure_from<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let message = err.to_string();
        if message.trim().is_empty() {
            Self::Failure(format!("{err:?}"))
        } else {
            Self::Failure(message)
        }
    }

    /// Text stored on a failure placeholder
    pub fn reason(&self) -> String {
        match self {
            Self::RateLimited => "rate limited by remote source".to_string(),
            Self::InvalidReport(reason) => reason.clone(),
            Self::Failure(message) => message.clone(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Failure(format!("request timed out: {err}"))
        } else {
            Self::failure_from(&err)
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failure(format!("failed to decode report: {err}"))
    }
}

/// Errors setting up a harvest
#[derive(Error, Debug)]
pub enum HarvestError {
    /// No fetcher factory registered for the provider's service type
    #[error("No report fetcher registered for service type '{service_type}'")]
    UnknownServiceType { service_type: String },

    /// Factory could not build a fetcher
    #[error("Failed to create fetcher for provider '{provider_id}': {reason}")]
    FetcherInit { provider_id: String, reason: String },
}

impl HarvestError {
    pub fn fetcher_init(provider_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetcherInit {
            provider_id: provider_id.into(),
            reason: reason.into(),
        }
    }
}
