//! Crate-wide error type.
//!
//! Provider and transport failures are surfaced as [`Error`] values; the merge
//! pipeline itself never fails, it logs and degrades instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out calling {0}")]
    Timeout(String),

    #[error("remote service returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("unknown provider '{0}' in configuration")]
    UnknownProvider(String),

    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{operation} is not supported for entity type '{entity_type}'")]
    Unsupported { operation: &'static str, entity_type: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Transport errors, with timeouts reported as their own variant.
    pub fn from_transport(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() { Error::Timeout(url.to_string()) } else { Error::Http(err) }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider { provider: provider.into(), message: message.into() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
