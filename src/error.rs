//! Error types for the collection and delivery pipeline.
//!
//! Only [`StoreError`] and [`ConfigError`] ever abort a run. The remaining
//! kinds are logged by the layer that receives them and replaced with a safe
//! default (no record, no summary, "Unknown" category, skipped unit).

use thiserror::Error;

/// Failures of the durable event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The directory holding the store document could not be created.
    #[error("cannot create storage directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The initial empty document could not be written.
    #[error("cannot initialize storage file {path}: {source}")]
    InitFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the page-fetch collaborator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, TLS, timeout, body decoding).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },
}

/// Failures of the enrichment backend.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Transport-level failure talking to the backend.
    #[error("enrichment request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("enrichment API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response did not have the expected shape.
    #[error("malformed enrichment response: {0}")]
    Malformed(String),

    /// The backend answered with nothing usable.
    #[error("enrichment backend returned an empty answer")]
    Empty,
}

/// Failures of the delivery transport for a single unit.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport-level failure talking to the messaging API.
    #[error("delivery request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The messaging API rejected the unit.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Invalid or unreadable source configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read source configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid YAML of the expected shape.
    #[error("invalid source configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A CSS locator failed to parse.
    #[error("source {source_name}: invalid selector {selector:?}: {message}")]
    Selector {
        source_name: String,
        selector: String,
        message: String,
    },

    /// A description noise pattern failed to compile.
    #[error("source {source_name}: invalid noise pattern: {error}")]
    Pattern {
        source_name: String,
        #[source]
        error: regex::Error,
    },

    /// A start URL is not an absolute URL.
    #[error("source {source_name}: invalid start url {url:?}")]
    StartUrl { source_name: String, url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mentions_path() {
        let err = StoreError::CreateDir {
            path: "/nope/data".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope/data"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_enrich_api_error_display() {
        let err = EnrichError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(err.to_string(), "enrichment API error (status 429): slow down");
    }
}
