//! Error types for the alert engine.

use thiserror::Error;

/// Failures talking to the upstream catalog provider.
///
/// These are surfaced as-is so the caller can distinguish "upstream is
/// down" from "section is not open"; an error is never translated into
/// availability data.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed (network, timeout, TLS).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {code} for {url}")]
    Status { url: String, code: u16 },

    /// Upstream answered but the body was not the expected shape.
    #[error("failed to parse upstream response: {0}")]
    Parse(String),
}

/// Failures in the outbound message transport.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// SMTP connection, authentication or send failure.
    #[error("SMTP transport failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// A recipient or sender address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] lettre::address::AddressError),

    /// Message construction failed.
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    /// Other transport failure.
    #[error("{0}")]
    Other(String),
}

/// Failures in the subscription store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Records could not be serialized or deserialized.
    #[error("failed to (de)serialize store contents: {0}")]
    Serde(#[from] serde_json::Error),
}
