//! Transport errors

use thiserror::Error;

/// Errors raised below the envelope layer: the request never produced a
/// usable `{ok, data?, error?}` answer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Realtime bus is not connected")]
    NotConnected,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unexpected payload shape for {endpoint}: {reason}")]
    UnexpectedShape { endpoint: String, reason: String },

    #[error("JSON error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// Shorthand for a shape violation on a known endpoint
    pub fn shape(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        TransportError::UnexpectedShape {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}
