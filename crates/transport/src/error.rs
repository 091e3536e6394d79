//! Error types for the transport layer.

/// Errors that can occur while encoding or decoding DAP messages.
///
/// Framing problems (a missing or unusable `Content-Length`) are not
/// represented here: the frame decoder recovers from those itself.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A message body was not valid UTF-8.
    #[error("invalid UTF-8 in message body")]
    InvalidUtf8,

    /// Failed to deserialize the JSON message body.
    #[error("JSON deserialization failed: {0}")]
    JsonDeserialize(#[source] serde_json::Error),

    /// Failed to serialize the outgoing message to JSON.
    #[error("JSON serialization failed: {0}")]
    JsonSerialize(#[source] serde_json::Error),
}
