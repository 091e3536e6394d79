//! Errors surfaced by a session.

use std::io;
use std::time::Duration;

use transport::{CodecError, Response};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A received frame could not be decoded, or an outgoing message could
    /// not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The adapter answered with `success: false`, or the request was aborted
    /// (timeout, send failure, shutdown).
    #[error("request failed: {reason}")]
    RequestFailed {
        reason: String,
        /// The adapter's response, absent when the request was aborted.
        response: Option<Box<Response>>,
    },

    /// A blocking request saw neither a response nor a failure in time.
    #[error("no response to `{command}` after {waited:?}")]
    NoResponse { command: String, waited: Duration },

    /// The session has been shut down.
    #[error("session is closed")]
    Closed,

    #[error("writing to transport: {0}")]
    Write(#[source] io::Error),
}
