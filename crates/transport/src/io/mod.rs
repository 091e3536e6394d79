//! Byte transports a session can run over.
//!
//! A debug adapter is reached over a socket or the stdio of a child process.
//! [`DapTransport`] abstracts over these so the same session machinery can be
//! driven by a TCP connection in production and an in-memory channel in
//! tests.
//!
//! # Examples
//!
//! ```no_run
//! use transport::io::{DapTransport, TcpTransport};
//!
//! let transport = TcpTransport::connect("127.0.0.1:5678")?;
//! let (reader, writer) = transport.split()?;
//! # Ok::<(), eyre::Error>(())
//! ```
//!
//! ```
//! use transport::io::{DapTransport, InMemoryTransport};
//!
//! let (client, adapter) = InMemoryTransport::pair();
//! let (client_reader, client_writer) = client.split()?;
//! # Ok::<(), eyre::Error>(())
//! ```

use std::io::{Read, Write};
use std::time::Duration;

mod memory;
mod tcp;

pub use memory::{InMemoryReader, InMemoryTransport, InMemoryWriter};
pub use tcp::TcpTransport;

/// How long a reader may block before reporting `WouldBlock`/`TimedOut`.
///
/// The reader thread uses these wake ups to notice that it should stop.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Trait for bidirectional DAP byte transport
///
/// Implementations split into a reader half, which is moved onto a background
/// thread and read in arbitrary sized chunks, and a writer half, which the
/// session uses to send framed messages.
///
/// Readers should not block forever: when no data arrives within
/// [`READ_POLL_INTERVAL`] they return an error of kind
/// [`std::io::ErrorKind::WouldBlock`] or [`std::io::ErrorKind::TimedOut`].
/// End of stream is reported as a zero length read.
pub trait DapTransport: Send + 'static {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;

    /// Split the transport into separate reader and writer halves
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be split (e.g., socket cloning fails)
    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer)>;
}
