//! TCP-based transport implementation

use std::net::{TcpStream, ToSocketAddrs};

use eyre::{Context, Result};
use retry::{delay::Exponential, retry};

use super::{DapTransport, READ_POLL_INTERVAL};

/// TCP-based DAP transport
///
/// The read half is configured with a read timeout of
/// [`READ_POLL_INTERVAL`] so that the reader thread can periodically check
/// whether it has been asked to stop.
///
/// # Examples
///
/// ```no_run
/// use std::net::TcpStream;
/// use transport::io::TcpTransport;
///
/// let stream = TcpStream::connect("127.0.0.1:5678")?;
/// let transport = TcpTransport::new(stream)?;
/// # Ok::<(), eyre::Error>(())
/// ```
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an existing stream
    ///
    /// # Errors
    ///
    /// Returns an error if setting the read timeout fails
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream
            .set_read_timeout(Some(READ_POLL_INTERVAL))
            .context("setting read timeout on TCP stream")?;
        stream
            .set_nodelay(true)
            .context("disabling Nagle's algorithm on TCP stream")?;
        Ok(Self { stream })
    }

    /// Connect to a debug adapter at the given address
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).context("connecting to debug adapter")?;
        Self::new(stream)
    }

    /// Connect with automatic retry
    ///
    /// Debug adapters that were just spawned may not be listening yet, so this
    /// retries with exponential backoff (200ms, 400ms, 800ms, 1600ms, 3200ms).
    pub fn connect_with_retry<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + Clone,
    {
        let stream = retry(Exponential::from_millis(200).take(5), || {
            tracing::debug!("trying to make connection");
            match TcpStream::connect(addr.clone()) {
                Ok(stream) => {
                    tracing::debug!("connection made");
                    Ok(stream)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "error making connection");
                    Err(e)
                }
            }
        })
        .wrap_err("failed to connect to DAP server")?;

        Self::new(stream)
    }
}

impl DapTransport for TcpTransport {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> Result<(Self::Reader, Self::Writer)> {
        let input = self
            .stream
            .try_clone()
            .context("cloning TCP stream for reader")?;
        Ok((input, self.stream))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn split_halves_share_the_socket() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let transport = TcpTransport::connect(addr)?;
        let (mut adapter, _) = listener.accept()?;
        let (mut reader, mut writer) = transport.split()?;

        writer.write_all(b"ping")?;
        let mut buf = [0u8; 4];
        adapter.read_exact(&mut buf)?;
        assert_eq!(&buf, b"ping");

        adapter.write_all(b"pong")?;
        reader.read_exact(&mut buf)?;
        assert_eq!(&buf, b"pong");

        Ok(())
    }

    #[test]
    fn idle_reader_times_out() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let transport = TcpTransport::connect(listener.local_addr()?)?;
        let (_adapter, _) = listener.accept()?;
        let (mut reader, _writer) = transport.split()?;

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            "unexpected error kind {:?}",
            err.kind()
        );

        Ok(())
    }

    #[test]
    fn connect_with_retry_reaches_listener() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let _transport = TcpTransport::connect_with_retry(listener.local_addr()?)?;
        Ok(())
    }
}
