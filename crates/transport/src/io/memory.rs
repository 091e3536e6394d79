//! In-memory transport implementation for testing

use std::io::{self, Read, Write};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{DapTransport, READ_POLL_INTERVAL};

/// In-memory transport for testing
///
/// Two connected transports pass byte chunks to each other over channels, so
/// a test can play the debug adapter without a socket.
///
/// # Examples
///
/// ```
/// use std::io::{Read, Write};
/// use transport::io::{DapTransport, InMemoryTransport};
///
/// let (client, adapter) = InMemoryTransport::pair();
/// let (_client_reader, mut client_writer) = client.split()?;
/// let (mut adapter_reader, _adapter_writer) = adapter.split()?;
///
/// client_writer.write_all(b"hello")?;
/// let mut buf = [0u8; 5];
/// adapter_reader.read_exact(&mut buf)?;
/// assert_eq!(&buf, b"hello");
/// # Ok::<(), eyre::Error>(())
/// ```
pub struct InMemoryTransport {
    reader: InMemoryReader,
    writer: InMemoryWriter,
}

/// Reader half of in-memory transport
///
/// Blocks for at most [`READ_POLL_INTERVAL`] waiting for the next chunk, then
/// reports `WouldBlock` the way a socket with a read timeout does. Returns
/// end of stream once the peer's writer has been dropped.
pub struct InMemoryReader {
    pending: Vec<u8>,
    rx: Receiver<Vec<u8>>,
}

/// Writer half of in-memory transport
pub struct InMemoryWriter {
    tx: Sender<Vec<u8>>,
}

impl InMemoryTransport {
    /// Create a connected pair of in-memory transports
    ///
    /// Returns `(client_transport, adapter_transport)` where data written to
    /// one can be read from the other.
    pub fn pair() -> (Self, Self) {
        let (client_tx, adapter_rx) = crossbeam_channel::unbounded();
        let (adapter_tx, client_rx) = crossbeam_channel::unbounded();

        let client = Self {
            reader: InMemoryReader::new(client_rx),
            writer: InMemoryWriter { tx: client_tx },
        };

        let adapter = Self {
            reader: InMemoryReader::new(adapter_rx),
            writer: InMemoryWriter { tx: adapter_tx },
        };

        (client, adapter)
    }
}

impl DapTransport for InMemoryTransport {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer)> {
        Ok((self.reader, self.writer))
    }
}

impl InMemoryReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            pending: Vec::new(),
            rx,
        }
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_POLL_INTERVAL) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "no data available",
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let len = std::cmp::min(self.pending.len(), buf.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.drain(..len);
        Ok(len)
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidirectional_communication() -> io::Result<()> {
        let (client, adapter) = InMemoryTransport::pair();
        let (mut client_reader, mut client_writer) = client.split().unwrap();
        let (mut adapter_reader, mut adapter_writer) = adapter.split().unwrap();

        client_writer.write_all(b"Hello from client")?;
        let mut buf = vec![0u8; 17];
        adapter_reader.read_exact(&mut buf)?;
        assert_eq!(&buf, b"Hello from client");

        adapter_writer.write_all(b"Hello from adapter")?;
        let mut buf = vec![0u8; 18];
        client_reader.read_exact(&mut buf)?;
        assert_eq!(&buf, b"Hello from adapter");

        Ok(())
    }

    #[test]
    fn would_block_on_empty_channel() {
        let (client, _adapter) = InMemoryTransport::pair();
        let (mut reader, _writer) = client.split().unwrap();

        let mut buf = [0u8; 8];
        match reader.read(&mut buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            other => panic!("expected WouldBlock, got {other:?}"),
        }
    }

    #[test]
    fn eof_on_disconnect() -> io::Result<()> {
        let (client, adapter) = InMemoryTransport::pair();
        let (mut reader, _writer) = client.split().unwrap();

        drop(adapter);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf)?, 0);
        Ok(())
    }

    #[test]
    fn writes_fail_once_peer_is_gone() {
        let (client, adapter) = InMemoryTransport::pair();
        let (_reader, mut writer) = client.split().unwrap();

        drop(adapter);

        let err = writer.write_all(b"lost").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn small_reads_drain_a_chunk_in_order() -> io::Result<()> {
        let (client, adapter) = InMemoryTransport::pair();
        let (mut client_reader, _client_writer) = client.split().unwrap();
        let (_adapter_reader, mut adapter_writer) = adapter.split().unwrap();

        adapter_writer.write_all(b"First")?;
        adapter_writer.write_all(b"Second")?;

        let mut buf = [0u8; 3];
        let mut seen = Vec::new();
        while seen.len() < 11 {
            let n = client_reader.read(&mut buf)?;
            seen.extend_from_slice(&buf[..n]);
        }
        assert_eq!(seen, b"FirstSecond");

        Ok(())
    }
}
