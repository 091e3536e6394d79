//! A session wired to a byte transport.

use std::io::{ErrorKind, Read};
use std::thread::{self, JoinHandle};

use eyre::WrapErr;
use transport::DapTransport;

use crate::session::{Session, SessionBuilder};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Owns the thread that feeds a transport's read half into a [`Session`].
///
/// Dropping the connection stops the reader and shuts the session down.
///
/// ```
/// use session::{Connection, Session, SessionId};
/// use transport::InMemoryTransport;
///
/// let (client, _adapter) = InMemoryTransport::pair();
/// let connection = Connection::with_transport(client, Session::builder(SessionId(1)))?;
/// assert!(!connection.session().is_closed());
/// # Ok::<(), eyre::Error>(())
/// ```
pub struct Connection {
    session: Session,
    // Option because of drop and take
    exit: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn with_transport<T>(transport: T, builder: SessionBuilder) -> eyre::Result<Self>
    where
        T: DapTransport,
    {
        let (input, output) = transport.split()?;
        let session = builder.build(output);

        let (exit_tx, exit_rx) = oneshot::channel();
        let pump_session = session.clone();
        let reader = thread::Builder::new()
            .name(format!("dap-session-{}", session.id()))
            .spawn(move || pump(input, pump_session, exit_rx))
            .wrap_err("spawning reader thread")?;

        Ok(Self {
            session,
            exit: Some(exit_tx),
            reader: Some(reader),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Stop reading and shut the session down, failing outstanding requests.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(());
        }
        self.session.shutdown();

        if let Some(reader) = self.reader.take() {
            if reader.thread().id() == thread::current().id() {
                // dropped from a handler running on the reader thread itself
                return;
            }
            if reader.join().is_err() {
                tracing::error!(session = %self.session.id(), "reader thread panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::debug!(session = %self.session.id(), "dropping connection");
        self.stop();
    }
}

fn pump(mut input: impl Read, session: Session, exit: oneshot::Receiver<()>) {
    let span = tracing::debug_span!("reader", session = %session.id());
    let _guard = span.enter();

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match exit.try_recv() {
            Ok(()) => return,
            Err(oneshot::TryRecvError::Empty) => {}
            Err(oneshot::TryRecvError::Disconnected) => {
                tracing::debug!("connection dropped, stopping reader");
                return;
            }
        }

        match input.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("transport closed");
                session.shutdown();
                return;
            }
            Ok(n) => {
                let mut chunk = &buf[..n];
                // a bad frame only loses itself, frames buffered behind it
                // still need routing
                while let Err(e) = session.on_bytes_received(chunk) {
                    tracing::warn!(error = %e, "dropping undecodable message");
                    chunk = &[];
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                tracing::error!(error = %e, "reading from transport, shutting down");
                session.shutdown();
                return;
            }
        }
    }
}
