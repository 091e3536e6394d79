use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use transport::{FrameDecoder, Message, Request, RequestBody, Response, Seq, codec};

use crate::config::SessionConfig;
use crate::dispatch::{self, Completion};
use crate::error::SessionError;
use crate::handler::{Handler, HandlerChain};
use crate::ledger::{
    self, FailureHandler, Ledger, PendingRequest, REASON_CLOSING_DOWN, REASON_SEND_FAILED,
    REASON_TIMEOUT, SuccessHandler,
};
use crate::notify::{Notifier, TracingNotifier};
use crate::timer::{ThreadTimers, TimerFacility, TimerId, TimerToken};

/// Identifies a session in logs and in timer callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One client session with a debug adapter.
///
/// `Session` is a cheap handle; clones share the same state. All protocol
/// work (decoding, ledger updates, routing) is serialised behind one lock,
/// and handlers and callbacks are always run after that lock is released.
///
/// # Example
///
/// ```
/// use session::{Session, SessionId};
/// use transport::RequestBody;
///
/// let session = Session::builder(SessionId(1)).build(Vec::new());
/// let seq = session.send_request(
///     RequestBody::new("initialize"),
///     Some(Box::new(|response| println!("initialized: {:?}", response.body))),
///     None,
///     None,
/// );
/// assert_eq!(seq, 1);
/// assert_eq!(session.pending_count(), 1);
/// session.shutdown();
/// assert_eq!(session.pending_count(), 0);
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    id: SessionId,
    config: SessionConfig,
    timers: Arc<dyn TimerFacility>,
    notifier: Arc<dyn Notifier>,
    internals: Mutex<SessionInternals>,
}

struct SessionInternals {
    // `None` once the session has been shut down
    writer: Option<Box<dyn Write + Send>>,
    handlers: Option<HandlerChain>,

    decoder: FrameDecoder,
    ledger: Ledger,
}

enum Step {
    Idle,
    Routed(Option<Completion>),
}

pub struct SessionBuilder {
    id: SessionId,
    config: SessionConfig,
    handlers: Vec<Arc<dyn Handler>>,
    timers: Option<Arc<dyn TimerFacility>>,
    notifier: Arc<dyn Notifier>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a handler to the chain. Handlers are consulted in the order
    /// they were added.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Use a shared timer facility instead of starting a new [`ThreadTimers`].
    pub fn timers(mut self, timers: Arc<dyn TimerFacility>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Create the session around the transport's write half.
    pub fn build(self, writer: impl Write + Send + 'static) -> Session {
        let timers = self
            .timers
            .unwrap_or_else(|| Arc::new(ThreadTimers::new()));

        let internals = SessionInternals {
            writer: Some(Box::new(writer)),
            handlers: Some(HandlerChain::new(self.handlers)),
            decoder: FrameDecoder::with_max_size(self.config.max_message_size),
            ledger: Ledger::new(),
        };

        Session {
            shared: Arc::new(Shared {
                id: self.id,
                config: self.config,
                timers,
                notifier: self.notifier,
                internals: Mutex::new(internals),
            }),
        }
    }
}

impl Session {
    pub fn builder(id: SessionId) -> SessionBuilder {
        SessionBuilder {
            id,
            config: SessionConfig::default(),
            handlers: Vec::new(),
            timers: None,
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.with_internals(|internals| internals.ledger.len())
    }

    /// The sequence number the next outgoing message will be given.
    pub fn next_seq(&self) -> Seq {
        self.with_internals(|internals| internals.ledger.next_seq())
    }

    pub fn is_closed(&self) -> bool {
        self.with_internals(|internals| internals.writer.is_none())
    }

    /// Send a request without waiting for its response.
    ///
    /// The request is given the next sequence number, which is returned.
    /// Exactly one of `on_success` or `on_failure` runs later: on the
    /// adapter's response, when `timeout` (default
    /// [`SessionConfig::async_timeout`]) elapses, or at shutdown. Without an
    /// `on_failure`, failed responses are offered to the handler chain and
    /// aborted requests are reported through the notifier.
    ///
    /// If the transport cannot be written to, the request fails with
    /// [`REASON_SEND_FAILED`] before this returns.
    #[tracing::instrument(skip_all, fields(session = %self.id(), command = %body.command))]
    pub fn send_request(
        &self,
        body: RequestBody,
        on_success: Option<SuccessHandler>,
        on_failure: Option<FailureHandler>,
        timeout: Option<Duration>,
    ) -> Seq {
        let timeout = timeout.unwrap_or_else(|| self.shared.config.async_timeout());

        let (seq, completion) = self.with_internals(|internals| {
            let seq = internals.ledger.allocate();
            let request = Request::from_body(seq, body);
            let timer = self.start_timer(timeout);

            internals.ledger.insert(PendingRequest {
                request: request.clone(),
                on_success,
                on_failure,
                timer: Some(timer),
            });

            let completion = match internals.write(&Message::Request(request)) {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(error = %e, seq, "unable to send request");
                    internals
                        .ledger
                        .take(seq)
                        .map(|entry| ledger::abort(entry, REASON_SEND_FAILED))
                }
            };
            (seq, completion)
        });

        if let Some(completion) = completion {
            completion.run(self);
        }
        seq
    }

    /// Send a request and wait for its outcome.
    ///
    /// Waits at most `timeout` (default [`SessionConfig::sync_timeout`]) plus
    /// [`SessionConfig::blocking_grace`]. Responses keep being processed by
    /// whichever thread feeds [`Session::on_bytes_received`] while this one
    /// waits, so this must not be called from that thread (for example from
    /// inside a [`Handler`]): it would then only ever see the timeout.
    #[tracing::instrument(skip_all, fields(session = %self.id(), command = %body.command))]
    pub fn send_request_blocking(
        &self,
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<Response, SessionError> {
        let timeout = timeout.unwrap_or_else(|| self.shared.config.sync_timeout());
        let command = body.command.clone();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let failure_tx = tx.clone();

        self.send_request(
            body,
            Some(Box::new(move |response| {
                let _ = tx.try_send(Ok(response));
            })),
            Some(Box::new(move |reason, response| {
                let _ = failure_tx.try_send(Err(SessionError::RequestFailed {
                    reason,
                    response: response.map(Box::new),
                }));
            })),
            Some(timeout),
        );

        let waited = timeout + self.shared.config.blocking_grace();
        match rx.recv_timeout(waited) {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(?waited, "no response");
                Err(SessionError::NoResponse { command, waited })
            }
        }
    }

    /// Answer a reverse request from the adapter.
    ///
    /// `error` marks the response as failed and becomes its `message`.
    /// Responses are not acknowledged, so nothing is tracked.
    #[tracing::instrument(skip_all, fields(session = %self.id(), command = %request.command))]
    pub fn send_response(
        &self,
        request: &Request,
        error: Option<&str>,
        body: Option<Value>,
    ) -> Result<(), SessionError> {
        self.with_internals(|internals| {
            let response = Response {
                seq: internals.ledger.allocate(),
                request_seq: request.seq,
                success: error.is_none(),
                command: request.command.clone(),
                message: error.map(str::to_string),
                body,
            };
            internals.write(&Message::Response(response))
        })
        .inspect_err(|e| tracing::warn!(error = %e, "unable to send response"))
    }

    /// Feed bytes received from the adapter.
    ///
    /// Every complete message in the buffered data is decoded and routed, in
    /// order, with each one's handlers finishing before the next message is
    /// decoded. A message that fails to decode is dropped and its error
    /// returned; any messages after it stay buffered and are processed on the
    /// next call (which may pass an empty chunk).
    #[tracing::instrument(skip_all, fields(session = %self.id(), len = chunk.len()))]
    pub fn on_bytes_received(&self, chunk: &[u8]) -> Result<(), SessionError> {
        self.with_internals(|internals| internals.decoder.extend(chunk));

        loop {
            let step = self.with_internals(|internals| -> Result<Step, SessionError> {
                let Some(body) = internals.decoder.next_frame() else {
                    return Ok(Step::Idle);
                };
                let message = codec::decode(&body)?;
                tracing::debug!(?message, "message received");
                let SessionInternals {
                    ledger, handlers, ..
                } = internals;
                Ok(Step::Routed(dispatch::dispatch(
                    ledger,
                    handlers.as_ref(),
                    message,
                )))
            })?;

            match step {
                Step::Idle => return Ok(()),
                Step::Routed(Some(completion)) => completion.run(self),
                Step::Routed(None) => {}
            }
        }
    }

    /// Time out the request whose timer is `timer_id`.
    ///
    /// Timer ids that no longer belong to an outstanding request (the
    /// response won the race, or the session was shut down) are ignored.
    #[tracing::instrument(skip(self), fields(session = %self.id()))]
    pub fn on_timer_fired(&self, timer_id: TimerId) {
        let completion = self.with_internals(|internals| {
            internals
                .ledger
                .take_by_timer(timer_id)
                .map(|entry| ledger::abort(entry, REASON_TIMEOUT))
        });

        match completion {
            Some(completion) => completion.run(self),
            None => tracing::trace!("stale timer"),
        }
    }

    /// Disconnect from the transport and fail every outstanding request.
    ///
    /// Nothing can be sent or dispatched afterwards. Each outstanding request
    /// fails once with [`REASON_CLOSING_DOWN`]. Calling this again does
    /// nothing.
    #[tracing::instrument(skip(self), fields(session = %self.id()))]
    pub fn shutdown(&self) {
        let completions: Vec<_> = self.with_internals(|internals| {
            if internals.writer.take().is_some() {
                tracing::info!("shutting down session");
            }
            internals.handlers = None;
            internals
                .ledger
                .drain()
                .into_iter()
                .map(|entry| ledger::abort(entry, REASON_CLOSING_DOWN))
                .collect()
        });

        for completion in completions {
            completion.run(self);
        }
    }

    pub(crate) fn notify(&self, message: &str) {
        self.shared.notifier.notify(message);
    }

    fn start_timer(&self, duration: Duration) -> TimerToken {
        let owner: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.timers.start(
            duration,
            Box::new(move |timer_id| {
                if let Some(shared) = owner.upgrade() {
                    Session { shared }.on_timer_fired(timer_id);
                }
            }),
        )
    }

    fn with_internals<R>(&self, f: impl FnOnce(&mut SessionInternals) -> R) -> R {
        tracing::trace!("taking lock");
        let mut internals: MutexGuard<'_, SessionInternals> = self
            .shared
            .internals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let res = f(&mut internals);
        tracing::trace!("releasing lock");
        res
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id()).finish()
    }
}

impl SessionInternals {
    fn write(&mut self, message: &Message) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::Closed)?;
        let bytes = codec::encode(message)?;
        tracing::debug!(?message, "sending message");
        writer.write_all(&bytes).map_err(SessionError::Write)?;
        writer.flush().map_err(SessionError::Write)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use transport::{Event, testing::frame_message};

    use super::*;
    use crate::testing::{ManualTimers, RecordingNotifier, SharedWriter};

    struct Fixture {
        session: Session,
        writer: SharedWriter,
        timers: ManualTimers,
        notices: Arc<RecordingNotifier>,
    }

    fn fixture(handlers: Vec<Arc<dyn Handler>>) -> Fixture {
        let writer = SharedWriter::new();
        let timers = ManualTimers::new();
        let notices = Arc::new(RecordingNotifier::default());
        let mut builder = Session::builder(SessionId(1))
            .timers(Arc::new(timers.clone()))
            .notifier(notices.clone());
        for handler in handlers {
            builder = builder.handler(handler);
        }
        Fixture {
            session: builder.build(writer.clone()),
            writer,
            timers,
            notices,
        }
    }

    type Outcomes = Arc<Mutex<Vec<Result<Response, (String, Option<Response>)>>>>;

    fn send(session: &Session, command: &str, outcomes: &Outcomes) -> Seq {
        let ok = Arc::clone(outcomes);
        let failed = Arc::clone(outcomes);
        session.send_request(
            RequestBody::new(command),
            Some(Box::new(move |r| ok.lock().unwrap().push(Ok(r)))),
            Some(Box::new(move |reason, r| {
                failed.lock().unwrap().push(Err((reason, r)))
            })),
            None,
        )
    }

    fn response(request_seq: Seq, success: bool) -> Vec<u8> {
        frame_message(&json!({
            "seq": 100 + request_seq,
            "type": "response",
            "request_seq": request_seq,
            "command": "threads",
            "success": success,
            "body": {"threads": []},
        }))
    }

    #[test]
    fn requests_are_written_with_increasing_seq() {
        let f = fixture(vec![]);
        let outcomes = Outcomes::default();

        let seqs: Vec<_> = ["initialize", "launch", "threads"]
            .iter()
            .map(|c| send(&f.session, c, &outcomes))
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let written = f.writer.messages();
        assert_eq!(written.len(), 3);
        for (message, seq) in written.iter().zip(1..) {
            assert!(matches!(message, Message::Request(r) if r.seq == seq));
        }
    }

    #[test]
    fn default_timeout_is_async_timeout() {
        let f = fixture(vec![]);
        send(&f.session, "threads", &Outcomes::default());

        let timer = f.timers.active()[0];
        assert_eq!(
            f.timers.duration(timer),
            Some(f.session.config().async_timeout())
        );
    }

    #[test]
    fn response_resolves_and_cancels_timer() {
        let f = fixture(vec![]);
        let outcomes = Outcomes::default();
        let seq = send(&f.session, "threads", &outcomes);
        let timer = f.timers.active()[0];

        f.session.on_bytes_received(&response(seq, true)).unwrap();

        assert!(matches!(&outcomes.lock().unwrap()[..], [Ok(r)] if r.request_seq == seq));
        assert!(f.timers.is_cancelled(timer));
        assert_eq!(f.session.pending_count(), 0);
    }

    #[test]
    fn failed_response_goes_to_failure_handler() {
        let f = fixture(vec![]);
        let outcomes = Outcomes::default();
        let seq = send(&f.session, "evaluate", &outcomes);

        let frame = frame_message(&json!({
            "seq": 5, "type": "response", "request_seq": seq, "command": "evaluate",
            "success": false, "message": "evaluation failed",
        }));
        f.session.on_bytes_received(&frame).unwrap();

        let outcomes = outcomes.lock().unwrap();
        match &outcomes[..] {
            [Err((reason, Some(r)))] => {
                assert_eq!(reason, "evaluation failed");
                assert_eq!(r.request_seq, seq);
            }
            other => panic!("unexpected outcomes {other:?}"),
        }
    }

    #[test]
    fn timer_fires_once_then_response_is_duplicate() {
        let f = fixture(vec![]);
        let outcomes = Outcomes::default();
        let seq = send(&f.session, "threads", &outcomes);
        let timer = f.timers.active()[0];

        assert!(f.timers.fire(timer));
        f.session.on_timer_fired(timer);
        f.session.on_bytes_received(&response(seq, true)).unwrap();

        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(&outcomes[..], [Err((reason, None))] if reason == "Timeout"));
        assert_eq!(
            f.notices.messages(),
            vec![format!("Protocol error: duplicate response for request {seq}")]
        );
    }

    #[test]
    fn send_failure_aborts_immediately() {
        let f = fixture(vec![]);
        f.writer.fail_writes(true);
        let outcomes = Outcomes::default();
        send(&f.session, "threads", &outcomes);

        assert!(
            matches!(&outcomes.lock().unwrap()[..], [Err((reason, None))] if reason == "Unable to send message")
        );
        assert_eq!(f.session.pending_count(), 0);
        assert!(f.timers.active().is_empty());
        assert!(!f.session.is_closed());
    }

    #[test]
    fn send_response_echoes_request() {
        let f = fixture(vec![]);
        let request = Request {
            seq: 7,
            command: "runInTerminal".to_string(),
            arguments: None,
        };

        f.session
            .send_response(&request, None, Some(json!({"processId": 42})))
            .unwrap();
        f.session
            .send_response(&request, Some("not supported"), None)
            .unwrap();

        let written = f.writer.messages();
        match &written[..] {
            [Message::Response(ok), Message::Response(err)] => {
                assert_eq!((ok.seq, ok.request_seq, ok.success), (1, 7, true));
                assert_eq!(ok.command, "runInTerminal");
                assert_eq!(ok.message, None);
                assert_eq!((err.seq, err.success), (2, false));
                assert_eq!(err.message.as_deref(), Some("not supported"));
            }
            other => panic!("unexpected messages {other:?}"),
        }
        assert_eq!(f.session.pending_count(), 0);
    }

    #[test]
    fn send_response_after_shutdown_is_closed() {
        let f = fixture(vec![]);
        f.session.shutdown();
        let request = Request {
            seq: 1,
            command: "runInTerminal".to_string(),
            arguments: None,
        };
        assert!(matches!(
            f.session.send_response(&request, None, None),
            Err(SessionError::Closed)
        ));
    }

    struct Claims(&'static str);

    impl Handler for Claims {
        fn try_handle_event(&self, session: &Session, name: &str, _event: &Event) -> bool {
            if name == self.0 {
                session.send_request(RequestBody::new("configurationDone"), None, None, None);
                return true;
            }
            false
        }
    }

    #[test]
    fn handlers_may_send_from_inside_dispatch() {
        let f = fixture(vec![Arc::new(Claims("initialized"))]);

        f.session
            .on_bytes_received(&frame_message(
                &json!({"seq": 1, "type": "event", "event": "initialized"}),
            ))
            .unwrap();

        assert!(matches!(
            &f.writer.messages()[..],
            [Message::Request(r)] if r.command == "configurationDone"
        ));
    }

    #[test]
    fn decode_error_keeps_following_frames() {
        let f = fixture(vec![]);
        let outcomes = Outcomes::default();
        let seq = send(&f.session, "threads", &outcomes);

        let mut data = b"Content-Length: 5\r\n\r\n{oops".to_vec();
        data.extend(response(seq, true));

        assert!(matches!(
            f.session.on_bytes_received(&data),
            Err(SessionError::Codec(_))
        ));
        assert!(outcomes.lock().unwrap().is_empty());

        f.session.on_bytes_received(&[]).unwrap();
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let f = fixture(vec![]);
        let outcomes = Outcomes::default();
        send(&f.session, "threads", &outcomes);
        let timer = f.timers.active()[0];

        f.session.shutdown();
        f.session.shutdown();
        f.session.on_timer_fired(timer);

        assert!(f.session.is_closed());
        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(&outcomes[..], [Err((reason, None))] if reason == "Closing down"));
    }
}
