//! Routing of decoded inbound messages.
//!
//! Routing happens with the session locked, but nothing user supplied runs
//! there: the router only decides what should happen and returns it as a
//! [`Completion`]. The session runs completions after releasing its lock, so
//! handlers and callbacks are free to send further requests.

use transport::{Event, Message, Request, Response};

use crate::handler::HandlerChain;
use crate::ledger::{self, FailureHandler, Ledger, SuccessHandler};
use crate::session::Session;

/// Deferred work produced while the session was locked.
pub(crate) enum Completion {
    Succeeded {
        on_success: SuccessHandler,
        response: Response,
    },
    Failed {
        on_failure: FailureHandler,
        reason: String,
        response: Option<Response>,
    },
    /// A failed response whose request had no failure handler: offered to
    /// the handler chain's failure capability.
    Unhandled {
        handlers: HandlerChain,
        reason: String,
        request: Request,
        response: Response,
    },
    Notify(String),
    Event {
        handlers: HandlerChain,
        event: Event,
    },
    ReverseRequest {
        handlers: HandlerChain,
        request: Request,
    },
}

impl Completion {
    pub(crate) fn run(self, session: &Session) {
        match self {
            Completion::Succeeded {
                on_success,
                response,
            } => on_success(response),
            Completion::Failed {
                on_failure,
                reason,
                response,
            } => on_failure(reason, response),
            Completion::Unhandled {
                handlers,
                reason,
                request,
                response,
            } => {
                if !handlers.dispatch_failure(session, &reason, &request, &response) {
                    tracing::debug!(%reason, command = %request.command, "no handler took the failure");
                }
            }
            Completion::Notify(message) => session.notify(&message),
            Completion::Event { handlers, event } => {
                if !handlers.dispatch_event(session, &event) {
                    tracing::trace!(event = %event.event, "event ignored");
                }
            }
            Completion::ReverseRequest { handlers, request } => {
                if !handlers.dispatch_request(session, &request) {
                    tracing::debug!(command = %request.command, "reverse request ignored");
                }
            }
        }
    }
}

/// Route one decoded message.
///
/// `handlers` is `None` once the session has been torn down, in which case
/// the message is dropped.
pub(crate) fn dispatch(
    ledger: &mut Ledger,
    handlers: Option<&HandlerChain>,
    message: Message,
) -> Option<Completion> {
    let Some(handlers) = handlers else {
        tracing::debug!(seq = message.seq(), "session closed, dropping message");
        return None;
    };

    match message {
        Message::Response(response) => match ledger.take(response.request_seq) {
            Some(entry) => ledger::resolve(entry, response, handlers),
            None => {
                tracing::error!(?response, "duplicate or unexpected response");
                Some(Completion::Notify(format!(
                    "Protocol error: duplicate response for request {}",
                    response.request_seq
                )))
            }
        },
        Message::Event(event) => Some(Completion::Event {
            handlers: handlers.clone(),
            event,
        }),
        Message::Request(request) => Some(Completion::ReverseRequest {
            handlers: handlers.clone(),
            request,
        }),
    }
}
