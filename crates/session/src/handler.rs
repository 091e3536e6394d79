//! Capability handlers for inbound events, reverse requests and failures.
//!
//! A session holds an ordered [`HandlerChain`]. Each inbound event or reverse
//! request is offered to the handlers in registration order until one reports
//! that it handled it; the rest of the chain is then skipped. A handler that
//! has no interest in a message simply returns `false`, which is what the
//! default methods do.

use std::fmt;
use std::sync::Arc;

use transport::{Event, Request, Response};

use crate::session::Session;

pub trait Handler: Send + Sync {
    /// Offered every event; `name` is the event name (`stopped`, `output`...).
    fn try_handle_event(&self, _session: &Session, _name: &str, _event: &Event) -> bool {
        false
    }

    /// Offered every reverse request; `command` is the request's command.
    fn try_handle_request(&self, _session: &Session, _command: &str, _request: &Request) -> bool {
        false
    }

    /// Offered failed responses to requests sent without a failure handler.
    fn try_handle_failure(
        &self,
        _session: &Session,
        _reason: &str,
        _request: &Request,
        _response: &Response,
    ) -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn Handler>]>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    /// Returns whether some handler took the event.
    pub(crate) fn dispatch_event(&self, session: &Session, event: &Event) -> bool {
        self.handlers
            .iter()
            .any(|h| h.try_handle_event(session, &event.event, event))
    }

    pub(crate) fn dispatch_request(&self, session: &Session, request: &Request) -> bool {
        self.handlers
            .iter()
            .any(|h| h.try_handle_request(session, &request.command, request))
    }

    pub(crate) fn dispatch_failure(
        &self,
        session: &Session,
        reason: &str,
        request: &Request,
        response: &Response,
    ) -> bool {
        self.handlers
            .iter()
            .any(|h| h.try_handle_failure(session, reason, request, response))
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.handlers.len())
            .finish()
    }
}
