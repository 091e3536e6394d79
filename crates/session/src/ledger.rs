//! Outstanding request bookkeeping.
//!
//! The ledger hands out sequence numbers and remembers, per request, what to
//! call once the adapter answers. An entry leaves the ledger exactly once:
//! on its response, on its timeout, on a send failure or at shutdown. Each of
//! these removals cancels the entry's timer.

use std::collections::{BTreeMap, HashMap};

use transport::{Request, Response, Seq};

use crate::dispatch::Completion;
use crate::handler::HandlerChain;
use crate::template;
use crate::timer::{TimerId, TimerToken};

/// Reason given to failure handlers when a request times out.
pub const REASON_TIMEOUT: &str = "Timeout";
/// Reason given when the request could not be written to the transport.
pub const REASON_SEND_FAILED: &str = "Unable to send message";
/// Reason given to requests still outstanding at shutdown.
pub const REASON_CLOSING_DOWN: &str = "Closing down";

/// Called with the full response when a request succeeds.
pub type SuccessHandler = Box<dyn FnOnce(Response) + Send + 'static>;

/// Called with a reason and, if the adapter answered, its response.
pub type FailureHandler = Box<dyn FnOnce(String, Option<Response>) + Send + 'static>;

pub(crate) struct PendingRequest {
    pub(crate) request: Request,
    pub(crate) on_success: Option<SuccessHandler>,
    pub(crate) on_failure: Option<FailureHandler>,
    pub(crate) timer: Option<TimerToken>,
}

impl PendingRequest {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

pub(crate) struct Ledger {
    next_seq: Seq,
    pending: BTreeMap<Seq, PendingRequest>,
    timers: HashMap<TimerId, Seq>,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: 1,
            pending: BTreeMap::new(),
            timers: HashMap::new(),
        }
    }

    /// The sequence number the next outgoing message will get.
    pub(crate) fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// Reserve a sequence number. Numbers are never reused.
    pub(crate) fn allocate(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn insert(&mut self, entry: PendingRequest) {
        let seq = entry.request.seq;
        debug_assert!(seq < self.next_seq, "sequence number {seq} was not allocated");
        if let Some(timer) = &entry.timer {
            self.timers.insert(timer.id(), seq);
        }
        self.pending.insert(seq, entry);
    }

    /// Remove the entry for `seq`, cancelling its timer.
    pub(crate) fn take(&mut self, seq: Seq) -> Option<PendingRequest> {
        let mut entry = self.pending.remove(&seq)?;
        if let Some(timer) = &entry.timer {
            self.timers.remove(&timer.id());
        }
        entry.cancel_timer();
        Some(entry)
    }

    /// Remove the entry whose timeout timer is `timer_id`.
    pub(crate) fn take_by_timer(&mut self, timer_id: TimerId) -> Option<PendingRequest> {
        let seq = self.timers.remove(&timer_id)?;
        self.take(seq)
    }

    /// Remove every entry, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.timers.clear();
        std::mem::take(&mut self.pending)
            .into_values()
            .map(|mut entry| {
                entry.cancel_timer();
                entry
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Decide what to run for a response that matched `entry`.
pub(crate) fn resolve(
    entry: PendingRequest,
    response: Response,
    handlers: &HandlerChain,
) -> Option<Completion> {
    let PendingRequest {
        request,
        on_success,
        on_failure,
        ..
    } = entry;

    if response.success {
        return on_success.map(|on_success| Completion::Succeeded {
            on_success,
            response,
        });
    }

    let reason = failure_reason(&response);
    match on_failure {
        Some(on_failure) => {
            tracing::info!(%reason, command = %request.command, "request failed (handled)");
            Some(Completion::Failed {
                on_failure,
                reason,
                response: Some(response),
            })
        }
        None => {
            tracing::error!(%reason, command = %request.command, "request failed (unhandled)");
            Some(Completion::Unhandled {
                handlers: handlers.clone(),
                reason,
                request,
                response,
            })
        }
    }
}

/// Decide what to run for a request that will never get its response.
pub(crate) fn abort(mut entry: PendingRequest, reason: &str) -> Completion {
    tracing::debug!(%reason, request = ?entry.request, "aborting request");
    entry.cancel_timer();

    match entry.on_failure {
        Some(on_failure) => Completion::Failed {
            on_failure,
            reason: reason.to_string(),
            response: None,
        },
        None => Completion::Notify(format!(
            "Request for {} aborted: {}",
            entry.request.command, reason
        )),
    }
}

/// Human readable reason for a failed response.
///
/// Prefers a rendered `body.error.format` template, falling back to the
/// response's `message`.
pub(crate) fn failure_reason(response: &Response) -> String {
    let reason = response.message.clone().unwrap_or_default();

    let detail = match response.error_detail() {
        None => return reason,
        Some(Ok(detail)) => detail,
        Some(Err(e)) => {
            tracing::error!(error = %e, "malformed error detail, using default");
            return reason;
        }
    };
    let Some(format) = detail.format else {
        tracing::debug!(error = ?detail, "error detail without a format string");
        return reason;
    };

    match template::render(&format, &detail.variables) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::error!(error = %e, %format, "failed to render error, using default");
            reason
        }
    }
}
