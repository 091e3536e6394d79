//! User-visible notices.
//!
//! Protocol anomalies that are not fatal, such as a duplicate response or an
//! aborted request nobody was waiting on, must still reach the user. Hosts
//! plug their message area in here.

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes notices to the log. Used when the host does not provide a sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::warn!(%message, "user notice");
    }
}

/// Forward notices to a channel, e.g. one drained by a UI thread.
impl Notifier for crossbeam_channel::Sender<String> {
    fn notify(&self, message: &str) {
        if self.send(message.to_string()).is_err() {
            tracing::warn!(%message, "notice receiver has gone away");
        }
    }
}
