//! DAP client session
//!
//! A [`Session`] sits on top of the wire transport and gives a debugger front
//! end the request/response half of the protocol:
//!
//! - every outgoing request gets a fresh sequence number and a ledger entry
//!   holding its success and failure handlers
//! - responses are correlated back to their entry, and each entry is resolved
//!   exactly once: by its response, its timeout, a send failure or shutdown
//! - events and reverse requests are offered to an ordered [`HandlerChain`]
//!
//! [`Connection`] runs a session over a [`transport::DapTransport`].
mod config;
mod connection;
mod dispatch;
mod error;
mod handler;
mod ledger;
mod notify;
mod session;
pub mod template;
pub mod testing;
pub mod timer;

pub use config::SessionConfig;
pub use connection::Connection;
pub use error::SessionError;
pub use handler::{Handler, HandlerChain};
pub use ledger::{
    FailureHandler, REASON_CLOSING_DOWN, REASON_SEND_FAILED, REASON_TIMEOUT, SuccessHandler,
};
pub use notify::{Notifier, TracingNotifier};
pub use session::{Session, SessionBuilder, SessionId};
pub use timer::{ThreadTimers, TimerFacility, TimerId, TimerToken};
