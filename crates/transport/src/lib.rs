//! DAP wire transport
//!
//! This crate turns a byte stream into protocol envelopes and back:
//!
//! - [`FrameDecoder`] incrementally extracts `Content-Length` framed bodies
//!   from arbitrarily split chunks
//! - [`codec::encode`] and [`codec::decode`] convert between [`Message`]s and
//!   wire bytes
//! - [`io`] provides the byte transports (TCP, in-memory) a session runs over
//!
//! Request/response correlation and event routing live in the `session`
//! crate.
pub mod codec;
mod error;
pub mod frame;
pub mod io;
mod message;
pub mod testing;

pub use error::CodecError;
pub use frame::{DecoderState, FrameDecoder};
pub use io::{DapTransport, InMemoryTransport, TcpTransport};
pub use message::{ErrorDetail, Event, Message, Request, RequestBody, Response, Seq};
