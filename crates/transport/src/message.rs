//! DAP envelope types.
//!
//! Every message on the wire is one of three envelopes, discriminated by the
//! `type` field. Only the envelope fields are modelled here; command
//! arguments and bodies stay as opaque [`serde_json::Value`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequence number type for message ordering and request-response correlation.
pub type Seq = i64;

/// One protocol message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A request, either sent by us or a reverse request from the adapter.
    Request(Request),
    /// A response to a previously sent request.
    Response(Response),
    /// An asynchronous notification.
    Event(Event),
}

impl Message {
    /// Sequence number assigned by the sender of this message.
    pub fn seq(&self) -> Seq {
        match self {
            Message::Request(r) => r.seq,
            Message::Response(r) => r.seq,
            Message::Event(e) => e.seq,
        }
    }
}

/// A request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    /// Stamp a request body with the sequence number it is sent under.
    pub fn from_body(seq: Seq, body: RequestBody) -> Self {
        Self {
            seq,
            command: body.command,
            arguments: body.arguments,
        }
    }
}

/// A response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub seq: Seq,
    /// Sequence number of the request this response is for.
    pub request_seq: Seq,
    pub success: bool,
    /// Echo of the request's command.
    pub command: String,
    /// Error message, present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// The structured error embedded in a failed response body, if any.
    ///
    /// Adapters may send `body.error = { format, variables }` so that the
    /// human readable text can be rendered client side. Returns `None` when
    /// there is no `error` object and an error when it has the wrong shape.
    pub fn error_detail(&self) -> Option<Result<ErrorDetail, serde_json::Error>> {
        let error = self.body.as_ref()?.get("error")?;
        Some(serde_json::from_value(error.clone()))
    }
}

/// The `error` object carried in a failed response body.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub variables: serde_json::Map<String, Value>,
}

/// An event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: Seq,
    /// The event name, e.g. `stopped`.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// The caller's half of an outgoing request.
///
/// It deliberately has no `seq` or `type`: the session assigns both when the
/// request is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub command: String,
    pub arguments: Option<Value>,
}

impl RequestBody {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}
