//! Encoding envelopes to wire frames and decoding frame bodies to envelopes.
//!
//! DAP uses a simple Content-Length header protocol:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::message::Message;

/// Serialize a message and frame it for the wire.
///
/// The advertised length is the byte length of the UTF-8 payload.
pub fn encode(message: &Message) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(message).map_err(CodecError::JsonSerialize)?;

    let mut dst = BytesMut::with_capacity(32 + json.len());
    dst.put_slice(b"Content-Length: ");
    dst.put_slice(json.len().to_string().as_bytes());
    dst.put_slice(b"\r\n\r\n");
    dst.put_slice(&json);

    Ok(dst.freeze())
}

/// Parse a frame body into a message.
///
/// Adapters are not always strict about JSON: raw control characters inside
/// string literals (typically unescaped newlines in `output` events) are
/// accepted.
pub fn decode(body: &[u8]) -> Result<Message, CodecError> {
    let text = std::str::from_utf8(body).map_err(|e| {
        tracing::error!(error = %e, len = body.len(), "message body is not valid UTF-8");
        CodecError::InvalidUtf8
    })?;
    let text = relax_control_characters(text);

    serde_json::from_str(&text).map_err(|e| {
        tracing::error!(error = %e, body = %text, "invalid message received");
        CodecError::JsonDeserialize(e)
    })
}

/// Escape control characters that appear unescaped inside JSON strings.
///
/// Text outside string literals is left alone, as are characters that are
/// already part of an escape sequence. Borrows the input when nothing needs
/// escaping.
pub fn relax_control_characters(text: &str) -> Cow<'_, str> {
    let needs_escaping = text.chars().any(|c| c.is_ascii_control() && c != '\x7f');
    if !needs_escaping {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }

        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}
