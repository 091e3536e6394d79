//! Incremental `Content-Length` framing.
//!
//! [`FrameDecoder`] is fed arbitrary chunks of bytes as they arrive and hands
//! back complete message bodies. It is a two state machine:
//!
//! ```text
//!   ReadingHeader --(\r\n\r\n found)--> ReadingBody --(Content-Length bytes)--> ReadingHeader
//!         ^                                  |
//!         +------(framing error: reset)------+
//! ```
//!
//! A framing error (missing, unparseable or oversized `Content-Length`) has no
//! reliable resynchronisation point, so the whole buffer is discarded and the
//! decoder starts again from the next header block it sees.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

/// Default maximum message size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Header blocks longer than this without a terminating blank line are
/// treated as a framing error.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Which part of a frame the decoder is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    ReadingHeader,
    ReadingBody,
}

#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    buffer: BytesMut,
    headers: HashMap<String, String>,
    max_message_size: usize,
    // how far the buffer has been searched for the header terminator
    scanned: usize,
}

enum BodyProgress {
    Frame(Bytes),
    Incomplete,
    Reset,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a decoder that rejects bodies larger than `max_message_size`.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            state: DecoderState::ReadingHeader,
            buffer: BytesMut::new(),
            headers: HashMap::new(),
            max_message_size,
            scanned: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Bytes received but not yet consumed as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete body, if one is available.
    ///
    /// Returns `None` when more data is needed, or when a framing error has
    /// just reset the decoder. Partial progress is kept between calls, so a
    /// header and body may arrive split across any number of chunks.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                DecoderState::ReadingHeader => {
                    if !self.read_headers() {
                        return None;
                    }
                }
                DecoderState::ReadingBody => match self.read_body() {
                    BodyProgress::Frame(body) => return Some(body),
                    BodyProgress::Incomplete | BodyProgress::Reset => return None,
                },
            }
        }
    }

    fn set_state(&mut self, state: DecoderState) {
        self.state = state;
        if state == DecoderState::ReadingHeader {
            self.headers.clear();
        }
    }

    fn read_headers(&mut self) -> bool {
        let Some(header_end) = self.find_header_end() else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                tracing::error!(
                    size = self.buffer.len(),
                    max = MAX_HEADER_SIZE,
                    "no end of header block found"
                );
                self.reset();
            }
            return false;
        };

        self.scanned = 0;
        let block = self.buffer.split_to(header_end + HEADER_TERMINATOR.len());
        self.headers.extend(parse_headers(&block[..header_end]));
        self.set_state(DecoderState::ReadingBody);
        true
    }

    fn read_body(&mut self) -> BodyProgress {
        let content_length = match self.headers.get(CONTENT_LENGTH) {
            None => {
                tracing::error!(headers = ?self.headers, "missing Content-Length header");
                self.reset();
                return BodyProgress::Reset;
            }
            Some(value) => match value.parse::<usize>() {
                Ok(length) if length <= self.max_message_size => length,
                Ok(length) => {
                    tracing::error!(
                        size = length,
                        max = self.max_message_size,
                        "message size exceeds maximum allowed"
                    );
                    self.reset();
                    return BodyProgress::Reset;
                }
                Err(e) => {
                    tracing::error!(%value, error = %e, "malformed Content-Length header");
                    self.reset();
                    return BodyProgress::Reset;
                }
            },
        };

        if self.buffer.len() < content_length {
            self.buffer.reserve(content_length - self.buffer.len());
            return BodyProgress::Incomplete;
        }

        let body = self.buffer.split_to(content_length).freeze();
        self.set_state(DecoderState::ReadingHeader);
        BodyProgress::Frame(body)
    }

    /// Find the header/body separator, resuming where the last search stopped.
    fn find_header_end(&mut self) -> Option<usize> {
        let start = self.scanned;
        let found = self.buffer[start..]
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR);
        match found {
            Some(position) => Some(start + position),
            None => {
                // a terminator may straddle the end of the buffer
                self.scanned = self
                    .buffer
                    .len()
                    .saturating_sub(HEADER_TERMINATOR.len() - 1);
                None
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.set_state(DecoderState::ReadingHeader);
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a header block (without its terminating blank line).
///
/// Lines are separated by CRLF and split on their first colon; values are
/// trimmed. Some adapters leak unrelated output onto the stream ahead of a
/// header, which shows up as a bare line feed inside a header line: only the
/// text after the last bare line feed is kept. Blank lines and lines without
/// a colon are skipped.
pub fn parse_headers(block: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(block);
    let mut headers = HashMap::new();

    for line in text.split("\r\n") {
        let line = match line.rsplit_once('\n') {
            Some((_, tail)) => tail,
            None => line,
        };

        if line.trim().is_empty() {
            continue;
        }

        match line.split_once(':') {
            Some((key, value)) => {
                headers.insert(key.to_string(), value.trim().to_string());
            }
            None => tracing::warn!(%line, "ignoring header line without a colon"),
        }
    }

    headers
}
