//! Logical (decoded) form of an event-stream message.

use bytes::Bytes;

/// A typed header value.
///
/// The wire format defines more value types; the streaming transcription
/// protocol only ever uses these three, and anything else on the wire is
/// rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// UTF-8 string, 2-byte length prefix.
    String(String),
    /// Big-endian 32-bit signed integer.
    Int32(i32),
    /// Opaque bytes, 2-byte length prefix.
    ByteArray(Bytes),
}

impl HeaderValue {
    /// The string contents, if this is a string header.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded event-stream message: ordered headers plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventStreamMessage {
    /// Headers in wire order. Names are case-sensitive ASCII.
    pub headers: Vec<(String, HeaderValue)>,
    /// The message payload; JSON for transcript and exception events, PCM
    /// bytes for audio events.
    pub body: Bytes,
}

impl EventStreamMessage {
    /// Build a message from headers and payload.
    pub fn new(headers: Vec<(String, HeaderValue)>, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Look up a header by exact name.
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name == name)
            .map(|(_, value)| value)
    }

    /// The `:message-type` header, when present and a string.
    pub fn message_type(&self) -> Option<&str> {
        self.header(":message-type").and_then(HeaderValue::as_str)
    }

    /// Wrap PCM bytes as an outbound `AudioEvent` message.
    ///
    /// An empty payload is the sentinel that asks the far end to flush
    /// outstanding transcripts and close the stream.
    pub fn audio_event(pcm: Bytes) -> Self {
        Self {
            headers: vec![
                (
                    ":message-type".to_string(),
                    HeaderValue::String("event".to_string()),
                ),
                (
                    ":event-type".to_string(),
                    HeaderValue::String("AudioEvent".to_string()),
                ),
            ],
            body: pcm,
        }
    }
}
