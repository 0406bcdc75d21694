//! Binary event-stream framing for the Transcribe streaming socket.
//!
//! Audio and transcript messages share one duplex byte stream, multiplexed
//! with the vendor's event-stream format:
//!
//! ```text
//! [total_len:4][headers_len:4][prelude_crc32:4][headers][payload][message_crc32:4]
//! ```
//!
//! All integers are big-endian. `total_len` covers the whole frame including
//! both CRC fields; `prelude_crc32` checks the two length words and
//! `message_crc32` checks everything before it. Each header entry is a
//! 1-byte-length name followed by a typed value (string, int32 or
//! byte-array).
//!
//! Marshalling and unmarshalling are lossless inverses for every supported
//! header type and any payload length, including the zero-length payload
//! used as the end-of-stream sentinel.

mod codec;
mod message;

pub use codec::{EventStreamError, decode_headers, marshal, unmarshal};
pub use message::{EventStreamMessage, HeaderValue};
