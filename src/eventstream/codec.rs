//! Marshalling between logical messages and framed bytes.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::message::{EventStreamMessage, HeaderValue};

/// Prelude (two length words) plus its CRC.
const PRELUDE_LEN: usize = 12;
/// Smallest possible frame: prelude block plus the trailing message CRC.
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;

/// Header value type tags used on the wire.
const TYPE_INT32: u8 = 4;
const TYPE_BYTE_ARRAY: u8 = 6;
const TYPE_STRING: u8 = 7;

/// Errors raised while framing or unframing a message.
///
/// All variants are local to the offending frame; none mutate shared state,
/// and the caller decides whether the session survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStreamError {
    /// Frame shorter than the fixed prelude and trailer.
    #[error("frame truncated at {0} bytes")]
    Truncated(usize),

    /// The declared total length does not match the byte count received.
    #[error("declared frame length {declared} does not match received length {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    /// CRC-32 over the two length words failed.
    #[error("prelude checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    PreludeChecksum { expected: u32, computed: u32 },

    /// CRC-32 over the whole message failed.
    #[error("message checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    MessageChecksum { expected: u32, computed: u32 },

    /// The header block is structurally invalid.
    #[error("malformed header block: {0}")]
    InvalidHeader(String),

    /// A header carried a value type this protocol does not use.
    #[error("unsupported header value type {0}")]
    UnsupportedHeaderType(u8),

    /// A header name exceeds the 1-byte length prefix.
    #[error("header name of {0} bytes exceeds the 255-byte limit")]
    HeaderNameTooLong(usize),

    /// A header value exceeds its 2-byte length prefix.
    #[error("header value of {0} bytes exceeds the 65535-byte limit")]
    HeaderValueTooLarge(usize),
}

/// Encode a logical message into a framed byte buffer.
pub fn marshal(message: &EventStreamMessage) -> Result<Bytes, EventStreamError> {
    let headers = encode_headers(&message.headers)?;
    let total_len = PRELUDE_LEN + headers.len() + message.body.len() + 4;

    let mut buf = BytesMut::with_capacity(total_len);
    buf.put_u32(total_len as u32);
    buf.put_u32(headers.len() as u32);
    let prelude_crc = crc32fast::hash(&buf[..8]);
    buf.put_u32(prelude_crc);
    buf.put_slice(&headers);
    buf.put_slice(&message.body);
    let message_crc = crc32fast::hash(&buf);
    buf.put_u32(message_crc);

    Ok(buf.freeze())
}

/// Decode a framed byte buffer, validating both checksums.
pub fn unmarshal(frame: &[u8]) -> Result<EventStreamMessage, EventStreamError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(EventStreamError::Truncated(frame.len()));
    }

    let declared = read_u32(&frame[0..4]);
    if declared as usize != frame.len() {
        return Err(EventStreamError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }

    let expected_prelude = read_u32(&frame[8..12]);
    let computed_prelude = crc32fast::hash(&frame[..8]);
    if computed_prelude != expected_prelude {
        return Err(EventStreamError::PreludeChecksum {
            expected: expected_prelude,
            computed: computed_prelude,
        });
    }

    let trailer_at = frame.len() - 4;
    let expected_message = read_u32(&frame[trailer_at..]);
    let computed_message = crc32fast::hash(&frame[..trailer_at]);
    if computed_message != expected_message {
        return Err(EventStreamError::MessageChecksum {
            expected: expected_message,
            computed: computed_message,
        });
    }

    let headers_len = read_u32(&frame[4..8]) as usize;
    let Some(body_at) = PRELUDE_LEN.checked_add(headers_len).filter(|end| *end <= trailer_at)
    else {
        return Err(EventStreamError::InvalidHeader(format!(
            "header block of {headers_len} bytes overruns the frame"
        )));
    };

    let headers = decode_headers(&frame[PRELUDE_LEN..body_at])?;
    let body = Bytes::copy_from_slice(&frame[body_at..trailer_at]);

    Ok(EventStreamMessage { headers, body })
}

/// Decode a raw header block into ordered name/value pairs.
pub fn decode_headers(block: &[u8]) -> Result<Vec<(String, HeaderValue)>, EventStreamError> {
    let mut headers = Vec::new();
    let mut rest = block;

    while !rest.is_empty() {
        let name_len = rest[0] as usize;
        rest = &rest[1..];
        let name_bytes = take(&mut rest, name_len)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| EventStreamError::InvalidHeader("header name is not UTF-8".to_string()))?
            .to_string();

        let type_tag = take(&mut rest, 1)?[0];
        let value = match type_tag {
            TYPE_STRING => {
                let len = read_u16(take(&mut rest, 2)?) as usize;
                let value_bytes = take(&mut rest, len)?;
                let value = std::str::from_utf8(value_bytes).map_err(|_| {
                    EventStreamError::InvalidHeader(format!(
                        "string value of header '{name}' is not UTF-8"
                    ))
                })?;
                HeaderValue::String(value.to_string())
            }
            TYPE_INT32 => {
                let value_bytes = take(&mut rest, 4)?;
                HeaderValue::Int32(read_u32(value_bytes) as i32)
            }
            TYPE_BYTE_ARRAY => {
                let len = read_u16(take(&mut rest, 2)?) as usize;
                let value_bytes = take(&mut rest, len)?;
                HeaderValue::ByteArray(Bytes::copy_from_slice(value_bytes))
            }
            other => return Err(EventStreamError::UnsupportedHeaderType(other)),
        };

        headers.push((name, value));
    }

    Ok(headers)
}

fn encode_headers(headers: &[(String, HeaderValue)]) -> Result<Vec<u8>, EventStreamError> {
    let mut buf = Vec::new();
    for (name, value) in headers {
        if name.len() > u8::MAX as usize {
            return Err(EventStreamError::HeaderNameTooLong(name.len()));
        }
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());

        match value {
            HeaderValue::String(s) => {
                if s.len() > u16::MAX as usize {
                    return Err(EventStreamError::HeaderValueTooLarge(s.len()));
                }
                buf.push(TYPE_STRING);
                buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            HeaderValue::Int32(v) => {
                buf.push(TYPE_INT32);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::ByteArray(bytes) => {
                if bytes.len() > u16::MAX as usize {
                    return Err(EventStreamError::HeaderValueTooLarge(bytes.len()));
                }
                buf.push(TYPE_BYTE_ARRAY);
                buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
        }
    }
    Ok(buf)
}

fn take<'a>(rest: &mut &'a [u8], n: usize) -> Result<&'a [u8], EventStreamError> {
    if rest.len() < n {
        return Err(EventStreamError::InvalidHeader(format!(
            "header block ends {} bytes short",
            n - rest.len()
        )));
    }
    let (taken, remaining) = rest.split_at(n);
    *rest = remaining;
    Ok(taken)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> EventStreamMessage {
        EventStreamMessage::new(
            vec![
                (
                    ":message-type".to_string(),
                    HeaderValue::String("event".to_string()),
                ),
                (":sequence".to_string(), HeaderValue::Int32(-7)),
                (
                    ":checkpoint".to_string(),
                    HeaderValue::ByteArray(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF])),
                ),
            ],
            Bytes::from_static(b"{\"Transcript\":{\"Results\":[]}}"),
        )
    }

    #[test]
    fn round_trip_preserves_all_header_types() {
        let message = sample_message();
        let decoded = unmarshal(&marshal(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trip_empty_payload_and_headers() {
        let empty = EventStreamMessage::default();
        assert_eq!(unmarshal(&marshal(&empty).unwrap()).unwrap(), empty);

        let sentinel = EventStreamMessage::audio_event(Bytes::new());
        let decoded = unmarshal(&marshal(&sentinel).unwrap()).unwrap();
        assert!(decoded.body.is_empty());
        assert_eq!(decoded.message_type(), Some("event"));
        assert_eq!(
            decoded.header(":event-type").and_then(HeaderValue::as_str),
            Some("AudioEvent")
        );
    }

    #[test]
    fn round_trip_various_payload_lengths() {
        for len in [0usize, 1, 2, 15, 16, 17, 1024] {
            let message = EventStreamMessage::audio_event(Bytes::from(vec![0xA5u8; len]));
            let decoded = unmarshal(&marshal(&message).unwrap()).unwrap();
            assert_eq!(decoded, message, "payload length {len}");
        }
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let frame = marshal(&sample_message()).unwrap();
        for byte_index in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.to_vec();
                corrupted[byte_index] ^= 1 << bit;
                assert!(
                    unmarshal(&corrupted).is_err(),
                    "flip of bit {bit} in byte {byte_index} went undetected"
                );
            }
        }
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let frame = marshal(&sample_message()).unwrap();
        assert_eq!(unmarshal(&frame[..10]), Err(EventStreamError::Truncated(10)));
        assert!(matches!(
            unmarshal(&frame[..frame.len() - 1]),
            Err(EventStreamError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn trailing_garbage_is_a_length_mismatch() {
        let mut frame = marshal(&sample_message()).unwrap().to_vec();
        frame.push(0);
        assert!(matches!(
            unmarshal(&frame),
            Err(EventStreamError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn corrupt_prelude_reports_prelude_checksum() {
        let mut frame = marshal(&sample_message()).unwrap().to_vec();
        frame[5] ^= 0x01;
        assert!(matches!(
            unmarshal(&frame),
            Err(EventStreamError::PreludeChecksum { .. })
        ));
    }

    #[test]
    fn corrupt_payload_reports_message_checksum() {
        let mut frame = marshal(&sample_message()).unwrap().to_vec();
        let payload_byte = frame.len() - 6;
        frame[payload_byte] ^= 0x80;
        assert!(matches!(
            unmarshal(&frame),
            Err(EventStreamError::MessageChecksum { .. })
        ));
    }

    #[test]
    fn unsupported_header_type_is_rejected() {
        // name "x" with type tag 9 (timestamp, unused by this protocol)
        let block = [1u8, b'x', 9, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_headers(&block),
            Err(EventStreamError::UnsupportedHeaderType(9))
        );
    }

    #[test]
    fn decode_headers_on_marshalled_block() {
        let message = sample_message();
        let frame = marshal(&message).unwrap();
        let headers_len = read_u32(&frame[4..8]) as usize;
        let headers = decode_headers(&frame[12..12 + headers_len]).unwrap();
        assert_eq!(headers, message.headers);
    }

    #[test]
    fn oversized_header_name_cannot_marshal() {
        let message = EventStreamMessage::new(
            vec![("n".repeat(300), HeaderValue::Int32(1))],
            Bytes::new(),
        );
        assert_eq!(
            marshal(&message),
            Err(EventStreamError::HeaderNameTooLong(300))
        );
    }
}
