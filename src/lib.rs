//! Real-time speech-to-text streaming core for Amazon Transcribe.
//!
//! This crate implements the full client-side pipeline for the Amazon
//! Transcribe Streaming WebSocket API:
//!
//! - [`audio`] — nearest-neighbor downsampling and 16-bit little-endian PCM
//!   encoding of captured sample chunks
//! - [`eventstream`] — the binary event-stream framing (length-prefixed
//!   header block, payload, dual CRC-32 checksums) used to multiplex audio
//!   and transcript messages over one duplex byte stream
//! - [`signer`] — SigV4 query-parameter presigning for the WebSocket
//!   connection URL (the transport cannot carry custom auth headers)
//! - [`session`] — the duplex streaming session: connection lifecycle,
//!   send/receive loops, transcript accumulation and error reporting
//!
//! Audio capture is an external collaborator: implement [`AudioSource`] (or
//! use [`ChannelSource`]) and attach it to a running session. Transcripts
//! and errors are delivered through caller-supplied callbacks; nothing is
//! persisted.
//!
//! ```text
//! capture -> downsample + pcm_encode -> event-stream marshal -> WebSocket
//!     WebSocket -> event-stream unmarshal -> transcript JSON -> callback
//! ```

pub mod audio;
pub mod eventstream;
pub mod session;
pub mod signer;

// Re-export commonly used items for convenience
pub use audio::{AudioChunk, AudioSource, ChannelSource};
pub use eventstream::{EventStreamError, EventStreamMessage, HeaderValue};
pub use session::{
    AwsRegion, Credentials, SessionConfig, SessionError, SessionResult, SessionState,
    TranscribeSession,
};
pub use signer::{PresignedUrlParams, SignerError, create_presigned_url};
