//! Duplex streaming session against Amazon Transcribe.
//!
//! A [`TranscribeSession`] owns one WebSocket connection end to end: it
//! presigns the URL, opens the socket, feeds framed PCM on the send path,
//! decodes inbound frames on the receive path and accumulates the latest
//! final transcript. Lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Draining -> Closed
//!              \            \___________\______-> Failed
//! ```
//!
//! Stopping is cooperative: `stop()` sends the empty AudioEvent sentinel and
//! keeps receiving so the service can flush final transcripts before it
//! closes the stream. At most one terminal error is surfaced per session;
//! once an error has been reported, the close event that follows it is
//! suppressed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transcribe_live::{
//!     AudioChunk, ChannelSource, Credentials, SessionConfig, TranscribeSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig {
//!         credentials: Credentials::new(
//!             std::env::var("AWS_ACCESS_KEY_ID")?,
//!             std::env::var("AWS_SECRET_ACCESS_KEY")?,
//!         ),
//!         ..Default::default()
//!     };
//!
//!     let mut session = TranscribeSession::new(config)?;
//!     session
//!         .on_transcript(Arc::new(|text| {
//!             Box::pin(async move { println!("transcript: {text}") })
//!         }))
//!         .await;
//!
//!     session.start().await?;
//!
//!     let (mic_tx, source) = ChannelSource::new(32);
//!     session.attach_source(source)?;
//!     mic_tx.send(AudioChunk::new(vec![0.0; 4800], 48_000)).await?;
//!
//!     session.stop();
//!     session.shutdown().await?;
//!     println!("final: {}", session.transcription());
//!     Ok(())
//! }
//! ```

mod client;
pub mod config;
pub mod error;
pub mod messages;

#[cfg(test)]
mod tests;

pub use client::{ErrorCallback, SessionState, TranscribeSession, TranscriptCallback};
pub use config::{
    AwsRegion, Credentials, DEFAULT_EXPIRES_IN_SECS, DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE,
    MIN_SAMPLE_RATE, SessionConfig,
};
pub use error::{SessionError, SessionResult};

/// Request path of the streaming transcription WebSocket endpoint.
pub const STREAM_PATH: &str = "/stream-transcription-websocket";

/// SigV4 service name the connection URL is signed for.
pub const SIGNING_SERVICE: &str = "transcribe";
