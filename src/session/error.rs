//! Session error types.

use thiserror::Error;

use crate::signer::SignerError;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by a streaming session.
///
/// `FrameCorruption` is reported per message and leaves the session
/// running; every other runtime variant is terminal and moves the session
/// to `Failed`. The session fires at most one terminal error callback.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The capture source is unavailable or produced unusable audio.
    #[error("Capture error: {0}")]
    Capture(String),

    /// Transport open failure, send failure or timeout. Terminal.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An inbound frame failed its checksums or could not be decoded.
    /// Reported per message; the session continues.
    #[error("Corrupt frame: {0}")]
    FrameCorruption(String),

    /// The far end sent a non-event message; carries the service's message
    /// text verbatim. Terminal.
    #[error("Transcribe exception: {0}")]
    ProtocolException(String),

    /// The far end closed abnormally with no prior error; carries the
    /// close reason. Terminal.
    #[error("Streaming exception: {0}")]
    StreamingClose(String),

    /// Configuration rejected before any connection was attempted.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An operation was issued in a state that does not allow it.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// URL presigning rejected its parameters; a programming error.
    #[error(transparent)]
    Signer(#[from] SignerError),
}
