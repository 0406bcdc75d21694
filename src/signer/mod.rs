//! SigV4 query-parameter presigning for the streaming WebSocket URL.
//!
//! The WebSocket handshake cannot carry custom auth headers, so the
//! connection is authenticated with a time-limited presigned URL: every
//! required auth parameter rides in the query string and the signature is
//! appended as `X-Amz-Signature`.
//!
//! Signing follows the standard four-step chain — canonical request,
//! string-to-sign, HMAC-SHA256 key derivation, signature — with the
//! timestamp taken at call time, so a signed URL is valid for the requested
//! expiry window and signatures are never reusable across calls.

mod presigned;

pub use presigned::{
    EMPTY_PAYLOAD_HASH, PresignedUrlParams, SIGNING_ALGORITHM, SignerError, create_presigned_url,
    presign_at,
};
