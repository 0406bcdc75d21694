//! Audio resampling, PCM encoding and the capture-source seam.
//!
//! Amazon Transcribe expects 16-bit signed little-endian PCM at the sample
//! rate declared in the connection query string. Capture devices deliver
//! floating-point samples at whatever rate the hardware runs, so every chunk
//! is downsampled to the target rate and then PCM-encoded before framing.
//!
//! The capture device itself is not part of this crate: implementations of
//! [`AudioSource`] (a microphone wrapper, a file reader, a test fixture)
//! supply chunks and are released when the session drains.

mod pcm;
mod source;

pub use pcm::{downsample, encode_chunk, pcm_encode};
pub use source::{AudioChunk, AudioSource, ChannelSource};
