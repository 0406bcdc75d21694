//! Capture-source abstraction.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A chunk of captured audio: mono floating-point samples in `[-1.0, 1.0]`
/// at the rate the capture device actually runs.
///
/// Chunks are consumed and discarded after encoding; nothing is retained.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw samples as produced by the capture device.
    pub samples: Vec<f32>,
    /// The device-native sample rate of this chunk in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a chunk from samples at the given device rate.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// A swappable source of captured audio chunks.
///
/// The crate never owns a capture device; sessions pull chunks from an
/// `AudioSource` until it is exhausted or the session drains. `stop` must be
/// idempotent: it is called when the session releases the source and may be
/// called again by the owner.
#[async_trait]
pub trait AudioSource: Send + 'static {
    /// The next captured chunk, or `None` once capture has ended.
    async fn next_chunk(&mut self) -> Option<AudioChunk>;

    /// Release the capture device. Idempotent.
    fn stop(&mut self);
}

/// Channel-backed [`AudioSource`] for embedding and tests.
///
/// The sending half is handed to whatever produces audio (a capture
/// callback, a test); the receiving half is attached to a session.
pub struct ChannelSource {
    rx: mpsc::Receiver<AudioChunk>,
}

impl ChannelSource {
    /// Create a bounded channel source; the sender side applies
    /// backpressure to the producer once `capacity` chunks are queued.
    pub fn new(capacity: usize) -> (mpsc::Sender<AudioChunk>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.rx.recv().await
    }

    fn stop(&mut self) {
        self.rx.close();
    }
}
