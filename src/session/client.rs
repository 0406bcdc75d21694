//! The streaming session client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::audio::{self, AudioChunk, AudioSource};
use crate::eventstream::{self, EventStreamMessage};
use crate::signer::{EMPTY_PAYLOAD_HASH, PresignedUrlParams, create_presigned_url};

use super::config::SessionConfig;
use super::error::{SessionError, SessionResult};
use super::messages::{ExceptionMessage, TranscriptEvent};
use super::{SIGNING_SERVICE, STREAM_PATH};

// =============================================================================
// Constants
// =============================================================================

/// Maximum PCM payload per audio chunk.
///
/// At 48 kHz mono 16-bit, 200 ms of audio is about 19 KB; 256 KB allows
/// several seconds and guards against runaway capture buffers.
const MAX_AUDIO_CHUNK_SIZE: usize = 256 * 1024;

/// Connection-open timeout in seconds.
const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Per-message idle timeout for the receive path. Resets after every
/// inbound message and catches stuck or dead connections.
const WS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Channel buffer size for captured audio (bounded for backpressure).
const AUDIO_CHANNEL_BUFFER_SIZE: usize = 32;

/// Consecutive corrupt frames tolerated before the link is declared dead.
const MAX_CORRUPT_FRAME_STREAK: u32 = 5;

// =============================================================================
// Callback Types
// =============================================================================

/// Async callback receiving the accumulated final transcript whenever it
/// changes.
pub type TranscriptCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async callback receiving session errors.
pub type ErrorCallback =
    Arc<dyn Fn(SessionError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle states of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started.
    Idle,
    /// URL presigned, WebSocket opening.
    Connecting,
    /// Duplex streaming in progress.
    Streaming,
    /// Drain sentinel sent; receiving until the far end closes.
    Draining,
    /// Far end closed normally. Terminal.
    Closed,
    /// A terminal error was reported. Terminal.
    Failed,
}

// =============================================================================
// Inbound Dispatch
// =============================================================================

/// Classification of one decoded inbound frame.
pub(crate) enum Inbound {
    /// A transcript event.
    Transcript(TranscriptEvent),
    /// A service exception; carries the far end's message text.
    Exception(String),
}

/// Classify a decoded frame by its `:message-type` header.
pub(crate) fn classify(frame: &EventStreamMessage) -> Result<Inbound, SessionError> {
    if frame.message_type() == Some("event") {
        let event = serde_json::from_slice::<TranscriptEvent>(&frame.body).map_err(|e| {
            SessionError::FrameCorruption(format!("undecodable transcript payload: {e}"))
        })?;
        Ok(Inbound::Transcript(event))
    } else {
        let fallback = || {
            format!(
                "service exception ({})",
                frame.message_type().unwrap_or("unknown message type")
            )
        };
        let message = serde_json::from_slice::<ExceptionMessage>(&frame.body)
            .map(|exception| exception.message)
            .ok()
            .filter(|message| !message.is_empty())
            .unwrap_or_else(fallback);
        Ok(Inbound::Exception(message))
    }
}

/// Fold a transcript event into the accumulator.
///
/// Only non-partial results with at least one alternative commit; the
/// latest final text overwrites the previous one. Returns the new value
/// when it actually changed.
pub(crate) fn apply_transcript_event(
    event: &TranscriptEvent,
    transcription: &Mutex<String>,
) -> Option<String> {
    let transcript = event.transcript.as_ref()?;
    let mut updated = None;
    for result in &transcript.results {
        if result.is_partial {
            continue;
        }
        let Some(text) = result
            .alternatives
            .first()
            .and_then(|alternative| alternative.transcript.as_deref())
        else {
            continue;
        };
        let mut current = transcription.lock();
        if *current != text {
            *current = text.to_string();
            updated = Some(current.clone());
        }
    }
    updated
}

// =============================================================================
// TranscribeSession
// =============================================================================

/// A streaming transcription session.
///
/// Owns the WebSocket connection exclusively; the send path is driven by
/// captured audio chunks and the receive path by inbound frames, both
/// inside one connection task so session state is never mutated
/// concurrently. See the module docs for the lifecycle and an example.
pub struct TranscribeSession {
    /// Static configuration supplied at construction.
    config: SessionConfig,

    /// Current lifecycle state, shared with the connection task.
    state: Arc<Mutex<SessionState>>,

    /// Latest accumulated final transcript.
    transcription: Arc<Mutex<String>>,

    /// Audio sender (bounded for backpressure).
    audio_tx: Option<mpsc::Sender<AudioChunk>>,

    /// Drain request sender.
    drain_tx: Option<oneshot::Sender<()>>,

    /// Connection task handle.
    connection_handle: Option<tokio::task::JoinHandle<()>>,

    /// Capture pump task handle.
    source_handle: Option<tokio::task::JoinHandle<()>>,

    /// Transcript forwarding task handle.
    transcript_forward_handle: Option<tokio::task::JoinHandle<()>>,

    /// Error forwarding task handle.
    error_forward_handle: Option<tokio::task::JoinHandle<()>>,

    /// Shared callback storage for async access.
    transcript_callback: Arc<AsyncMutex<Option<TranscriptCallback>>>,

    /// Error callback storage.
    error_callback: Arc<AsyncMutex<Option<ErrorCallback>>>,

    /// Connection flag shared with the connection task.
    is_connected: Arc<AtomicBool>,
}

impl TranscribeSession {
    /// Create a session from validated configuration.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            transcription: Arc::new(Mutex::new(String::new())),
            audio_tx: None,
            drain_tx: None,
            connection_handle: None,
            source_handle: None,
            transcript_forward_handle: None,
            error_forward_handle: None,
            transcript_callback: Arc::new(AsyncMutex::new(None)),
            error_callback: Arc::new(AsyncMutex::new(None)),
            is_connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// The accumulated final transcript so far.
    pub fn transcription(&self) -> String {
        self.transcription.lock().clone()
    }

    /// Whether the session accepts audio right now.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Streaming
            && self.audio_tx.is_some()
            && self.is_connected.load(Ordering::Acquire)
    }

    /// Register the transcript callback.
    pub async fn on_transcript(&self, callback: TranscriptCallback) {
        *self.transcript_callback.lock().await = Some(callback);
    }

    /// Register the error callback.
    pub async fn on_error(&self, callback: ErrorCallback) {
        *self.error_callback.lock().await = Some(callback);
    }

    /// Open the connection and begin streaming.
    ///
    /// Presigns the connection URL (credentials are read once here and not
    /// retained by the signing path), opens the WebSocket in binary mode
    /// and spawns the connection task. Resolves once the socket is open or
    /// with the terminal `Connection` error.
    pub async fn start(&mut self) -> SessionResult<()> {
        {
            let mut state = self.state.lock();
            if !matches!(
                *state,
                SessionState::Idle | SessionState::Closed | SessionState::Failed
            ) {
                return Err(SessionError::InvalidState(format!(
                    "cannot start while {:?}",
                    *state
                )));
            }
            *state = SessionState::Connecting;
        }
        self.transcription.lock().clear();

        let (protocol, host) = self.config.endpoint_authority();
        let params = PresignedUrlParams {
            method: "GET".to_string(),
            host,
            path: STREAM_PATH.to_string(),
            service: SIGNING_SERVICE.to_string(),
            payload_hash: EMPTY_PAYLOAD_HASH.to_string(),
            access_key_id: self.config.credentials.access_key_id.clone(),
            secret_access_key: self.config.credentials.secret_access_key.clone(),
            protocol,
            expires_in_secs: self.config.expires_in_secs,
            region: self.config.region.as_str().to_string(),
            query: self.config.stream_query(),
        };
        let url = match create_presigned_url(&params) {
            Ok(url) => url,
            Err(e) => {
                *self.state.lock() = SessionState::Idle;
                return Err(e.into());
            }
        };
        drop(params);

        if let Err(e) = Url::parse(&url) {
            *self.state.lock() = SessionState::Failed;
            return Err(SessionError::Connection(format!(
                "presigned URL is not parseable: {e}"
            )));
        }

        let (audio_tx, audio_rx) = mpsc::channel::<AudioChunk>(AUDIO_CHANNEL_BUFFER_SIZE);
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let (transcript_tx, mut transcript_rx) = mpsc::channel::<String>(256);
        let (error_tx, mut error_rx) = mpsc::channel::<SessionError>(64);
        let (connected_tx, connected_rx) = oneshot::channel::<SessionResult<()>>();

        self.audio_tx = Some(audio_tx);
        self.drain_tx = Some(drain_tx);

        let connection_handle = tokio::spawn(run_connection(ConnectionContext {
            url,
            target_rate: self.config.sample_rate,
            audio_rx,
            drain_rx,
            transcript_tx,
            error_tx,
            connected_tx,
            state: self.state.clone(),
            transcription: self.transcription.clone(),
            is_connected: self.is_connected.clone(),
        }));
        self.connection_handle = Some(connection_handle);

        // Forward transcripts without letting a slow callback stall the
        // socket loop.
        let transcript_callback_ref = self.transcript_callback.clone();
        self.transcript_forward_handle = Some(tokio::spawn(async move {
            while let Some(text) = transcript_rx.recv().await {
                let callback = transcript_callback_ref.lock().await.clone();
                if let Some(callback) = callback {
                    callback(text).await;
                } else {
                    debug!("Final transcript changed (no callback registered): {text}");
                }
            }
        }));

        let error_callback_ref = self.error_callback.clone();
        self.error_forward_handle = Some(tokio::spawn(async move {
            while let Some(session_error) = error_rx.recv().await {
                let callback = error_callback_ref.lock().await.clone();
                if let Some(callback) = callback {
                    callback(session_error).await;
                } else {
                    error!("Session error (no callback registered): {session_error}");
                }
            }
        }));

        match timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS), connected_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("Transcribe streaming session established");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                self.fail_start();
                Err(e)
            }
            Ok(Err(_)) => {
                self.fail_start();
                Err(SessionError::Connection(
                    "connection task ended before the socket opened".to_string(),
                ))
            }
            Err(_) => {
                self.fail_start();
                Err(SessionError::Connection(format!(
                    "connection timeout after {CONNECTION_TIMEOUT_SECS} seconds"
                )))
            }
        }
    }

    fn fail_start(&mut self) {
        *self.state.lock() = SessionState::Failed;
        self.is_connected.store(false, Ordering::Release);
        self.audio_tx = None;
        self.drain_tx = None;
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }

    /// Queue one captured chunk for encoding and sending.
    ///
    /// Applies backpressure through the bounded audio channel. Rejected
    /// outside the `Streaming` state: a draining or terminal session
    /// accepts no further audio.
    pub async fn feed(&self, chunk: AudioChunk) -> SessionResult<()> {
        if !self.is_ready() {
            return Err(SessionError::InvalidState(
                "session is not streaming".to_string(),
            ));
        }
        if chunk.samples.len() * 2 > MAX_AUDIO_CHUNK_SIZE {
            return Err(SessionError::Capture(format!(
                "audio chunk of {} samples exceeds the {} byte limit",
                chunk.samples.len(),
                MAX_AUDIO_CHUNK_SIZE
            )));
        }
        let Some(audio_tx) = &self.audio_tx else {
            return Err(SessionError::InvalidState(
                "session is not streaming".to_string(),
            ));
        };
        audio_tx
            .send(chunk)
            .await
            .map_err(|_| SessionError::Connection("audio channel closed".to_string()))
    }

    /// Pump a capture source into the session until it is exhausted or the
    /// session stops accepting audio, then release it.
    pub fn attach_source<S: AudioSource>(&mut self, mut source: S) -> SessionResult<()> {
        let Some(audio_tx) = self.audio_tx.clone() else {
            return Err(SessionError::InvalidState(
                "start the session before attaching a source".to_string(),
            ));
        };
        self.source_handle = Some(tokio::spawn(async move {
            while let Some(chunk) = source.next_chunk().await {
                if audio_tx.send(chunk).await.is_err() {
                    break;
                }
            }
            source.stop();
            debug!("Audio source exhausted, capture released");
        }));
        Ok(())
    }

    /// Request a graceful drain.
    ///
    /// Sends the empty AudioEvent sentinel, stops accepting audio and keeps
    /// receiving so the far end can flush outstanding transcripts before it
    /// closes. Idempotent.
    pub fn stop(&mut self) {
        if let Some(drain_tx) = self.drain_tx.take() {
            debug!("Stop requested, draining session");
            let _ = drain_tx.send(());
        }
        self.audio_tx = None;
    }

    /// Drain, wait for the connection to wind down and release all tasks.
    pub async fn shutdown(&mut self) -> SessionResult<()> {
        self.stop();

        if let Some(handle) = self.connection_handle.take() {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }
        if let Some(handle) = self.source_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.transcript_forward_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.error_forward_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        *self.transcript_callback.lock().await = None;
        *self.error_callback.lock().await = None;
        self.is_connected.store(false, Ordering::Release);

        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Failed) {
            *state = SessionState::Closed;
        }
        Ok(())
    }
}

impl Drop for TranscribeSession {
    fn drop(&mut self) {
        // Ask the far end to flush rather than severing mid-stream.
        if let Some(drain_tx) = self.drain_tx.take() {
            let _ = drain_tx.send(());
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct ConnectionContext {
    url: String,
    target_rate: u32,
    audio_rx: mpsc::Receiver<AudioChunk>,
    drain_rx: oneshot::Receiver<()>,
    transcript_tx: mpsc::Sender<String>,
    error_tx: mpsc::Sender<SessionError>,
    connected_tx: oneshot::Sender<SessionResult<()>>,
    state: Arc<Mutex<SessionState>>,
    transcription: Arc<Mutex<String>>,
    is_connected: Arc<AtomicBool>,
}

async fn run_connection(ctx: ConnectionContext) {
    let ConnectionContext {
        url,
        target_rate,
        mut audio_rx,
        mut drain_rx,
        transcript_tx,
        error_tx,
        connected_tx,
        state,
        transcription,
        is_connected,
    } = ctx;

    let (ws_stream, _response) = match connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            let session_error = SessionError::Connection(format!("WebSocket open failed: {e}"));
            error!("{session_error}");
            *state.lock() = SessionState::Failed;
            let _ = connected_tx.send(Err(session_error));
            return;
        }
    };

    info!("Connected to the streaming transcription endpoint");
    *state.lock() = SessionState::Streaming;
    is_connected.store(true, Ordering::Release);
    let _ = connected_tx.send(Ok(()));

    let (mut ws_sink, mut ws_source) = ws_stream.split();

    let mut draining = false;
    // Tie-break: once a terminal error has been reported, the close event
    // that follows it is suppressed.
    let mut fatal_reported = false;
    let mut corrupt_streak = 0u32;

    loop {
        tokio::select! {
            // Send path: encode and frame captured audio.
            Some(chunk) = audio_rx.recv(), if !draining => {
                let pcm = audio::encode_chunk(&chunk, target_rate);
                if pcm.is_empty() {
                    warn!(
                        "Dropping {} samples at {} Hz: only downsampling to {} Hz is supported",
                        chunk.samples.len(),
                        chunk.sample_rate,
                        target_rate
                    );
                    continue;
                }
                let pcm_len = pcm.len();
                let frame = match eventstream::marshal(&EventStreamMessage::audio_event(pcm)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = error_tx.try_send(SessionError::FrameCorruption(e.to_string()));
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Binary(frame)).await {
                    let session_error =
                        SessionError::Connection(format!("failed to send audio frame: {e}"));
                    error!("{session_error}");
                    if !fatal_reported {
                        fatal_reported = true;
                        let _ = error_tx.try_send(session_error);
                    }
                    *state.lock() = SessionState::Failed;
                    break;
                }
                debug!("Sent {pcm_len} bytes of PCM audio");
            }

            // Drain request: empty AudioEvent asks the far end to flush
            // remaining transcripts and close.
            _ = &mut drain_rx, if !draining => {
                debug!("Drain requested, sending end-of-stream sentinel");
                draining = true;
                *state.lock() = SessionState::Draining;
                match eventstream::marshal(&EventStreamMessage::audio_event(Bytes::new())) {
                    Ok(sentinel) => {
                        if let Err(e) = ws_sink.send(Message::Binary(sentinel)).await {
                            warn!("Failed to send end-of-stream sentinel: {e}");
                        }
                    }
                    Err(e) => warn!("Failed to encode end-of-stream sentinel: {e}"),
                }
            }

            // Receive path, with idle timeout.
            inbound = timeout(WS_MESSAGE_TIMEOUT, ws_source.next()) => {
                match inbound {
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        match eventstream::unmarshal(&data) {
                            Ok(frame) => {
                                corrupt_streak = 0;
                                match classify(&frame) {
                                    Ok(Inbound::Transcript(event)) => {
                                        if let Some(updated) =
                                            apply_transcript_event(&event, &transcription)
                                        {
                                            debug!("Final transcript updated: {updated}");
                                            if transcript_tx.try_send(updated).is_err() {
                                                warn!("Transcript channel full, update dropped");
                                            }
                                        }
                                    }
                                    Ok(Inbound::Exception(message)) => {
                                        let session_error =
                                            SessionError::ProtocolException(message);
                                        error!("{session_error}");
                                        if !fatal_reported {
                                            fatal_reported = true;
                                            let _ = error_tx.try_send(session_error);
                                        }
                                        *state.lock() = SessionState::Failed;
                                        // Keep receiving; the service closes
                                        // the stream after an exception.
                                        draining = true;
                                    }
                                    Err(e) => {
                                        warn!("{e}");
                                        let _ = error_tx.try_send(e);
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Corrupt event-stream frame: {e}");
                                corrupt_streak += 1;
                                let _ = error_tx
                                    .try_send(SessionError::FrameCorruption(e.to_string()));
                                if corrupt_streak >= MAX_CORRUPT_FRAME_STREAK {
                                    let session_error = SessionError::Connection(format!(
                                        "{corrupt_streak} consecutive corrupt frames, link is dead"
                                    ));
                                    error!("{session_error}");
                                    if !fatal_reported {
                                        fatal_reported = true;
                                        let _ = error_tx.try_send(session_error);
                                    }
                                    *state.lock() = SessionState::Failed;
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Close(close_frame)))) => {
                        let (code, reason) = match &close_frame {
                            Some(frame) => {
                                (u16::from(frame.code), frame.reason.as_str().to_string())
                            }
                            // No status received on the wire.
                            None => (1005, String::new()),
                        };
                        if code == 1000 {
                            info!("Transcribe stream closed normally");
                            let mut state = state.lock();
                            if *state != SessionState::Failed {
                                *state = SessionState::Closed;
                            }
                        } else if !fatal_reported {
                            fatal_reported = true;
                            let session_error = SessionError::StreamingClose(if reason.is_empty() {
                                format!("close code {code}")
                            } else {
                                reason
                            });
                            error!("{session_error}");
                            let _ = error_tx.try_send(session_error);
                            *state.lock() = SessionState::Failed;
                        } else {
                            debug!(
                                "Suppressing close (code {code}): an error was already reported"
                            );
                        }
                        break;
                    }
                    Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {
                        debug!("WebSocket keep-alive");
                    }
                    Ok(Some(Ok(other))) => {
                        debug!("Ignoring unexpected message type: {other:?}");
                    }
                    Ok(Some(Err(e))) => {
                        let session_error =
                            SessionError::Connection(format!("WebSocket error: {e}"));
                        error!("{session_error}");
                        if !fatal_reported {
                            fatal_reported = true;
                            let _ = error_tx.try_send(session_error);
                        }
                        *state.lock() = SessionState::Failed;
                        break;
                    }
                    Ok(None) => {
                        info!("Transcribe stream ended");
                        let mut state = state.lock();
                        if *state != SessionState::Failed {
                            *state = SessionState::Closed;
                        }
                        break;
                    }
                    Err(_elapsed) => {
                        let session_error = SessionError::Connection(format!(
                            "idle timeout, no message for {} seconds",
                            WS_MESSAGE_TIMEOUT.as_secs()
                        ));
                        error!("{session_error}");
                        if !fatal_reported {
                            fatal_reported = true;
                            let _ = error_tx.try_send(session_error);
                        }
                        *state.lock() = SessionState::Failed;
                        break;
                    }
                }
            }
        }
    }

    is_connected.store(false, Ordering::Release);
    info!("Streaming session loop finished");
}
