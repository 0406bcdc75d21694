//! Session tests against a scripted local WebSocket server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use super::client::{Inbound, apply_transcript_event, classify};
use super::messages::TranscriptEvent;
use super::*;
use crate::audio::AudioChunk;
use crate::eventstream::{EventStreamMessage, HeaderValue, marshal, unmarshal};

type WsServer = WebSocketStream<TcpStream>;

// =============================================================================
// Helpers
// =============================================================================

fn test_config(endpoint: &str) -> SessionConfig {
    SessionConfig {
        credentials: Credentials::new("AKIDEXAMPLE", "test-secret-key"),
        endpoint: Some(endpoint.to_string()),
        ..Default::default()
    }
}

/// Accept exactly one connection and run `script` over it.
async fn spawn_server<F, Fut>(script: F) -> String
where
    F: FnOnce(WsServer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        script(ws).await;
    });
    format!("ws://{addr}")
}

fn transcript_frame(text: &str, is_partial: bool) -> Message {
    let payload = serde_json::json!({
        "Transcript": {
            "Results": [
                {
                    "IsPartial": is_partial,
                    "Alternatives": [ { "Transcript": text } ]
                }
            ]
        }
    });
    event_frame("event", serde_json::to_vec(&payload).unwrap())
}

fn final_without_alternatives_frame() -> Message {
    let payload = serde_json::json!({
        "Transcript": { "Results": [ { "IsPartial": false, "Alternatives": [] } ] }
    });
    event_frame("event", serde_json::to_vec(&payload).unwrap())
}

fn exception_frame(message: &str) -> Message {
    let payload = serde_json::json!({ "Message": message });
    event_frame("exception", serde_json::to_vec(&payload).unwrap())
}

fn event_frame(message_type: &str, body: Vec<u8>) -> Message {
    let message = EventStreamMessage::new(
        vec![(
            ":message-type".to_string(),
            HeaderValue::String(message_type.to_string()),
        )],
        body.into(),
    );
    Message::Binary(marshal(&message).unwrap())
}

fn close_frame(code: CloseCode, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

fn transcript_collector() -> (TranscriptCallback, Arc<Mutex<Vec<String>>>) {
    let store = Arc::new(Mutex::new(Vec::new()));
    let sink = store.clone();
    let callback: TranscriptCallback = Arc::new(move |text| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().push(text);
        })
    });
    (callback, store)
}

fn error_collector() -> (ErrorCallback, Arc<Mutex<Vec<SessionError>>>) {
    let store = Arc::new(Mutex::new(Vec::new()));
    let sink = store.clone();
    let callback: ErrorCallback = Arc::new(move |session_error| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().push(session_error);
        })
    });
    (callback, store)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached within 5 seconds");
}

// =============================================================================
// Dispatch Unit Tests
// =============================================================================

#[test]
fn transcript_accumulation_policy() {
    let transcription = Mutex::new(String::new());

    let partial = |text: &str| TranscriptEvent {
        transcript: Some(super::messages::Transcript {
            results: vec![super::messages::TranscriptResult {
                is_partial: true,
                alternatives: vec![super::messages::Alternative {
                    transcript: Some(text.to_string()),
                }],
                ..Default::default()
            }],
        }),
    };
    let final_result = |text: &str| TranscriptEvent {
        transcript: Some(super::messages::Transcript {
            results: vec![super::messages::TranscriptResult {
                is_partial: false,
                alternatives: vec![super::messages::Alternative {
                    transcript: Some(text.to_string()),
                }],
                ..Default::default()
            }],
        }),
    };

    // partials never commit
    assert_eq!(apply_transcript_event(&partial("hel"), &transcription), None);
    assert_eq!(apply_transcript_event(&partial("hello"), &transcription), None);
    assert_eq!(transcription.lock().as_str(), "");

    // a final commits and overwrites
    assert_eq!(
        apply_transcript_event(&final_result("hello world"), &transcription),
        Some("hello world".to_string())
    );

    // a final with no alternatives does not clobber
    let empty_final = TranscriptEvent {
        transcript: Some(super::messages::Transcript {
            results: vec![super::messages::TranscriptResult {
                is_partial: false,
                ..Default::default()
            }],
        }),
    };
    assert_eq!(apply_transcript_event(&empty_final, &transcription), None);
    assert_eq!(transcription.lock().as_str(), "hello world");

    // an identical final is not a change
    assert_eq!(
        apply_transcript_event(&final_result("hello world"), &transcription),
        None
    );
}

#[test]
fn classify_routes_events_and_exceptions() {
    let event = EventStreamMessage::new(
        vec![(
            ":message-type".to_string(),
            HeaderValue::String("event".to_string()),
        )],
        bytes::Bytes::from_static(b"{\"Transcript\":{\"Results\":[]}}"),
    );
    assert!(matches!(classify(&event), Ok(Inbound::Transcript(_))));

    let exception = EventStreamMessage::new(
        vec![(
            ":message-type".to_string(),
            HeaderValue::String("exception".to_string()),
        )],
        bytes::Bytes::from_static(b"{\"Message\":\"Signature expired\"}"),
    );
    match classify(&exception) {
        Ok(Inbound::Exception(message)) => assert_eq!(message, "Signature expired"),
        _ => panic!("expected an exception"),
    }

    let undecodable = EventStreamMessage::new(
        vec![(
            ":message-type".to_string(),
            HeaderValue::String("event".to_string()),
        )],
        bytes::Bytes::from_static(b"not json"),
    );
    assert!(matches!(
        classify(&undecodable),
        Err(SessionError::FrameCorruption(_))
    ));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn feed_is_rejected_before_start() {
    let session = TranscribeSession::new(test_config("ws://127.0.0.1:1")).unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_ready());

    let result = session.feed(AudioChunk::new(vec![0.0; 16], 48_000)).await;
    assert!(matches!(result, Err(SessionError::InvalidState(_))));
}

#[tokio::test]
async fn connection_refused_is_terminal() {
    // nothing listens on port 1
    let mut session = TranscribeSession::new(test_config("ws://127.0.0.1:1")).unwrap();
    let result = session.start().await;
    assert!(matches!(result, Err(SessionError::Connection(_))));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn transcripts_accumulate_and_normal_close_is_silent() {
    let endpoint = spawn_server(|mut ws| async move {
        ws.send(transcript_frame("hel", true)).await.unwrap();
        ws.send(transcript_frame("hello", true)).await.unwrap();
        ws.send(transcript_frame("hello world", false)).await.unwrap();
        ws.send(final_without_alternatives_frame()).await.unwrap();
        ws.send(close_frame(CloseCode::Normal, "")).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let mut session = TranscribeSession::new(test_config(&endpoint)).unwrap();
    let (transcript_callback, transcripts) = transcript_collector();
    let (error_callback, errors) = error_collector();
    session.on_transcript(transcript_callback).await;
    session.on_error(error_callback).await;

    session.start().await.unwrap();

    wait_until(|| session.state() == SessionState::Closed).await;
    wait_until(|| !transcripts.lock().is_empty()).await;

    assert_eq!(session.transcription(), "hello world");
    // partials and the empty final never fire the callback
    assert_eq!(*transcripts.lock(), vec!["hello world".to_string()]);
    assert!(errors.lock().is_empty());
    assert!(!session.is_ready());
}

#[tokio::test]
async fn exception_then_abnormal_close_surfaces_one_error() {
    let endpoint = spawn_server(|mut ws| async move {
        ws.send(exception_frame("The request is not authorized"))
            .await
            .unwrap();
        ws.send(close_frame(CloseCode::Error, "internal failure"))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let mut session = TranscribeSession::new(test_config(&endpoint)).unwrap();
    let (error_callback, errors) = error_collector();
    session.on_error(error_callback).await;

    session.start().await.unwrap();
    wait_until(|| session.state() == SessionState::Failed).await;
    wait_until(|| !errors.lock().is_empty()).await;
    // give a wrongly duplicated close report time to show up
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reported = errors.lock();
    assert_eq!(reported.len(), 1, "exactly one error per session");
    match &reported[0] {
        SessionError::ProtocolException(message) => {
            assert!(message.contains("The request is not authorized"));
            assert!(!message.contains("internal failure"));
        }
        other => panic!("expected a protocol exception, got {other:?}"),
    }
}

#[tokio::test]
async fn abnormal_close_without_prior_error_reports_the_reason() {
    let endpoint = spawn_server(|mut ws| async move {
        ws.send(transcript_frame("hi", false)).await.unwrap();
        ws.send(close_frame(CloseCode::Error, "server going away"))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let mut session = TranscribeSession::new(test_config(&endpoint)).unwrap();
    let (error_callback, errors) = error_collector();
    session.on_error(error_callback).await;

    session.start().await.unwrap();
    wait_until(|| session.state() == SessionState::Failed).await;
    wait_until(|| !errors.lock().is_empty()).await;

    // the final transcript received before the failure is retained
    assert_eq!(session.transcription(), "hi");

    let reported = errors.lock();
    assert_eq!(reported.len(), 1);
    match &reported[0] {
        SessionError::StreamingClose(reason) => assert!(reason.contains("server going away")),
        other => panic!("expected a streaming close error, got {other:?}"),
    }
}

#[tokio::test]
async fn stop_sends_the_empty_sentinel_after_audio() {
    let observed = Arc::new(Mutex::new(Vec::<usize>::new()));
    let server_observed = observed.clone();

    let endpoint = spawn_server(move |mut ws| async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Binary(data) = message {
                let frame = unmarshal(&data).unwrap();
                assert_eq!(frame.message_type(), Some("event"));
                assert_eq!(
                    frame.header(":event-type").and_then(HeaderValue::as_str),
                    Some("AudioEvent")
                );
                let body_len = frame.body.len();
                server_observed.lock().push(body_len);
                if body_len == 0 {
                    ws.send(close_frame(CloseCode::Normal, "")).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                    break;
                }
            }
        }
    })
    .await;

    let mut session = TranscribeSession::new(test_config(&endpoint)).unwrap();
    let (error_callback, errors) = error_collector();
    session.on_error(error_callback).await;

    session.start().await.unwrap();

    let samples = vec![0.25f32; 480];
    session
        .feed(AudioChunk::new(samples.clone(), 48_000))
        .await
        .unwrap();
    let expected_pcm_len = crate::audio::downsample(&samples, 48_000, 44_100).len() * 2;

    // make sure the audio frame is on the wire before requesting the drain
    wait_until(|| !observed.lock().is_empty()).await;

    session.stop();
    // feeding after stop is rejected
    assert!(
        session
            .feed(AudioChunk::new(vec![0.0; 16], 48_000))
            .await
            .is_err()
    );

    wait_until(|| session.state() == SessionState::Closed).await;

    assert_eq!(*observed.lock(), vec![expected_pcm_len, 0]);
    assert!(errors.lock().is_empty());
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn attached_source_is_pumped_and_released() {
    let received_audio = Arc::new(Mutex::new(0usize));
    let server_received = received_audio.clone();

    let endpoint = spawn_server(move |mut ws| async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Binary(data) = message {
                let frame = unmarshal(&data).unwrap();
                if frame.body.is_empty() {
                    ws.send(close_frame(CloseCode::Normal, "")).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                    break;
                }
                *server_received.lock() += frame.body.len();
            }
        }
    })
    .await;

    let mut session = TranscribeSession::new(test_config(&endpoint)).unwrap();
    session.start().await.unwrap();

    let (capture_tx, source) = crate::audio::ChannelSource::new(8);
    session.attach_source(source).unwrap();

    for _ in 0..3 {
        capture_tx
            .send(AudioChunk::new(vec![0.1f32; 441], 44_100))
            .await
            .unwrap();
    }
    drop(capture_tx);

    wait_until(|| *received_audio.lock() == 3 * 441 * 2).await;

    session.stop();
    wait_until(|| session.state() == SessionState::Closed).await;
    session.shutdown().await.unwrap();
}
