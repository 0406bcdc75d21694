//! Wire message types for streaming transcription responses.
//!
//! Transcript events arrive as JSON payloads of `event` frames; anything
//! with a different `:message-type` is a service exception whose payload
//! carries a human-readable `Message`.

use serde::{Deserialize, Serialize};

/// Payload of a transcript event frame.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptEvent {
    /// The transcript container; absent on keep-alive style events.
    #[serde(rename = "Transcript")]
    pub transcript: Option<Transcript>,
}

/// The transcript container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Transcript {
    /// Result segments, in stream order.
    #[serde(rename = "Results", default)]
    pub results: Vec<TranscriptResult>,
}

/// One result segment, partial or final.
///
/// Partial segments may still change as more audio arrives; a final
/// segment is the service's settled output for its time span.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptResult {
    /// Unique identifier of this segment.
    #[serde(rename = "ResultId")]
    pub result_id: Option<String>,

    /// Segment start offset in seconds.
    #[serde(rename = "StartTime")]
    pub start_time: Option<f64>,

    /// Segment end offset in seconds.
    #[serde(rename = "EndTime")]
    pub end_time: Option<f64>,

    /// Whether this segment may still change.
    #[serde(rename = "IsPartial", default)]
    pub is_partial: bool,

    /// Alternative readings, best first.
    #[serde(rename = "Alternatives", default)]
    pub alternatives: Vec<Alternative>,
}

/// One alternative reading of a segment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Alternative {
    /// The transcribed text.
    #[serde(rename = "Transcript")]
    pub transcript: Option<String>,
}

/// Payload of a non-event (exception) frame.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExceptionMessage {
    /// Human-readable description from the service.
    #[serde(rename = "Message", default)]
    pub message: String,
}
