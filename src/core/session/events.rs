//! Payloads delivered to host callbacks.

use serde::Serialize;

use crate::core::link::{CloseReason, LinkKind, LinkState};
use crate::core::protocol::TranscriptResults;

/// A link changed state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStateChange {
    pub link: LinkKind,
    pub state: LinkState,
    /// Set when `state` is `Closed`
    pub reason: Option<CloseReason>,
    /// Set when `state` is `Open`
    pub is_reconnection: Option<bool>,
}

/// An agent connection was re-established without prior turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextMissing {
    pub connection_id: u64,
}

/// Progress of the agent's turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "activity", rename_all = "snake_case")]
pub enum AgentActivity {
    Thinking {
        content: Option<String>,
    },
    StartedSpeaking {
        total_latency: Option<f64>,
        tts_latency: Option<f64>,
        ttt_latency: Option<f64>,
    },
    AudioDone,
}

/// A transcript from the transcription link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEvent {
    pub transcript: String,
    pub is_final: bool,
    pub speech_final: bool,
    pub start: f64,
    pub duration: f64,
}

impl From<&TranscriptResults> for TranscriptEvent {
    fn from(results: &TranscriptResults) -> Self {
        Self {
            transcript: results.transcript().to_string(),
            is_final: results.is_final,
            speech_final: results.speech_final,
            start: results.start,
            duration: results.duration,
        }
    }
}
