//! Voice activity routing.
//!
//! Speech-related messages from both links update a single [`SpeechState`]
//! and are turned into host notifications. Everything else passes through
//! untouched.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::core::protocol::ServerMessage;

/// Whether the user is currently speaking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpeechState {
    pub is_user_speaking: bool,
}

/// A speech event, independent of which link reported it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SpeechEvent {
    UserStartedSpeaking,
    UserStoppedSpeaking { timestamp: Option<f64> },
    SpeechStarted { timestamp: f64 },
    UtteranceEnd { last_word_end: f64 },
    VadEvent { speech_detected: bool, timestamp: Option<f64> },
}

impl SpeechEvent {
    fn user_speaking(&self) -> bool {
        match self {
            SpeechEvent::UserStartedSpeaking | SpeechEvent::SpeechStarted { .. } => true,
            SpeechEvent::UserStoppedSpeaking { .. } | SpeechEvent::UtteranceEnd { .. } => false,
            SpeechEvent::VadEvent {
                speech_detected, ..
            } => *speech_detected,
        }
    }
}

/// Sent to the host for each routed speech event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechNotification {
    pub event: SpeechEvent,
    /// State after applying the event
    pub state: SpeechState,
    /// Whether the event flipped `is_user_speaking`
    pub changed: bool,
}

/// Tracks speech state across both links.
#[derive(Debug, Default)]
pub struct SpeechEventRouter {
    state: Mutex<SpeechState>,
}

impl SpeechEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SpeechState {
        *self.state.lock()
    }

    /// Applies a speech message. Returns `None` for non-speech messages and
    /// for speech messages that failed to decode.
    pub fn route(&self, message: &ServerMessage) -> Option<SpeechNotification> {
        let event = match message {
            ServerMessage::UserStartedSpeaking => SpeechEvent::UserStartedSpeaking,
            ServerMessage::UserStoppedSpeaking { timestamp } => SpeechEvent::UserStoppedSpeaking {
                timestamp: *timestamp,
            },
            ServerMessage::SpeechStarted { timestamp, .. } => SpeechEvent::SpeechStarted {
                timestamp: *timestamp,
            },
            ServerMessage::UtteranceEnd { last_word_end, .. } => SpeechEvent::UtteranceEnd {
                last_word_end: *last_word_end,
            },
            ServerMessage::VadEvent {
                speech_detected,
                timestamp,
            } => SpeechEvent::VadEvent {
                speech_detected: *speech_detected,
                timestamp: *timestamp,
            },
            ServerMessage::Malformed {
                message_type,
                reason,
            } if is_speech_type(message_type) => {
                trace!(message_type = %message_type, "Dropping malformed speech message: {}", reason);
                return None;
            }
            _ => return None,
        };

        let mut state = self.state.lock();
        let before = state.is_user_speaking;
        state.is_user_speaking = event.user_speaking();
        let changed = before != state.is_user_speaking;
        if changed {
            debug!(is_user_speaking = state.is_user_speaking, "Speech state changed");
        }

        Some(SpeechNotification {
            event,
            state: *state,
            changed,
        })
    }

    /// Forgets speech state, e.g. when a link closes.
    pub fn reset(&self) {
        *self.state.lock() = SpeechState::default();
    }
}

fn is_speech_type(message_type: &str) -> bool {
    matches!(
        message_type,
        "UserStartedSpeaking" | "UserStoppedSpeaking" | "SpeechStarted" | "UtteranceEnd" | "VADEvent"
    )
}
