//! Wire messages for the agent and transcription links.
//!
//! Inbound messages are a closed sum type keyed by the JSON `type` field.
//! Unrecognised types become [`ServerMessage::Unknown`]; recognised types
//! whose payload does not fit become [`ServerMessage::Malformed`] so a bad
//! message never aborts processing of the ones that follow.

mod client;
mod settings;

pub use client::{ClientMessage, FunctionCallOutcome, FunctionCallResponse};
pub use settings::{
    AgentSettings, AudioInputSettings, AudioOutputSettings, AudioSettings, ListenSettings,
    ProviderSettings, SettingsMessage, SpeakSettings, ThinkSettings,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every inbound `type` this client understands.
pub const RECOGNIZED_TYPES: &[&str] = &[
    "Welcome",
    "SettingsApplied",
    "ConversationText",
    "UserStartedSpeaking",
    "UserStoppedSpeaking",
    "AgentThinking",
    "AgentStartedSpeaking",
    "AgentAudioDone",
    "FunctionCallRequest",
    "PromptUpdated",
    "SpeakUpdated",
    "InjectionRefused",
    "History",
    "Warning",
    "Error",
    "VADEvent",
    "Results",
    "UtteranceEnd",
    "SpeechStarted",
    "Metadata",
];

pub fn is_recognized_type(message_type: &str) -> bool {
    RECOGNIZED_TYPES.contains(&message_type)
}

// =============================================================================
// Inbound payloads
// =============================================================================

/// One turn of conversation text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationText {
    pub role: String,
    pub content: String,
}

/// Function calls requested by the agent in one message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCallRequestMessage {
    pub functions: Vec<FunctionCallDescriptor>,
}

/// A single requested call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCallDescriptor {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    pub arguments: String,
    /// `false` means the server executes the call itself
    #[serde(default)]
    pub client_side: bool,
}

/// Speech-to-text result from the transcription link.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptResults {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    pub channel: TranscriptChannel,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptChannel {
    #[serde(default)]
    pub alternatives: Vec<TranscriptAlternative>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptAlternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

impl TranscriptResults {
    /// Best alternative's transcript, empty when there is none.
    pub fn transcript(&self) -> &str {
        self.channel
            .alternatives
            .first()
            .map(|a| a.transcript.as_str())
            .unwrap_or_default()
    }
}

// =============================================================================
// ServerMessage
// =============================================================================

/// Inbound message from either link.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Welcome {
        #[serde(default)]
        request_id: Option<String>,
    },
    SettingsApplied,
    ConversationText(ConversationText),
    UserStartedSpeaking,
    UserStoppedSpeaking {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    AgentThinking {
        #[serde(default)]
        content: Option<String>,
    },
    AgentStartedSpeaking {
        #[serde(default)]
        total_latency: Option<f64>,
        #[serde(default)]
        tts_latency: Option<f64>,
        #[serde(default)]
        ttt_latency: Option<f64>,
    },
    AgentAudioDone,
    FunctionCallRequest(FunctionCallRequestMessage),
    PromptUpdated,
    SpeakUpdated,
    InjectionRefused {
        #[serde(default)]
        message: Option<String>,
    },
    History {
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    Warning {
        #[serde(default)]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
    Error {
        #[serde(default)]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
    #[serde(rename = "VADEvent")]
    VadEvent {
        speech_detected: bool,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    Results(TranscriptResults),
    UtteranceEnd {
        #[serde(default)]
        channel: Vec<u32>,
        last_word_end: f64,
    },
    SpeechStarted {
        #[serde(default)]
        channel: Vec<u32>,
        timestamp: f64,
    },
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    /// A `type` this client does not know
    #[serde(skip)]
    Unknown { message_type: String },
    /// A known `type` whose payload failed to decode
    #[serde(skip)]
    Malformed { message_type: String, reason: String },
}

impl ServerMessage {
    /// Decodes a JSON value. Returns `None` when there is no string `type`.
    pub fn from_value(value: Value) -> Option<Self> {
        let message_type = value.get("type")?.as_str()?.to_owned();

        if !is_recognized_type(&message_type) {
            return Some(ServerMessage::Unknown { message_type });
        }

        Some(
            serde_json::from_value::<ServerMessage>(value).unwrap_or_else(|e| {
                ServerMessage::Malformed {
                    message_type,
                    reason: e.to_string(),
                }
            }),
        )
    }

    /// Wire `type` of this message.
    pub fn message_type(&self) -> &str {
        match self {
            ServerMessage::Welcome { .. } => "Welcome",
            ServerMessage::SettingsApplied => "SettingsApplied",
            ServerMessage::ConversationText(_) => "ConversationText",
            ServerMessage::UserStartedSpeaking => "UserStartedSpeaking",
            ServerMessage::UserStoppedSpeaking { .. } => "UserStoppedSpeaking",
            ServerMessage::AgentThinking { .. } => "AgentThinking",
            ServerMessage::AgentStartedSpeaking { .. } => "AgentStartedSpeaking",
            ServerMessage::AgentAudioDone => "AgentAudioDone",
            ServerMessage::FunctionCallRequest(_) => "FunctionCallRequest",
            ServerMessage::PromptUpdated => "PromptUpdated",
            ServerMessage::SpeakUpdated => "SpeakUpdated",
            ServerMessage::InjectionRefused { .. } => "InjectionRefused",
            ServerMessage::History { .. } => "History",
            ServerMessage::Warning { .. } => "Warning",
            ServerMessage::Error { .. } => "Error",
            ServerMessage::VadEvent { .. } => "VADEvent",
            ServerMessage::Results(_) => "Results",
            ServerMessage::UtteranceEnd { .. } => "UtteranceEnd",
            ServerMessage::SpeechStarted { .. } => "SpeechStarted",
            ServerMessage::Metadata { .. } => "Metadata",
            ServerMessage::Unknown { message_type } => message_type,
            ServerMessage::Malformed { message_type, .. } => message_type,
        }
    }
}
