use serde::Serialize;
use serde_json::Value;

use super::settings::SettingsMessage;

/// Outbound control message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Settings(SettingsMessage),
    KeepAlive,
    InjectUserMessage { content: String },
    FunctionCallResponse(FunctionCallResponse),
    /// Asks the transcription service to flush and end the stream
    CloseStream,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Settings(_) => "Settings",
            ClientMessage::KeepAlive => "KeepAlive",
            ClientMessage::InjectUserMessage { .. } => "InjectUserMessage",
            ClientMessage::FunctionCallResponse(_) => "FunctionCallResponse",
            ClientMessage::CloseStream => "CloseStream",
        }
    }
}

/// Result of a client-side function call, encoded as `{"result": ...}` or
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCallOutcome {
    Result(Value),
    Error(String),
}

impl FunctionCallOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, FunctionCallOutcome::Error(_))
    }
}

/// Response to one function call ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCallResponse {
    pub id: String,
    pub name: String,
    /// JSON-encoded [`FunctionCallOutcome`]
    pub content: String,
}

impl FunctionCallResponse {
    pub fn new(id: &str, name: &str, outcome: &FunctionCallOutcome) -> Self {
        // Encoding a Value or String cannot fail; keep the error visible anyway.
        let content = serde_json::to_string(outcome).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("failed to encode function result: {e}") })
                .to_string()
        });
        Self {
            id: id.to_string(),
            name: name.to_string(),
            content,
        }
    }
}
