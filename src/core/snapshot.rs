//! Declarative session configuration.
//!
//! The host describes what the session should look like as a
//! [`SessionSnapshot`]; the reconciler diffs consecutive snapshots into
//! imperative actions. Snapshots are immutable values: build a new one for
//! every change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which links the host wants connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub agent: bool,
    pub transcription: bool,
}

/// Full desired state for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub connection: ConnectionTarget,
    /// Applied through Settings on the next agent connection
    pub agent: AgentOptions,
    /// Sent once each time it changes to a new value
    pub pending_user_message: Option<String>,
    /// A `false -> true` edge interrupts agent playback
    pub interrupt: bool,
    /// Whether microphone capture should be running
    pub capture: bool,
}

impl SessionSnapshot {
    pub fn with_connection(mut self, agent: bool, transcription: bool) -> Self {
        self.connection = ConnectionTarget {
            agent,
            transcription,
        };
        self
    }

    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_user_message(mut self, message: Option<impl Into<String>>) -> Self {
        self.pending_user_message = message.map(Into::into);
        self
    }

    pub fn with_interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_agent(mut self, agent: AgentOptions) -> Self {
        self.agent = agent;
        self
    }
}

/// Provider selection for one agent stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Provider identifier, e.g. `deepgram` or `open_ai`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature; only meaningful for the think stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ProviderOptions {
    pub fn new(kind: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            model: Some(model.into()),
            temperature: None,
        }
    }
}

/// Agent behaviour sent in Settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOptions {
    pub language: Option<String>,
    /// System prompt
    pub instructions: Option<String>,
    pub listen: ProviderOptions,
    pub think: ProviderOptions,
    pub speak: ProviderOptions,
    pub greeting: Option<String>,
    pub functions: Vec<FunctionDefinition>,
    /// Prior turns replayed to the agent
    pub context: Option<AgentContext>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            language: Some("en".to_string()),
            instructions: None,
            listen: ProviderOptions::new("deepgram", "nova-3"),
            think: ProviderOptions::new("open_ai", "gpt-4o-mini"),
            speak: ProviderOptions::new("deepgram", "aura-2-thalia-en"),
            greeting: None,
            functions: Vec::new(),
            context: None,
        }
    }
}

impl AgentOptions {
    /// Number of prior messages; an absent context counts as zero.
    pub fn context_message_count(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.messages.len())
    }
}

/// A function the agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
    /// Present when the server calls an HTTP endpoint itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<FunctionEndpoint>,
}

fn empty_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            endpoint: None,
        }
    }

    pub fn is_client_side(&self) -> bool {
        self.endpoint.is_none()
    }
}

/// HTTP endpoint for server-handled functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Conversation history supplied at connect time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub messages: Vec<ContextMessage>,
}

/// One prior turn, serialized as `{"type":"History","role":...,"content":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "History")]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

impl ContextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}
