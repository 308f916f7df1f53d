use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional; anything missing falls back to environment
/// variables and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// api_key: "your-api-key"
///
/// agent:
///   url: "wss://agent.deepgram.com/v1/agent/converse"
///
/// transcription:
///   url: "wss://api.deepgram.com/v1/listen"
///   model: "nova-3"
///   language: "en"
///   interim_results: true
///   utterance_end_ms: 1000
///   vad_events: true
///   smart_format: true
///
/// audio:
///   input_encoding: "linear16"
///   input_sample_rate: 16000
///   output_encoding: "linear16"
///   output_sample_rate: 24000
///   output_container: "none"
///
/// timeouts:
///   keepalive_interval_ms: 5000
///   connect_ms: 10000
///   close_ms: 2000
///   function_call_ms: 30000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api_key: Option<String>,
    pub agent: Option<AgentYaml>,
    pub transcription: Option<TranscriptionYaml>,
    pub audio: Option<AudioYaml>,
    pub timeouts: Option<TimeoutsYaml>,
}

/// Agent link settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentYaml {
    pub url: Option<String>,
}

/// Transcription link settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptionYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub interim_results: Option<bool>,
    pub utterance_end_ms: Option<u32>,
    pub vad_events: Option<bool>,
    pub smart_format: Option<bool>,
}

/// Audio formats from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_encoding: Option<String>,
    pub input_sample_rate: Option<u32>,
    pub output_encoding: Option<String>,
    pub output_sample_rate: Option<u32>,
    pub output_container: Option<String>,
}

/// Timeouts from YAML, in milliseconds
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    /// `0` disables keepalive
    pub keepalive_interval_ms: Option<u64>,
    pub connect_ms: Option<u64>,
    pub close_ms: Option<u64>,
    pub function_call_ms: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config: YamlConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }
}
