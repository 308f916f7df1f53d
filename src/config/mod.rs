//! Configuration module for the voice agent client
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use waav_agent_client::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = ClientConfig::from_file(Path::new("client.yaml"))?;
//! println!("Agent endpoint: {}", config.agent_url);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::core::link::{KeepaliveConfig, LinkEndpoint, LinkKind, LinkOptions};

mod yaml;

pub use yaml::{AgentYaml, AudioYaml, TimeoutsYaml, TranscriptionYaml, YamlConfig};

pub const DEFAULT_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_FUNCTION_CALL_TIMEOUT_MS: u64 = 30_000;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("API key not configured (set VOICE_AGENT_API_KEY or DEEPGRAM_API_KEY)")]
    MissingApiKey,

    #[error("Transcription URL not configured (set VOICE_AGENT_TRANSCRIPTION_URL)")]
    MissingTranscriptionUrl,

    #[error("Invalid URL for {field}: {message}")]
    InvalidUrl { field: &'static str, message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),
}

/// Audio formats negotiated in Settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormatConfig {
    pub input_encoding: String,
    pub input_sample_rate: u32,
    pub output_encoding: String,
    pub output_sample_rate: u32,
    /// `none` asks for raw frames without a container header
    pub output_container: Option<String>,
}

impl Default for AudioFormatConfig {
    fn default() -> Self {
        Self {
            input_encoding: "linear16".to_string(),
            input_sample_rate: 16_000,
            output_encoding: "linear16".to_string(),
            output_sample_rate: 24_000,
            output_container: Some("none".to_string()),
        }
    }
}

/// Query parameters for the transcription link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionOptions {
    pub model: String,
    pub language: Option<String>,
    /// Defaults to the capture encoding when unset
    pub encoding: Option<String>,
    /// Defaults to the capture sample rate when unset
    pub sample_rate: Option<u32>,
    pub interim_results: bool,
    pub utterance_end_ms: Option<u32>,
    pub vad_events: bool,
    pub smart_format: bool,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            model: "nova-3".to_string(),
            language: Some("en".to_string()),
            encoding: None,
            sample_rate: None,
            interim_results: true,
            utterance_end_ms: Some(1_000),
            vad_events: true,
            smart_format: true,
        }
    }
}

/// Client configuration
///
/// Holds everything a session needs to reach the voice agent service:
/// credentials, endpoints, audio formats and timeouts.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: String,
    pub agent_url: String,
    pub transcription_url: Option<String>,
    pub transcription: TranscriptionOptions,
    pub audio: AudioFormatConfig,

    /// `0` disables keepalive
    pub keepalive_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub function_call_timeout_ms: u64,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("agent_url", &self.agent_url)
            .field("transcription_url", &self.transcription_url)
            .field("transcription", &self.transcription)
            .field("audio", &self.audio)
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("close_timeout_ms", &self.close_timeout_ms)
            .field("function_call_timeout_ms", &self.function_call_timeout_ms)
            .finish()
    }
}

impl ClientConfig {
    /// Defaults with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            agent_url: DEFAULT_AGENT_URL.to_string(),
            transcription_url: None,
            transcription: TranscriptionOptions::default(),
            audio: AudioFormatConfig::default(),
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            function_call_timeout_ms: DEFAULT_FUNCTION_CALL_TIMEOUT_MS,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Reads a `.env` file first if one exists; real environment variables
    /// win over its values.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation
    /// fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of environment variables
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let yaml = YamlConfig::from_file(path)?;
        let mut config = Self::load_env()?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn load_env() -> Result<Self, ConfigError> {
        let api_key = env_string("VOICE_AGENT_API_KEY")
            .or_else(|| env_string("DEEPGRAM_API_KEY"))
            .unwrap_or_default();
        let mut config = Self::new(api_key);

        if let Some(url) = env_string("VOICE_AGENT_URL") {
            config.agent_url = url;
        }
        config.transcription_url = env_string("VOICE_AGENT_TRANSCRIPTION_URL");

        if let Some(ms) = env_u64("VOICE_AGENT_KEEPALIVE_INTERVAL_MS")? {
            config.keepalive_interval_ms = ms;
        }
        if let Some(ms) = env_u64("VOICE_AGENT_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_u64("VOICE_AGENT_CLOSE_TIMEOUT_MS")? {
            config.close_timeout_ms = ms;
        }
        if let Some(ms) = env_u64("VOICE_AGENT_FUNCTION_CALL_TIMEOUT_MS")? {
            config.function_call_timeout_ms = ms;
        }

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(api_key) = yaml.api_key {
            self.api_key = api_key;
        }
        if let Some(url) = yaml.agent.and_then(|agent| agent.url) {
            self.agent_url = url;
        }

        if let Some(t) = yaml.transcription {
            if t.url.is_some() {
                self.transcription_url = t.url;
            }
            let options = &mut self.transcription;
            if let Some(model) = t.model {
                options.model = model;
            }
            if t.language.is_some() {
                options.language = t.language;
            }
            if t.encoding.is_some() {
                options.encoding = t.encoding;
            }
            if t.sample_rate.is_some() {
                options.sample_rate = t.sample_rate;
            }
            if let Some(interim) = t.interim_results {
                options.interim_results = interim;
            }
            if t.utterance_end_ms.is_some() {
                options.utterance_end_ms = t.utterance_end_ms;
            }
            if let Some(vad) = t.vad_events {
                options.vad_events = vad;
            }
            if let Some(smart) = t.smart_format {
                options.smart_format = smart;
            }
        }

        if let Some(a) = yaml.audio {
            if let Some(encoding) = a.input_encoding {
                self.audio.input_encoding = encoding;
            }
            if let Some(rate) = a.input_sample_rate {
                self.audio.input_sample_rate = rate;
            }
            if let Some(encoding) = a.output_encoding {
                self.audio.output_encoding = encoding;
            }
            if let Some(rate) = a.output_sample_rate {
                self.audio.output_sample_rate = rate;
            }
            if a.output_container.is_some() {
                self.audio.output_container = a.output_container;
            }
        }

        if let Some(t) = yaml.timeouts {
            if let Some(ms) = t.keepalive_interval_ms {
                self.keepalive_interval_ms = ms;
            }
            if let Some(ms) = t.connect_ms {
                self.connect_timeout_ms = ms;
            }
            if let Some(ms) = t.close_ms {
                self.close_timeout_ms = ms;
            }
            if let Some(ms) = t.function_call_ms {
                self.function_call_timeout_ms = ms;
            }
        }
    }

    /// Checks credentials, URLs and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        parse_ws_url("agent_url", &self.agent_url)?;
        if let Some(url) = &self.transcription_url {
            parse_ws_url("transcription_url", url)?;
        }

        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("close_timeout_ms", self.close_timeout_ms),
            ("function_call_timeout_ms", self.function_call_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio",
                message: "sample rates must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn has_transcription(&self) -> bool {
        self.transcription_url.is_some()
    }

    pub fn keepalive(&self) -> Option<KeepaliveConfig> {
        (self.keepalive_interval_ms > 0)
            .then(|| KeepaliveConfig::every(Duration::from_millis(self.keepalive_interval_ms)))
    }

    pub fn function_call_timeout(&self) -> Duration {
        Duration::from_millis(self.function_call_timeout_ms)
    }

    pub fn agent_endpoint(&self) -> Result<LinkEndpoint, ConfigError> {
        Ok(LinkEndpoint {
            url: parse_ws_url("agent_url", &self.agent_url)?,
            auth_token: Some(self.api_key.clone()),
        })
    }

    /// Transcription endpoint with the streaming query parameters applied.
    pub fn transcription_endpoint(&self) -> Result<LinkEndpoint, ConfigError> {
        let raw = self
            .transcription_url
            .as_deref()
            .ok_or(ConfigError::MissingTranscriptionUrl)?;
        let mut url = parse_ws_url("transcription_url", raw)?;

        let options = &self.transcription;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &options.model);
            if let Some(language) = &options.language {
                query.append_pair("language", language);
            }
            query.append_pair(
                "encoding",
                options
                    .encoding
                    .as_deref()
                    .unwrap_or(&self.audio.input_encoding),
            );
            query.append_pair(
                "sample_rate",
                &options
                    .sample_rate
                    .unwrap_or(self.audio.input_sample_rate)
                    .to_string(),
            );
            query.append_pair("channels", "1");
            query.append_pair("interim_results", bool_str(options.interim_results));
            if let Some(ms) = options.utterance_end_ms {
                query.append_pair("utterance_end_ms", &ms.to_string());
            }
            query.append_pair("vad_events", bool_str(options.vad_events));
            query.append_pair("smart_format", bool_str(options.smart_format));
        }

        Ok(LinkEndpoint {
            url,
            auth_token: Some(self.api_key.clone()),
        })
    }

    /// Link options for `kind` built from this configuration.
    pub fn link_options(&self, kind: LinkKind) -> Result<LinkOptions, ConfigError> {
        let endpoint = match kind {
            LinkKind::Agent => self.agent_endpoint()?,
            LinkKind::Transcription => self.transcription_endpoint()?,
        };
        Ok(LinkOptions::new(kind, endpoint)
            .with_keepalive(self.keepalive())
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_close_timeout(Duration::from_millis(self.close_timeout_ms)))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    env_string(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: name,
                    message: format!("{value:?}: {e}"),
                })
        })
        .transpose()
}

fn parse_ws_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        message: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            field,
            message: format!("expected ws or wss scheme, got {other}"),
        }),
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
