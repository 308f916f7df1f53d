//! The Settings message sent once per agent connection.

use serde::Serialize;

use crate::config::AudioFormatConfig;
use crate::core::snapshot::{AgentContext, AgentOptions, FunctionDefinition, ProviderOptions};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsMessage {
    pub audio: AudioSettings,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSettings {
    pub input: AudioInputSettings,
    pub output: AudioOutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInputSettings {
    pub encoding: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioOutputSettings {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub listen: ListenSettings,
    pub think: ThinkSettings,
    pub speak: SpeakSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<AgentContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenSettings {
    pub provider: ProviderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkSettings {
    pub provider: ProviderSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Omitted entirely when no functions are declared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakSettings {
    pub provider: ProviderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSettings {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl From<&ProviderOptions> for ProviderSettings {
    fn from(options: &ProviderOptions) -> Self {
        Self {
            provider_type: options.kind.clone(),
            model: options.model.clone(),
            temperature: options.temperature,
        }
    }
}

impl SettingsMessage {
    /// Builds Settings from the agent options and audio formats in effect.
    pub fn build(options: &AgentOptions, audio: &AudioFormatConfig) -> Self {
        let functions = (!options.functions.is_empty()).then(|| options.functions.clone());
        let context = options
            .context
            .as_ref()
            .filter(|context| !context.messages.is_empty())
            .cloned();

        Self {
            audio: AudioSettings {
                input: AudioInputSettings {
                    encoding: audio.input_encoding.clone(),
                    sample_rate: audio.input_sample_rate,
                },
                output: AudioOutputSettings {
                    encoding: audio.output_encoding.clone(),
                    sample_rate: audio.output_sample_rate,
                    container: audio.output_container.clone(),
                },
            },
            agent: AgentSettings {
                language: options.language.clone(),
                listen: ListenSettings {
                    provider: (&options.listen).into(),
                },
                think: ThinkSettings {
                    provider: (&options.think).into(),
                    prompt: options.instructions.clone(),
                    functions,
                },
                speak: SpeakSettings {
                    provider: (&options.speak).into(),
                },
                greeting: options.greeting.clone(),
                context,
            },
        }
    }
}
