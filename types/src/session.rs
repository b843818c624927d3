use crate::audio::{INPUT_SAMPLE_RATE, Modality, OUTPUT_SAMPLE_RATE, Voice};

/// The `setup` payload sent once, as the first message of every connection.
///
/// Nothing in here is renegotiated mid-session; a reconnect replays the same value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Fully qualified model name, ex: "models/gemini-2.5-flash-native-audio-preview-09-2025"
    model: String,

    generation_config: GenerationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,

    /// Present (as an empty object) when the user's speech should be transcribed.
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<AudioTranscriptionConfig>,

    /// Present (as an empty object) when the model's speech should be transcribed.
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<AudioTranscriptionConfig>,

    /// Rate of the PCM16 frames the client submits. Carried in each frame's mime type.
    #[serde(skip)]
    input_sample_rate: u32,

    /// Rate the client expects inbound audio at when a chunk does not say otherwise.
    #[serde(skip)]
    output_sample_rate: u32,
}

impl SessionConfig {
    pub fn new() -> SessionConfigurator {
        SessionConfigurator::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.generation_config
            .speech_config
            .as_ref()
            .map(|speech| &speech.voice_config.prebuilt_voice_config.voice_name)
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction
            .as_ref()
            .and_then(|content| content.parts.first())
            .map(|part| part.text.as_str())
    }

    pub fn input_transcription_enabled(&self) -> bool {
        self.input_audio_transcription.is_some()
    }

    pub fn output_transcription_enabled(&self) -> bool {
        self.output_audio_transcription.is_some()
    }

    pub fn input_sample_rate(&self) -> u32 {
        self.input_sample_rate
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,

    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    voice_name: Voice,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextPart {
    text: String,
}

/// Serialized as `{}`; its presence is what switches transcription on.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioTranscriptionConfig {}

pub struct SessionConfigurator {
    session: SessionConfig,
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self {
            session: SessionConfig {
                model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: None,
                    temperature: None,
                },
                system_instruction: None,
                input_audio_transcription: Some(AudioTranscriptionConfig::default()),
                output_audio_transcription: Some(AudioTranscriptionConfig::default()),
                input_sample_rate: INPUT_SAMPLE_RATE,
                output_sample_rate: OUTPUT_SAMPLE_RATE,
            },
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.session.model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.session.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
            },
        });
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.session.system_instruction = Some(Content {
            parts: vec![TextPart {
                text: instruction.to_string(),
            }],
        });
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.session.generation_config.temperature = Some(temperature);
        self
    }

    pub fn with_input_transcription(mut self, enabled: bool) -> Self {
        self.session.input_audio_transcription = enabled.then(AudioTranscriptionConfig::default);
        self
    }

    pub fn with_output_transcription(mut self, enabled: bool) -> Self {
        self.session.output_audio_transcription = enabled.then(AudioTranscriptionConfig::default);
        self
    }

    pub fn with_input_sample_rate(mut self, rate: u32) -> Self {
        self.session.input_sample_rate = rate;
        self
    }

    pub fn with_output_sample_rate(mut self, rate: u32) -> Self {
        self.session.output_sample_rate = rate;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.session
    }
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}
