//! Application configuration.
//!
//! Settings come from the environment (a `.env` file is loaded first when
//! present) and are parsed once at startup.

use std::time::Duration;

use gemini_live_types::audio::Voice;
use gemini_live_types::SessionConfig;
use secrecy::SecretString;
use tracing::Level;

use crate::auxiliary::AuxSettings;
use crate::client;
use crate::session::ReconnectPolicy;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TARGET_LANGUAGE: &str = "English";
pub const DEFAULT_NATIVE_LANGUAGE: &str = "Chinese";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<SecretString>,
    /// `None` keeps the session default.
    pub model: Option<String>,
    pub text_model: String,
    pub voice: Voice,
    pub system_instruction: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub target_language: String,
    pub native_language: String,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: required to start a session.
    // *   `GEMINI_MODEL`, `GEMINI_TEXT_MODEL`, `GEMINI_VOICE`, `SYSTEM_INSTRUCTION`: optional.
    // *   `RECONNECT_MAX_ATTEMPTS` (3) and `RECONNECT_DELAY_MS` (2000).
    // *   `TARGET_LANGUAGE` (English) and `NATIVE_LANGUAGE` (Chinese).
    // *   `RUST_LOG`: defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|name| std::env::var(name).ok())?;
        tracing::debug!("configuration loaded: {:?}", config);
        Ok(config)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ReconnectPolicy::default();

        let max_attempts = match var("RECONNECT_MAX_ATTEMPTS") {
            Some(value) => parse_number("RECONNECT_MAX_ATTEMPTS", value)?,
            None => defaults.max_attempts,
        };
        let delay = match var("RECONNECT_DELAY_MS") {
            Some(value) => Duration::from_millis(parse_number("RECONNECT_DELAY_MS", value)?),
            None => defaults.delay,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidValue {
                name: "RUST_LOG",
                value: log_level_str.clone(),
            })?;

        Ok(Self {
            api_key: var(client::consts::GEMINI_API_KEY).map(SecretString::from),
            model: var("GEMINI_MODEL"),
            text_model: var("GEMINI_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            voice: var("GEMINI_VOICE")
                .map(|v| v.parse().unwrap_or_else(|never| match never {}))
                .unwrap_or_default(),
            system_instruction: var("SYSTEM_INSTRUCTION"),
            reconnect: ReconnectPolicy {
                max_attempts,
                delay,
            },
            target_language: var("TARGET_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string()),
            native_language: var("NATIVE_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_NATIVE_LANGUAGE.to_string()),
            log_level,
        })
    }

    /// The setup message every connection of a session opens with.
    pub fn session_config(&self) -> SessionConfig {
        let mut builder = SessionConfig::new()
            .with_voice(self.voice.clone())
            .with_input_transcription(true)
            .with_output_transcription(true);
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        if let Some(instruction) = &self.system_instruction {
            builder = builder.with_system_instruction(instruction);
        }
        builder.build()
    }

    pub fn client_config(&self) -> client::Config {
        let mut builder = client::Config::builder();
        if let Some(api_key) = &self.api_key {
            builder = builder.with_api_key(api_key.clone());
        }
        builder.build()
    }

    pub fn aux_settings(&self) -> AuxSettings {
        AuxSettings::new(&self.target_language, &self.native_language)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}
