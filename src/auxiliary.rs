//! Translation and reply suggestions, computed by a text-generation service
//! off the audio path.
//!
//! Every request runs on its own task and reports back through a channel. A
//! failed request only produces an [`AuxOutcome::Failed`]; it never reaches
//! the session.

use std::sync::{Arc, RwLock};

use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transcript::{Message, MessageId, Role};

pub const TEXT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const SUGGESTION_COUNT: usize = 3;
/// How many recent messages a suggestion request sees.
pub const SUGGESTION_HISTORY: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuxError {
    #[error("text generation request failed: {0}")]
    Request(String),
    #[error("text generation returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unusable text generation response: {0}")]
    InvalidResponse(String),
}

/// Settings the user may change while a session runs. Read when a request is
/// built, never captured earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxSettings {
    pub bilingual: bool,
    difficulty: u8,
    pub target_language: String,
    pub native_language: String,
}

impl AuxSettings {
    pub const MIN_DIFFICULTY: u8 = 1;
    pub const MAX_DIFFICULTY: u8 = 5;

    pub fn new(target_language: &str, native_language: &str) -> Self {
        Self {
            bilingual: true,
            difficulty: 3,
            target_language: target_language.to_string(),
            native_language: native_language.to_string(),
        }
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    /// Clamped to 1..=5.
    pub fn set_difficulty(&mut self, difficulty: u8) {
        self.difficulty = difficulty.clamp(Self::MIN_DIFFICULTY, Self::MAX_DIFFICULTY);
    }
}

pub type SharedSettings = Arc<RwLock<AuxSettings>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionLabel {
    Simple,
    Natural,
    Challenge,
}

/// One reply the user could say next, in the language being practised and
/// in their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub label: SuggestionLabel,
    pub target: String,
    pub native: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxTask {
    Translation(MessageId),
    Suggestions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuxOutcome {
    Translation { message: MessageId, text: String },
    Suggestions(Vec<Suggestion>),
    Failed { task: AuxTask, error: AuxError },
}

/// A service that answers a prompt with JSON matching `schema`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_json(
        &self,
        prompt: String,
        schema: serde_json::Value,
    ) -> Result<String, AuxError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// `models/{model}:generateContent` over HTTPS.
pub struct GeminiTextClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl GeminiTextClient {
    pub fn new(api_key: SecretString, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: TEXT_API_BASE_URL.to_string(),
            api_key,
            model: model.trim_start_matches("models/").to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn post(&self, body: serde_json::Value) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        self.client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))
    }
}

#[async_trait]
impl TextGenerator for GeminiTextClient {
    async fn generate_json(
        &self,
        prompt: String,
        schema: serde_json::Value,
    ) -> Result<String, AuxError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            }
        });

        let response = self
            .post(body)
            .await
            .map_err(|e| AuxError::Request(format!("{:#}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuxError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let reply = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| AuxError::InvalidResponse(e.to_string()))?;
        reply
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| AuxError::InvalidResponse("no text in response".to_string()))
    }
}

fn translation_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": { "translation": { "type": "STRING" } },
        "required": ["translation"]
    })
}

fn suggestion_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "suggestions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": { "type": "STRING", "enum": ["simple", "natural", "challenge"] },
                        "target": { "type": "STRING" },
                        "native": { "type": "STRING" }
                    },
                    "required": ["label", "target", "native"]
                }
            }
        },
        "required": ["suggestions"]
    })
}

fn translation_prompt(settings: &AuxSettings, text: &str) -> String {
    format!(
        "Translate this {} sentence into {}. Reply as JSON: {{\"translation\": <string>}}\n\n{}",
        settings.target_language, settings.native_language, text
    )
}

fn suggestion_prompt(settings: &AuxSettings, history: &[Message], partial: Option<&str>) -> String {
    let mut prompt = format!(
        "You help a learner practise spoken {target}. Their native language is {native}. \
         Their level is {level} on a scale of 1 (beginner) to 5 (fluent).\n\
         Suggest exactly {count} things the learner could say next: one \"simple\", one \
         \"natural\" and one \"challenge\". Give each in {target} as \"target\" and in \
         {native} as \"native\".\n\nConversation:\n",
        target = settings.target_language,
        native = settings.native_language,
        level = settings.difficulty(),
        count = SUGGESTION_COUNT,
    );
    let recent = history.len().saturating_sub(SUGGESTION_HISTORY);
    for message in &history[recent..] {
        let speaker = match message.role() {
            Role::User => "Learner",
            Role::Assistant => "Tutor",
        };
        prompt.push_str(&format!("{}: {}\n", speaker, message.text()));
    }
    if let Some(partial) = partial.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str(&format!("Learner (still speaking): {}\n", partial));
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct TranslationReply {
    translation: String,
}

#[derive(Debug, Deserialize)]
struct SuggestionReply {
    suggestions: Vec<Suggestion>,
}

fn parse_translation(raw: &str) -> Result<String, AuxError> {
    let reply: TranslationReply =
        serde_json::from_str(raw).map_err(|e| AuxError::InvalidResponse(e.to_string()))?;
    let translation = reply.translation.trim();
    if translation.is_empty() {
        return Err(AuxError::InvalidResponse("empty translation".to_string()));
    }
    Ok(translation.to_string())
}

fn parse_suggestions(raw: &str) -> Result<Vec<Suggestion>, AuxError> {
    let reply: SuggestionReply =
        serde_json::from_str(raw).map_err(|e| AuxError::InvalidResponse(e.to_string()))?;
    let suggestions = reply.suggestions;
    if suggestions.len() != SUGGESTION_COUNT {
        return Err(AuxError::InvalidResponse(format!(
            "expected {} suggestions, got {}",
            SUGGESTION_COUNT,
            suggestions.len()
        )));
    }
    for label in [
        SuggestionLabel::Simple,
        SuggestionLabel::Natural,
        SuggestionLabel::Challenge,
    ] {
        if !suggestions.iter().any(|s| s.label == label) {
            return Err(AuxError::InvalidResponse(format!(
                "missing {:?} suggestion",
                label
            )));
        }
    }
    if suggestions
        .iter()
        .any(|s| s.target.trim().is_empty() || s.native.trim().is_empty())
    {
        return Err(AuxError::InvalidResponse("blank suggestion".to_string()));
    }
    Ok(suggestions)
}

/// Spawns translation and suggestion requests and forwards their outcomes.
#[derive(Clone)]
pub struct AuxiliaryTaskCoordinator {
    generator: Arc<dyn TextGenerator>,
    settings: SharedSettings,
    outcomes: mpsc::UnboundedSender<AuxOutcome>,
}

impl AuxiliaryTaskCoordinator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        settings: SharedSettings,
    ) -> (Self, mpsc::UnboundedReceiver<AuxOutcome>) {
        let (outcomes, outcome_rx) = mpsc::unbounded_channel();
        (
            Self {
                generator,
                settings,
                outcomes,
            },
            outcome_rx,
        )
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    /// A snapshot of the current settings.
    pub fn current_settings(&self) -> AuxSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Auto-translates finalized assistant messages while bilingual mode is on.
    pub fn on_message(&self, message: &Message) -> Option<JoinHandle<()>> {
        if message.role() != Role::Assistant || !self.current_settings().bilingual {
            return None;
        }
        Some(self.translate(message))
    }

    pub fn translate(&self, message: &Message) -> JoinHandle<()> {
        let id = message.id();
        let text = message.text().to_string();
        let coordinator = self.clone();
        tokio::spawn(async move {
            let settings = coordinator.current_settings();
            let outcome = match coordinator
                .generator
                .generate_json(translation_prompt(&settings, &text), translation_schema())
                .await
                .and_then(|raw| parse_translation(&raw))
            {
                Ok(text) => AuxOutcome::Translation { message: id, text },
                Err(error) => {
                    tracing::warn!("translation of {} failed: {}", id, error);
                    AuxOutcome::Failed {
                        task: AuxTask::Translation(id),
                        error,
                    }
                }
            };
            coordinator.report(outcome);
        })
    }

    pub fn suggest(&self, history: &[Message], partial: Option<&str>) -> JoinHandle<()> {
        let history = history.to_vec();
        let partial = partial.map(str::to_string);
        let coordinator = self.clone();
        tokio::spawn(async move {
            let settings = coordinator.current_settings();
            let prompt = suggestion_prompt(&settings, &history, partial.as_deref());
            let outcome = match coordinator
                .generator
                .generate_json(prompt, suggestion_schema())
                .await
                .and_then(|raw| parse_suggestions(&raw))
            {
                Ok(suggestions) => AuxOutcome::Suggestions(suggestions),
                Err(error) => {
                    tracing::warn!("suggestion request failed: {}", error);
                    AuxOutcome::Failed {
                        task: AuxTask::Suggestions,
                        error,
                    }
                }
            };
            coordinator.report(outcome);
        })
    }

    fn report(&self, outcome: AuxOutcome) {
        if self.outcomes.send(outcome).is_err() {
            tracing::debug!("auxiliary outcome dropped, no listener");
        }
    }
}
