use gemini_live_types::audio::{is_audio_mime, sample_rate_from_mime, Base64EncodedAudioBytes};
use gemini_live_types::events::server::UsageMetadata;
use gemini_live_types::ServerMessage;

use crate::session::TransportFailure;

/// What the session loop reacts to, independent of the wire shape.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// The service acknowledged setup; the connection is usable.
    Opened,
    AudioChunk {
        data: Base64EncodedAudioBytes,
        sample_rate: u32,
    },
    UserTranscriptDelta(String),
    AssistantTranscriptDelta(String),
    TurnComplete,
    /// The user spoke over the model; queued playback is stale.
    Interrupted,
    Usage(UsageMetadata),
    Error(TransportFailure),
    Closed {
        reason: Option<String>,
    },
}

impl InboundEvent {
    /// Translates one server message into events, in the order the session must
    /// apply them: transcripts before audio, turn completion last.
    pub fn from_server_message(message: ServerMessage, default_rate: u32) -> Vec<InboundEvent> {
        let mut events = Vec::new();

        if message.setup_complete.is_some() {
            events.push(InboundEvent::Opened);
        }

        if let Some(content) = message.server_content {
            if let Some(transcription) = content.input_transcription {
                if !transcription.text.is_empty() {
                    events.push(InboundEvent::UserTranscriptDelta(transcription.text));
                }
            }
            if let Some(transcription) = content.output_transcription {
                if !transcription.text.is_empty() {
                    events.push(InboundEvent::AssistantTranscriptDelta(transcription.text));
                }
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    match part.inline_data {
                        Some(blob) if is_audio_mime(&blob.mime_type) => {
                            let sample_rate =
                                sample_rate_from_mime(&blob.mime_type).unwrap_or(default_rate);
                            events.push(InboundEvent::AudioChunk {
                                data: blob.data,
                                sample_rate,
                            });
                        }
                        Some(blob) => {
                            tracing::debug!("ignoring non-audio inline data: {}", blob.mime_type);
                        }
                        None => {
                            if let Some(text) = part.text {
                                tracing::trace!("model text part: {:?}", text);
                            }
                        }
                    }
                }
            }
            if content.interrupted == Some(true) {
                events.push(InboundEvent::Interrupted);
            }
            if content.turn_complete == Some(true) {
                events.push(InboundEvent::TurnComplete);
            }
        }

        if let Some(usage) = message.usage_metadata {
            events.push(InboundEvent::Usage(usage));
        }

        if let Some(go_away) = message.go_away {
            tracing::info!("service going away, time left: {:?}", go_away.time_left);
        }

        events
    }
}
