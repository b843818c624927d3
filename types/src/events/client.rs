use crate::audio::Base64EncodedAudioBytes;

/// `realtimeInput` message carrying one captured audio frame.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    audio: Blob,
}

impl RealtimeInput {
    pub fn audio(data: Base64EncodedAudioBytes, mime_type: &str) -> Self {
        Self {
            audio: Blob {
                mime_type: mime_type.to_string(),
                data,
            },
        }
    }

    pub fn blob(&self) -> &Blob {
        &self.audio
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    mime_type: String,
    data: Base64EncodedAudioBytes,
}

impl Blob {
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &Base64EncodedAudioBytes {
        &self.data
    }
}
