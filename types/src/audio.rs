mod consts;

pub use consts::*;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Builds the `audio/pcm;rate=N` mime type the service expects for raw PCM16.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{}{}", PCM_MIME_PREFIX, sample_rate)
}

/// Extracts the `rate=` parameter from a PCM mime type such as `audio/pcm;rate=24000`.
pub fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Whether the mime type denotes audio payload (as opposed to images or text).
pub fn is_audio_mime(mime_type: &str) -> bool {
    mime_type.trim_start().to_ascii_lowercase().starts_with("audio/")
}
