//! Conversion between captured float samples, the PCM16 wire format and its
//! base64 transport encoding.

use base64::Engine;
use gemini_live_types::audio::Base64EncodedAudioBytes;

/// Bytes per PCM16 sample.
const SAMPLE_WIDTH: usize = 2;
/// Full-scale magnitude of a 16-bit sample.
const PCM16_SCALE: f32 = 32768.0;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("chunk is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("chunk length {len} is not a multiple of {frame} bytes ({channels} channel(s) of pcm16)")]
    MalformedLength {
        len: usize,
        channels: u16,
        frame: usize,
    },
}

/// One capture callback's worth of outbound audio, already quantized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian PCM16 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    sample_rate: u32,
    channels: u16,
}

impl FrameCodec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Quantizes each sample to `round(s * 32768)`, clamped to the i16 range.
    pub fn encode(&self, samples: &[f32]) -> AudioFrame {
        AudioFrame {
            samples: samples.iter().map(|&s| quantize(s)).collect(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// The transport-safe text form of a frame.
    pub fn to_wire(&self, frame: &AudioFrame) -> Base64EncodedAudioBytes {
        base64::engine::general_purpose::STANDARD.encode(frame.to_bytes())
    }

    /// Decodes one inbound chunk. A malformed chunk is an error for that chunk only.
    pub fn decode(&self, fragment: &str) -> Result<Vec<f32>, CodecError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(fragment)?;
        self.decode_bytes(&bytes)
    }

    /// Reconstructs `int16 / 32768` per sample from little-endian PCM16 bytes.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
        let frame = self.channels as usize * SAMPLE_WIDTH;
        if bytes.len() % frame != 0 {
            return Err(CodecError::MalformedLength {
                len: bytes.len(),
                channels: self.channels,
                frame,
            });
        }
        Ok(bytes
            .chunks_exact(SAMPLE_WIDTH)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
            .collect())
    }
}

fn quantize(sample: f32) -> i16 {
    let scaled = (sample * PCM16_SCALE).round();
    // NaN maps to silence.
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
