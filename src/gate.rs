//! Half-duplex backpressure between capture and the outbound connection.
//!
//! While local playback is audible the microphone would pick the assistant's
//! own voice back up, so frames captured during playback are held instead of
//! sent. Nothing is dropped: when playback ends the held frames are released
//! in capture order, ahead of anything captured afterwards.

use std::collections::VecDeque;

use crate::codec::AudioFrame;

/// What the gate decided for an offered frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// Send this frame now.
    Transmit(AudioFrame),
    /// The frame was queued behind playback.
    Held,
}

#[derive(Debug, Default)]
pub struct CaptureGate {
    speaking: bool,
    pending: VecDeque<AudioFrame>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn offer(&mut self, frame: AudioFrame) -> Admission {
        if self.speaking {
            self.pending.push_back(frame);
            return Admission::Held;
        }
        // Held frames are always released on the falling edge, so the queue
        // can only be non-empty while speaking.
        debug_assert!(self.pending.is_empty());
        Admission::Transmit(frame)
    }

    /// Updates the speaking signal. On the speaking -> silent edge the whole
    /// queue is handed back, in capture order, for immediate transmission; the
    /// gate's own queue is left empty in the same step.
    pub fn set_speaking(&mut self, speaking: bool) -> VecDeque<AudioFrame> {
        let was_speaking = std::mem::replace(&mut self.speaking, speaking);
        if was_speaking && !speaking {
            if !self.pending.is_empty() {
                tracing::debug!("releasing {} held frame(s)", self.pending.len());
            }
            return std::mem::take(&mut self.pending);
        }
        VecDeque::new()
    }

    /// Discards held frames without sending them. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.speaking = false;
        dropped
    }
}
