//! Gap-free scheduling of inbound audio chunks.
//!
//! Chunks arrive at network cadence; each is placed immediately after the one
//! before it on the playback clock, or at "now" when nothing is playing. The
//! speaking signal is the non-emptiness of the active set, recomputed whenever a
//! unit is inserted or reaches its completion deadline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Monotonic playback clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The tokio clock; pausable in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Where scheduled audio goes, ex: a ring buffer feeding an output stream.
pub trait PlaybackSink: Send {
    /// Hands over a unit. Units arrive in schedule order and never overlap.
    fn play(&mut self, unit: &PlaybackUnit);

    /// Drops anything queued but not yet audible.
    fn halt(&mut self);
}

#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    id: u64,
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    scheduled_start: Instant,
    duration: Duration,
}

impl PlaybackUnit {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn scheduled_start(&self) -> Instant {
        self.scheduled_start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end(&self) -> Instant {
        self.scheduled_start + self.duration
    }
}

/// Where a unit landed on the playback clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: Instant,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ActiveUnit {
    id: u64,
    end: Instant,
}

pub struct PlaybackScheduler {
    clock: Arc<dyn Clock>,
    sink: Box<dyn PlaybackSink>,
    next_start: Instant,
    // Ordered by start; since units never overlap, also ordered by end.
    active: VecDeque<ActiveUnit>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn Clock>, sink: Box<dyn PlaybackSink>) -> Self {
        let next_start = clock.now();
        Self {
            clock,
            sink,
            next_start,
            active: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Schedules a decoded chunk right after the previous one, or now if idle.
    /// Empty chunks are ignored.
    pub fn enqueue(&mut self, samples: Vec<f32>, sample_rate: u32, channels: u16) -> Option<Slot> {
        let channels = channels.max(1);
        let frames = samples.len() / channels as usize;
        if frames == 0 || sample_rate == 0 {
            return None;
        }

        self.reap();
        let now = self.clock.now();
        if self.active.is_empty() {
            // New stream epoch; a stale next_start would delay or burst.
            self.next_start = now;
        }
        let start = self.next_start.max(now);
        let duration = Duration::from_nanos(frames as u64 * 1_000_000_000 / sample_rate as u64);

        let unit = PlaybackUnit {
            id: self.next_id,
            samples,
            sample_rate,
            channels,
            scheduled_start: start,
            duration,
        };
        self.next_id += 1;
        self.next_start = unit.end();
        self.active.push_back(ActiveUnit {
            id: unit.id,
            end: unit.end(),
        });
        tracing::trace!(
            "scheduled unit {} at +{:?} for {:?}",
            unit.id,
            start.saturating_duration_since(now),
            duration
        );
        self.sink.play(&unit);

        Some(Slot { start, duration })
    }

    /// Removes every unit whose playback has completed. Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        while let Some(unit) = self.active.front() {
            if unit.end > now {
                break;
            }
            tracing::trace!("unit {} completed", unit.id);
            self.active.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// The instant the earliest active unit completes.
    pub fn next_completion(&self) -> Option<Instant> {
        self.active.front().map(|unit| unit.end)
    }

    /// Stops playback: clears the active set and flushes the sink.
    pub fn halt(&mut self) {
        if !self.active.is_empty() {
            tracing::debug!("halting playback with {} unit(s) in flight", self.active.len());
        }
        self.active.clear();
        self.sink.halt();
        self.next_start = self.clock.now();
    }
}
