use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gemini_live::codec::FrameCodec;
use gemini_live::events::InboundEvent;
use gemini_live::playback::{PlaybackSink, PlaybackUnit};
use gemini_live::session::{
    CaptureDevice, CaptureError, ConnectionState, Connector, Link, ReconnectPolicy,
    SessionError, SessionEvent, SessionEvents, SessionHandle, SessionManager, TransportFailure,
};
use gemini_live::transcript::Role;
use gemini_live::types::{ClientMessage, SessionConfig};
use tokio::sync::mpsc;
use tokio::time::Instant;

const DELAY: Duration = Duration::from_secs(2);
const SETUP: Duration = Duration::from_secs(5);

enum Step {
    Accept,
    Refuse(TransportFailure),
    /// The handshake never finishes.
    Stall,
}

/// The far end of one accepted connection.
struct Remote {
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::Sender<InboundEvent>,
}

impl Remote {
    async fn push(&self, event: InboundEvent) {
        self.inbound.send(event).await.unwrap();
    }

    async fn next_audio(&mut self) -> String {
        match self.outbound.recv().await {
            Some(ClientMessage::RealtimeInput(input)) => input.blob().data().clone(),
            other => panic!("expected an audio frame, got {:?}", other),
        }
    }
}

struct ScriptedConnector {
    steps: VecDeque<Step>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    remotes: mpsc::UnboundedSender<Remote>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&mut self, _setup: &SessionConfig) -> Result<Link, TransportFailure> {
        self.attempts.lock().unwrap().push(Instant::now());
        match self
            .steps
            .pop_front()
            .unwrap_or_else(|| Step::Refuse(TransportFailure::transient("no more steps")))
        {
            Step::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::channel(64);
                let _ = self.remotes.send(Remote {
                    outbound: out_rx,
                    inbound: in_tx,
                });
                Ok(Link::new(out_tx, in_rx))
            }
            Step::Refuse(failure) => Err(failure),
            Step::Stall => std::future::pending().await,
        }
    }
}

#[derive(Clone, Default)]
struct FakeMicrophone {
    frames: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    broken: bool,
}

impl FakeMicrophone {
    fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    fn is_held(&self) -> bool {
        self.frames.lock().unwrap().is_some()
    }

    fn say(&self, samples: Vec<f32>) {
        let frames = self.frames.lock().unwrap();
        frames.as_ref().expect("microphone not acquired").try_send(samples).unwrap();
    }
}

impl CaptureDevice for FakeMicrophone {
    fn acquire(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), CaptureError> {
        if self.broken {
            return Err(CaptureError::Denied("microphone access denied".into()));
        }
        *self.frames.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn release(&mut self) {
        self.frames.lock().unwrap().take();
    }
}

#[derive(Clone, Default)]
struct FakeSpeaker {
    played: Arc<Mutex<Vec<(Instant, Duration)>>>,
    halts: Arc<Mutex<usize>>,
}

impl PlaybackSink for FakeSpeaker {
    fn play(&mut self, unit: &PlaybackUnit) {
        self.played
            .lock()
            .unwrap()
            .push((unit.scheduled_start(), unit.duration()));
    }

    fn halt(&mut self) {
        *self.halts.lock().unwrap() += 1;
    }
}

struct Harness {
    handle: SessionHandle,
    events: SessionEvents,
    remotes: mpsc::UnboundedReceiver<Remote>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    mic: FakeMicrophone,
    speaker: FakeSpeaker,
}

impl Harness {
    fn new(steps: Vec<Step>) -> Self {
        Self::with_microphone(steps, FakeMicrophone::default())
    }

    fn with_microphone(steps: Vec<Step>, mic: FakeMicrophone) -> Self {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let (remote_tx, remotes) = mpsc::unbounded_channel();
        let speaker = FakeSpeaker::default();
        let connector = ScriptedConnector {
            steps: steps.into(),
            attempts: attempts.clone(),
            remotes: remote_tx,
        };
        let (manager, handle, events) = SessionManager::builder(SessionConfig::new().build())
            .with_policy(ReconnectPolicy {
                max_attempts: 3,
                delay: DELAY,
            })
            .with_setup_timeout(SETUP)
            .build(
                Box::new(connector),
                Box::new(mic.clone()),
                Box::new(speaker.clone()),
            );
        tokio::spawn(manager.run());
        Self {
            handle,
            events,
            remotes,
            attempts,
            mic,
            speaker,
        }
    }

    async fn wait_for(&self, state: ConnectionState) {
        let mut status = self.handle.status();
        status.wait_for(|s| *s == state).await.unwrap();
    }

    async fn wait_speaking(&self, speaking: bool) {
        let mut signal = self.handle.speaking();
        signal.wait_for(|s| *s == speaking).await.unwrap();
    }

    /// Starts the session and brings the first connection to `Active`.
    async fn activate(&mut self) -> Remote {
        self.handle.start().await.unwrap();
        let remote = self.remotes.recv().await.unwrap();
        remote.push(InboundEvent::Opened).await;
        self.wait_for(ConnectionState::Active).await;
        remote
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn assistant_audio(ms: u64) -> InboundEvent {
    let codec = FrameCodec::new(24000, 1);
    let samples = vec![0.25; (24 * ms) as usize];
    InboundEvent::AudioChunk {
        data: codec.to_wire(&codec.encode(&samples)),
        sample_rate: 24000,
    }
}

fn captured(tag: usize) -> Vec<f32> {
    vec![tag as f32 / 100.0; 320]
}

fn wire(samples: &[f32]) -> String {
    let codec = FrameCodec::new(16000, 1);
    codec.to_wire(&codec.encode(samples))
}

#[tokio::test(start_paused = true)]
async fn captured_frames_wait_for_the_assistant_and_keep_their_order() {
    let mut harness = Harness::new(vec![Step::Accept]);
    let mut remote = harness.activate().await;

    remote.push(assistant_audio(500)).await;
    harness.wait_speaking(true).await;

    for tag in 1..=3 {
        harness.mic.say(captured(tag));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(harness.handle.is_speaking());
    assert_eq!(harness.handle.stats().frames_held(), 3);
    assert!(remote.outbound.try_recv().is_err());

    harness.wait_speaking(false).await;
    harness.mic.say(captured(4));

    for tag in 1..=4 {
        assert_eq!(remote.next_audio().await, wire(&captured(tag)));
    }
    assert_eq!(harness.handle.stats().frames_sent(), 4);
}

#[tokio::test(start_paused = true)]
async fn chunks_play_back_to_back() {
    let mut harness = Harness::new(vec![Step::Accept]);
    let remote = harness.activate().await;

    for _ in 0..3 {
        remote.push(assistant_audio(100)).await;
    }
    harness.wait_speaking(true).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let played = harness.speaker.played.lock().unwrap().clone();
    assert_eq!(played.len(), 3);
    for pair in played.windows(2) {
        assert_eq!(pair[1].0, pair[0].0 + pair[0].1);
    }

    harness.wait_speaking(false).await;
    let (first_start, _) = played[0];
    assert!(Instant::now() >= first_start + Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn turn_complete_publishes_user_then_assistant() {
    let mut harness = Harness::new(vec![Step::Accept]);
    let remote = harness.activate().await;

    remote.push(InboundEvent::UserTranscriptDelta("How are ".into())).await;
    remote.push(InboundEvent::AssistantTranscriptDelta("Fine, ".into())).await;
    remote.push(InboundEvent::UserTranscriptDelta("you?".into())).await;
    remote.push(InboundEvent::AssistantTranscriptDelta("thanks.".into())).await;
    remote.push(InboundEvent::TurnComplete).await;

    let user = harness.events.recv().await.unwrap();
    let assistant = harness.events.recv().await.unwrap();
    match (user, assistant) {
        (SessionEvent::Message(user), SessionEvent::Message(assistant)) => {
            assert_eq!(user.role(), Role::User);
            assert_eq!(user.text(), "How are you?");
            assert_eq!(assistant.role(), Role::Assistant);
            assert_eq!(assistant.text(), "Fine, thanks.");
            assert!(user.id() < assistant.id());
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn interruption_silences_playback_and_releases_capture() {
    let mut harness = Harness::new(vec![Step::Accept]);
    let mut remote = harness.activate().await;

    remote.push(assistant_audio(2000)).await;
    harness.wait_speaking(true).await;
    harness.mic.say(captured(7));
    tokio::time::sleep(Duration::from_millis(10)).await;

    remote.push(InboundEvent::Interrupted).await;
    harness.wait_speaking(false).await;

    assert_eq!(*harness.speaker.halts.lock().unwrap(), 1);
    assert_eq!(remote.next_audio().await, wire(&captured(7)));
}

#[tokio::test(start_paused = true)]
async fn malformed_chunk_is_dropped_without_disturbing_the_session() {
    let mut harness = Harness::new(vec![Step::Accept]);
    let remote = harness.activate().await;

    remote
        .push(InboundEvent::AudioChunk {
            data: "not base64!".into(),
            sample_rate: 24000,
        })
        .await;
    remote.push(assistant_audio(100)).await;
    harness.wait_speaking(true).await;

    assert_eq!(harness.handle.stats().chunks_dropped(), 1);
    assert_eq!(harness.handle.stats().chunks_scheduled(), 1);
    assert_eq!(harness.handle.state(), ConnectionState::Active);
}

#[tokio::test(start_paused = true)]
async fn consecutive_drops_exhaust_the_budget() {
    let transient = || Step::Refuse(TransportFailure::transient("connection refused"));
    let mut harness = Harness::new(vec![Step::Accept, transient(), transient(), transient()]);
    let remote = harness.activate().await;

    let dropped_at = Instant::now();
    remote.push(InboundEvent::Closed { reason: None }).await;
    harness.wait_for(ConnectionState::Terminated).await;

    let attempts = harness.attempts();
    assert_eq!(attempts.len(), 4);
    assert_eq!(attempts[1] - dropped_at, DELAY);
    assert_eq!(attempts[2] - attempts[1], DELAY);
    assert_eq!(attempts[3] - attempts[2], DELAY);
    assert_eq!(harness.handle.stats().reconnect_attempts(), 3);
    assert!(!harness.mic.is_held());

    let events = harness.drain_events();
    let retries: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Retrying { attempt, max: 3, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2, 3]);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Error(SessionError::RetriesExhausted { attempts: 3, .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_restores_the_budget() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept, Step::Accept]);
    let first = harness.activate().await;

    first.push(InboundEvent::Closed { reason: Some("going away".into()) }).await;
    harness.wait_for(ConnectionState::Reconnecting).await;
    assert!(!harness.mic.is_held());

    let second = harness.remotes.recv().await.unwrap();
    assert_eq!(harness.handle.state(), ConnectionState::Reconnecting);
    second.push(InboundEvent::Opened).await;
    harness.wait_for(ConnectionState::Active).await;
    assert!(harness.mic.is_held());

    second.push(InboundEvent::Closed { reason: None }).await;
    harness.wait_for(ConnectionState::Reconnecting).await;

    let retries: Vec<u32> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Retrying { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 1]);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_terminates_without_retrying() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept]);
    let remote = harness.activate().await;

    remote
        .push(InboundEvent::Error(TransportFailure::permanent("API key not valid")))
        .await;
    harness.wait_for(ConnectionState::Terminated).await;
    tokio::time::sleep(DELAY * 5).await;

    assert_eq!(harness.attempts().len(), 1);
    assert_eq!(
        harness.drain_events(),
        vec![SessionEvent::Error(SessionError::AuthorizationRejected(
            "API key not valid".into()
        ))]
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_on_first_connect_is_terminal() {
    let mut harness = Harness::new(vec![Step::Refuse(TransportFailure::permanent(
        "handshake rejected with HTTP 401",
    ))]);
    harness.handle.start().await.unwrap();
    harness.wait_for(ConnectionState::Terminated).await;

    assert_eq!(harness.attempts().len(), 1);
    assert!(!harness.mic.is_held());
    assert!(matches!(
        harness.drain_events().as_slice(),
        [SessionEvent::Error(SessionError::AuthorizationRejected(_))]
    ));
}

#[tokio::test(start_paused = true)]
async fn stop_while_reconnecting_cancels_the_retry() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept]);
    let remote = harness.activate().await;

    remote.push(InboundEvent::Closed { reason: None }).await;
    harness.wait_for(ConnectionState::Reconnecting).await;

    harness.handle.stop().await.unwrap();
    assert_eq!(harness.handle.state(), ConnectionState::Terminated);
    tokio::time::sleep(DELAY * 5).await;

    assert_eq!(harness.attempts().len(), 1);
    assert!(harness
        .drain_events()
        .iter()
        .all(|e| matches!(e, SessionEvent::Retrying { .. })));

    harness.handle.stop().await.unwrap();
    assert_eq!(harness.handle.state(), ConnectionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn stop_discards_held_frames_and_restart_works() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept]);
    let mut remote = harness.activate().await;

    remote.push(assistant_audio(1000)).await;
    harness.wait_speaking(true).await;
    harness.mic.say(captured(1));
    tokio::time::sleep(Duration::from_millis(10)).await;

    harness.handle.stop().await.unwrap();
    assert_eq!(harness.handle.state(), ConnectionState::Terminated);
    assert!(!harness.handle.is_speaking());
    assert!(!harness.mic.is_held());
    assert!(remote.outbound.try_recv().is_err());

    let mut second = harness.activate().await;
    harness.mic.say(captured(2));
    assert_eq!(second.next_audio().await, wire(&captured(2)));
    assert_eq!(harness.attempts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn start_is_rejected_while_live() {
    let mut harness = Harness::new(vec![Step::Accept]);
    harness.activate().await;

    assert_eq!(
        harness.handle.start().await,
        Err(SessionError::AlreadyRunning(ConnectionState::Active))
    );
    assert_eq!(harness.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_microphone_fails_the_start() {
    let harness = Harness::with_microphone(vec![Step::Accept], FakeMicrophone::broken());

    let result = harness.handle.start().await;
    assert!(matches!(
        result,
        Err(SessionError::DeviceUnavailable(CaptureError::Denied(_)))
    ));
    assert_eq!(harness.handle.state(), ConnectionState::Idle);
    assert!(harness.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_first_connect_is_retried() {
    let mut harness = Harness::new(vec![
        Step::Refuse(TransportFailure::transient("dns lookup failed")),
        Step::Accept,
    ]);
    harness.handle.start().await.unwrap();
    harness.wait_for(ConnectionState::Reconnecting).await;

    let remote = harness.remotes.recv().await.unwrap();
    remote.push(InboundEvent::Opened).await;
    harness.wait_for(ConnectionState::Active).await;

    let attempts = harness.attempts();
    assert_eq!(attempts[1] - attempts[0], DELAY);
}

#[tokio::test(start_paused = true)]
async fn held_frames_survive_a_reconnect() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept]);
    let mut first = harness.activate().await;

    first.push(assistant_audio(500)).await;
    harness.wait_speaking(true).await;
    for tag in 1..=3 {
        harness.mic.say(captured(tag));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.handle.stats().frames_held(), 3);

    first.push(InboundEvent::Closed { reason: None }).await;
    harness.wait_for(ConnectionState::Reconnecting).await;
    // Playback ends well before the retry delay runs out.
    harness.wait_speaking(false).await;
    assert_eq!(harness.handle.state(), ConnectionState::Reconnecting);
    assert_eq!(harness.handle.stats().frames_sent(), 0);

    let mut second = harness.remotes.recv().await.unwrap();
    assert!(second.outbound.try_recv().is_err());
    second.push(InboundEvent::Opened).await;
    harness.wait_for(ConnectionState::Active).await;

    for tag in 1..=3 {
        assert_eq!(second.next_audio().await, wire(&captured(tag)));
    }
    harness.mic.say(captured(4));
    assert_eq!(second.next_audio().await, wire(&captured(4)));
    assert_eq!(harness.handle.stats().frames_sent(), 4);
    assert!(first.outbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_setup_counts_as_a_failed_attempt() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept, Step::Accept]);
    harness.handle.start().await.unwrap();
    let _silent = harness.remotes.recv().await.unwrap();

    harness.wait_for(ConnectionState::Reconnecting).await;
    let attempts = harness.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(Instant::now() - attempts[0], SETUP);
    assert!(matches!(
        harness.drain_events().as_slice(),
        [SessionEvent::Retrying { attempt: 1, reason, .. }] if reason == "setup not acknowledged"
    ));

    let remote = harness.remotes.recv().await.unwrap();
    remote.push(InboundEvent::Opened).await;
    harness.wait_for(ConnectionState::Active).await;
    tokio::time::sleep(SETUP * 2).await;
    assert_eq!(harness.handle.state(), ConnectionState::Active);
    assert_eq!(harness.attempts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_during_a_stalled_handshake_terminates() {
    let harness = Harness::new(vec![Step::Stall, Step::Accept]);
    harness.handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(harness.attempts().len(), 1);
    assert_eq!(harness.handle.state(), ConnectionState::Connecting);

    assert_eq!(
        harness.handle.start().await,
        Err(SessionError::AlreadyRunning(ConnectionState::Connecting))
    );

    harness.handle.stop().await.unwrap();
    assert_eq!(harness.handle.state(), ConnectionState::Terminated);
    tokio::time::sleep(DELAY * 5).await;

    assert_eq!(harness.attempts().len(), 1);
    assert_eq!(harness.handle.state(), ConnectionState::Terminated);
    assert!(!harness.mic.is_held());
}

#[tokio::test(start_paused = true)]
async fn transient_error_spends_a_retry() {
    let mut harness = Harness::new(vec![Step::Accept, Step::Accept]);
    let remote = harness.activate().await;

    let failed_at = Instant::now();
    remote
        .push(InboundEvent::Error(TransportFailure::transient("connection reset")))
        .await;
    harness.wait_for(ConnectionState::Reconnecting).await;

    let second = harness.remotes.recv().await.unwrap();
    assert_eq!(harness.attempts()[1] - failed_at, DELAY);
    second.push(InboundEvent::Opened).await;
    harness.wait_for(ConnectionState::Active).await;

    assert_eq!(
        harness.drain_events(),
        vec![SessionEvent::Retrying {
            attempt: 1,
            max: 3,
            reason: "connection reset".into(),
        }]
    );
}
