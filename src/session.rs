//! The session lifecycle: one task owns the connection, the capture device,
//! the playback schedule, the capture gate and the transcript, and reacts to
//! commands, captured audio, inbound events and timers one at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gemini_live_types::audio::{pcm_mime_type, CHANNELS};
use gemini_live_types::events::client::RealtimeInput;
use gemini_live_types::{ClientMessage, SessionConfig};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::codec::{AudioFrame, FrameCodec};
use crate::events::InboundEvent;
use crate::gate::{Admission, CaptureGate};
use crate::playback::{Clock, PlaybackScheduler, PlaybackSink, TokioClock};
use crate::transcript::{Message, TranscriptAssembler};

mod error;
mod link;
mod state;
mod stats;

pub use error::{CaptureError, FailureKind, SessionError, TransportFailure};
pub use link::{CaptureDevice, Connector, Link};
pub use state::{ConnectionState, ReconnectPolicy, RetryBudget};
pub use stats::Stats;

const COMMAND_CAPACITY: usize = 8;
const CAPTURE_CAPACITY: usize = 256;
/// How long an open socket may wait for `setupComplete`.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Things the session reports besides its state and speaking signals.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A finalized transcript entry.
    Message(Message),
    /// The connection dropped and attempt `attempt` of `max` is scheduled.
    Retrying { attempt: u32, max: u32, reason: String },
    /// The session terminated on its own.
    Error(SessionError),
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<()>),
}

/// Cloneable front end to a running [`SessionManager`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionState>,
    speaking: watch::Receiver<bool>,
    stats: Arc<Mutex<Stats>>,
}

impl SessionHandle {
    /// Asks the session to connect. Resolves once the request is accepted or
    /// rejected, not when the connection is up; watch [`Self::status`] for that.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start(reply))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Ends the session for good. Safe to call in any state.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stop(reply))
            .await
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)
    }

    pub fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }

    pub fn stats(&self) -> Stats {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct SessionBuilder {
    setup: SessionConfig,
    policy: ReconnectPolicy,
    setup_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionBuilder {
    pub fn new(setup: SessionConfig) -> Self {
        Self {
            setup,
            policy: ReconnectPolicy::default(),
            setup_timeout: SETUP_TIMEOUT,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(
        self,
        connector: Box<dyn Connector>,
        capture: Box<dyn CaptureDevice>,
        sink: Box<dyn PlaybackSink>,
    ) -> (SessionManager, SessionHandle, SessionEvents) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ConnectionState::Idle);
        let (speaking_tx, speaking_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(Stats::new()));

        let outbound_codec = FrameCodec::new(self.setup.input_sample_rate(), CHANNELS);
        let inbound_codec = FrameCodec::new(self.setup.output_sample_rate(), CHANNELS);
        let input_mime = pcm_mime_type(self.setup.input_sample_rate());

        let manager = SessionManager {
            state: ConnectionState::Idle,
            budget: RetryBudget::new(self.policy.max_attempts),
            policy: self.policy,
            manual_stop: false,
            reconnect_at: None,
            setup_timeout: self.setup_timeout,
            setup_deadline: None,
            setup: self.setup,
            connector,
            link: None,
            capture,
            capture_held: false,
            capture_tx,
            capture_rx,
            outbound_codec,
            inbound_codec,
            input_mime,
            gate: CaptureGate::new(),
            playback: PlaybackScheduler::new(self.clock, sink),
            transcript: TranscriptAssembler::new(),
            commands: command_rx,
            status: status_tx,
            speaking: speaking_tx,
            events: event_tx,
            stats: stats.clone(),
        };
        let handle = SessionHandle {
            commands: command_tx,
            status: status_rx,
            speaking: speaking_rx,
            stats,
        };
        (manager, handle, event_rx)
    }
}

enum ConnectOutcome {
    Connected(Link),
    Failed(TransportFailure),
    /// A stop arrived, or every handle went away, while the attempt was in flight.
    Cancelled(Option<oneshot::Sender<()>>),
}

pub struct SessionManager {
    state: ConnectionState,
    policy: ReconnectPolicy,
    budget: RetryBudget,
    manual_stop: bool,
    reconnect_at: Option<Instant>,
    setup_timeout: Duration,
    setup_deadline: Option<Instant>,

    setup: SessionConfig,
    connector: Box<dyn Connector>,
    link: Option<Link>,

    capture: Box<dyn CaptureDevice>,
    capture_held: bool,
    capture_tx: mpsc::Sender<Vec<f32>>,
    capture_rx: mpsc::Receiver<Vec<f32>>,

    outbound_codec: FrameCodec,
    inbound_codec: FrameCodec,
    input_mime: String,

    gate: CaptureGate,
    playback: PlaybackScheduler,
    transcript: TranscriptAssembler,

    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ConnectionState>,
    speaking: watch::Sender<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stats: Arc<Mutex<Stats>>,
}

impl SessionManager {
    pub fn builder(setup: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(setup)
    }

    /// Runs until every [`SessionHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            let reconnect_at = self.reconnect_at;
            let setup_deadline = self.setup_deadline;
            let completion = self.playback.next_completion();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start(reply)) => self.start(reply).await,
                    Some(Command::Stop(reply)) => self.stop(Some(reply)),
                    None => {
                        self.stop(None);
                        break;
                    }
                },
                Some(samples) = self.capture_rx.recv() => self.on_capture(samples),
                event = next_inbound(&mut self.link) => self.on_inbound(event),
                _ = sleep_until(reconnect_at) => self.reconnect().await,
                _ = sleep_until(setup_deadline) => self.on_setup_timeout(),
                _ = sleep_until(completion) => self.refresh_speaking(),
            }
        }
        tracing::debug!("session loop finished");
    }

    async fn start(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if !self.state.accepts_start() {
            let _ = reply.send(Err(SessionError::AlreadyRunning(self.state)));
            return;
        }

        self.manual_stop = false;
        self.budget.reset();
        self.transcript.reset();

        if let Err(failure) = self.connector.authorize().await {
            tracing::warn!("authorization failed: {}", failure);
            let _ = reply.send(Err(SessionError::MissingCredentials(
                failure.message().to_string(),
            )));
            return;
        }
        if let Err(e) = self.acquire_capture() {
            tracing::warn!("capture unavailable: {}", e);
            let _ = reply.send(Err(e.into()));
            return;
        }

        self.set_state(ConnectionState::Connecting);
        let _ = reply.send(Ok(()));
        self.open().await;
    }

    async fn reconnect(&mut self) {
        self.reconnect_at = None;
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        self.record(|stats| stats.reconnect_attempted());
        tracing::info!(
            "reconnect attempt {}/{}",
            self.budget.attempts(),
            self.budget.max()
        );
        self.open().await;
    }

    async fn open(&mut self) {
        match self.try_connect().await {
            ConnectOutcome::Connected(link) => {
                tracing::debug!("connection open, waiting for setup acknowledgement");
                self.link = Some(link);
                self.setup_deadline = Some(Instant::now() + self.setup_timeout);
            }
            ConnectOutcome::Failed(failure) => self.on_connection_lost(failure),
            ConnectOutcome::Cancelled(reply) => self.stop(reply),
        }
    }

    /// Connects while still answering commands, so a stop is never stuck
    /// behind a slow handshake.
    async fn try_connect(&mut self) -> ConnectOutcome {
        let connect = self.connector.connect(&self.setup);
        tokio::pin!(connect);
        loop {
            tokio::select! {
                result = &mut connect => return match result {
                    Ok(link) => ConnectOutcome::Connected(link),
                    Err(failure) => ConnectOutcome::Failed(failure),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Start(reply)) => {
                        let _ = reply.send(Err(SessionError::AlreadyRunning(self.state)));
                    }
                    Some(Command::Stop(reply)) => return ConnectOutcome::Cancelled(Some(reply)),
                    None => return ConnectOutcome::Cancelled(None),
                },
            }
        }
    }

    fn stop(&mut self, reply: Option<oneshot::Sender<()>>) {
        self.manual_stop = true;
        if self.state.is_live() {
            tracing::info!("session stopped by user");
            self.terminate(None);
        }
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    fn on_inbound(&mut self, event: Option<InboundEvent>) {
        let Some(event) = event else {
            self.on_connection_lost(TransportFailure::transient("connection ended"));
            return;
        };

        match event {
            InboundEvent::Opened => self.on_opened(),
            InboundEvent::AudioChunk { data, sample_rate } => {
                match self.inbound_codec.decode(&data) {
                    Ok(samples) => {
                        if self
                            .playback
                            .enqueue(samples, sample_rate, self.inbound_codec.channels())
                            .is_some()
                        {
                            self.record(|stats| stats.chunk_scheduled());
                        }
                        self.refresh_speaking();
                    }
                    Err(e) => {
                        tracing::warn!("dropping undecodable audio chunk: {}", e);
                        self.record(|stats| stats.chunk_dropped());
                    }
                }
            }
            InboundEvent::UserTranscriptDelta(text) => self.transcript.on_user_delta(&text),
            InboundEvent::AssistantTranscriptDelta(text) => {
                self.transcript.on_assistant_delta(&text)
            }
            InboundEvent::TurnComplete => {
                for message in self.transcript.on_turn_complete() {
                    self.emit(SessionEvent::Message(message));
                }
            }
            InboundEvent::Interrupted => {
                tracing::debug!("model interrupted, halting playback");
                self.playback.halt();
                self.refresh_speaking();
            }
            InboundEvent::Usage(usage) => {
                let total = usage.total_token_count;
                let prompt = usage.prompt_token_count;
                let response = usage.response_token_count;
                tracing::debug!(
                    "total_tokens: {}, prompt_tokens: {}, response_tokens: {}",
                    total,
                    prompt,
                    response
                );
                self.record(|stats| stats.update_usage(total, prompt, response));
            }
            InboundEvent::Error(failure) => self.on_connection_lost(failure),
            InboundEvent::Closed { reason } => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                self.on_connection_lost(TransportFailure::transient(reason));
            }
        }
    }

    fn on_setup_timeout(&mut self) {
        self.setup_deadline = None;
        if self.link.is_none() || self.state == ConnectionState::Active {
            return;
        }
        self.on_connection_lost(TransportFailure::transient("setup not acknowledged"));
    }

    fn on_opened(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            return;
        }
        if let Err(e) = self.acquire_capture() {
            tracing::error!("capture unavailable after reconnect: {}", e);
            self.terminate(Some(e.into()));
            return;
        }
        self.setup_deadline = None;
        self.budget.reset();
        self.set_state(ConnectionState::Active);
        // Frames held across a reconnect go out first, in order.
        self.refresh_speaking();
    }

    fn on_connection_lost(&mut self, failure: TransportFailure) {
        if self.manual_stop || !self.state.is_live() {
            return;
        }
        tracing::warn!("connection lost: {}", failure);

        if failure.is_permanent() {
            self.terminate(Some(SessionError::AuthorizationRejected(
                failure.message().to_string(),
            )));
            return;
        }

        match self.budget.spend() {
            Some(attempt) => {
                self.link = None;
                self.setup_deadline = None;
                self.release_capture();
                self.set_state(ConnectionState::Reconnecting);
                self.reconnect_at = Some(Instant::now() + self.policy.delay);
                self.emit(SessionEvent::Retrying {
                    attempt,
                    max: self.budget.max(),
                    reason: failure.message().to_string(),
                });
            }
            None => self.terminate(Some(SessionError::RetriesExhausted {
                attempts: self.budget.attempts(),
                last: failure.message().to_string(),
            })),
        }
    }

    /// Tears everything down and lands in `Terminated`.
    fn terminate(&mut self, error: Option<SessionError>) {
        self.reconnect_at = None;
        self.setup_deadline = None;
        self.link = None;
        self.release_capture();

        let discarded = self.gate.clear();
        if discarded > 0 {
            tracing::debug!("discarded {} held capture frame(s)", discarded);
        }
        self.playback.halt();
        self.refresh_speaking();
        self.transcript.reset();
        self.set_state(ConnectionState::Terminated);

        if let Some(error) = error {
            tracing::error!("session terminated: {}", error);
            self.emit(SessionEvent::Error(error));
        }
    }

    fn on_capture(&mut self, samples: Vec<f32>) {
        if self.state != ConnectionState::Active {
            return;
        }
        let frame = self.outbound_codec.encode(&samples);
        if frame.is_empty() {
            return;
        }
        match self.gate.offer(frame) {
            Admission::Transmit(frame) => self.transmit(frame),
            Admission::Held => self.record(|stats| stats.frame_held()),
        }
    }

    /// Publishes the speaking signal and flushes held capture on its falling
    /// edge. Held frames wait out a reconnect; they are only released while
    /// `Active`.
    fn refresh_speaking(&mut self) {
        self.playback.reap();
        let speaking = self.playback.is_speaking();
        self.speaking.send_if_modified(|current| {
            let changed = *current != speaking;
            *current = speaking;
            changed
        });

        if self.state != ConnectionState::Active {
            return;
        }
        for frame in self.gate.set_speaking(speaking) {
            self.transmit(frame);
        }
    }

    fn transmit(&mut self, frame: AudioFrame) {
        let Some(link) = self.link.as_ref().filter(|_| self.state == ConnectionState::Active)
        else {
            tracing::debug!("no live connection, capture frame discarded");
            return;
        };
        let data = self.outbound_codec.to_wire(&frame);
        let message = ClientMessage::RealtimeInput(RealtimeInput::audio(data, &self.input_mime));
        match link.send(message) {
            Ok(()) => self.record(|stats| stats.frame_sent()),
            Err(e) => tracing::warn!("failed to queue capture frame: {}", e),
        }
    }

    fn acquire_capture(&mut self) -> Result<(), CaptureError> {
        if self.capture_held {
            return Ok(());
        }
        self.capture.acquire(self.capture_tx.clone())?;
        self.capture_held = true;
        Ok(())
    }

    fn release_capture(&mut self) {
        if self.capture_held {
            self.capture.release();
            self.capture_held = false;
        }
        while self.capture_rx.try_recv().is_ok() {}
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::info!("session {} -> {}", self.state, state);
        self.state = state;
        self.status.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("session event dropped, no listener");
        }
    }

    fn record(&self, update: impl FnOnce(&mut Stats)) {
        if let Ok(mut guard) = self.stats.lock() {
            update(&mut guard);
        } else {
            tracing::error!("failed to update stats");
        }
    }
}

async fn next_inbound(link: &mut Option<Link>) -> Option<InboundEvent> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::playback::tests::RecordingSink;

    struct RefusingConnector;

    #[async_trait::async_trait]
    impl Connector for RefusingConnector {
        async fn authorize(&mut self) -> Result<(), TransportFailure> {
            Err(TransportFailure::permanent("GEMINI_API_KEY is not set"))
        }

        async fn connect(&mut self, _setup: &SessionConfig) -> Result<Link, TransportFailure> {
            Err(TransportFailure::transient("unreachable"))
        }
    }

    struct NoMicrophone;

    impl CaptureDevice for NoMicrophone {
        fn acquire(&mut self, _frames: mpsc::Sender<Vec<f32>>) -> Result<(), CaptureError> {
            Err(CaptureError::Unavailable("no input device".into()))
        }

        fn release(&mut self) {}
    }

    fn session(connector: Box<dyn Connector>) -> (SessionHandle, SessionEvents) {
        let (manager, handle, events) = SessionManager::builder(SessionConfig::new().build())
            .build(connector, Box::new(NoMicrophone), Box::new(RecordingSink::default()));
        tokio::spawn(manager.run());
        (handle, events)
    }

    #[tokio::test]
    async fn start_without_credentials_stays_idle() {
        let (handle, _events) = session(Box::new(RefusingConnector));
        let result = handle.start().await;
        assert!(matches!(result, Err(SessionError::MissingCredentials(_))));
        assert_eq!(handle.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let (handle, _events) = session(Box::new(RefusingConnector));
        handle.stop().await.unwrap();
        handle.stop().await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn handle_reports_shutdown_after_loop_ends() {
        let (manager, handle, _events) = SessionManager::builder(SessionConfig::new().build())
            .build(
                Box::new(RefusingConnector),
                Box::new(NoMicrophone),
                Box::new(RecordingSink::default()),
            );
        drop(manager);
        assert_eq!(handle.start().await, Err(SessionError::Shutdown));
    }
}
