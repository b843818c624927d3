use async_trait::async_trait;
use gemini_live_types::{ClientMessage, SessionConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::InboundEvent;
use crate::session::{CaptureError, TransportFailure};

/// Opens connections to the conversational service.
#[async_trait]
pub trait Connector: Send {
    /// Checks, or obtains, the credentials a connection needs. Called once per
    /// start request, before the capture device is touched.
    async fn authorize(&mut self) -> Result<(), TransportFailure> {
        Ok(())
    }

    /// Opens a connection and sends `setup` as its first message. The returned
    /// link reports [`InboundEvent::Opened`] once the service accepts the setup.
    async fn connect(&mut self, setup: &SessionConfig) -> Result<Link, TransportFailure>;
}

/// The microphone. The session is its only owner.
pub trait CaptureDevice: Send {
    /// Starts delivering mono samples at the session's input rate into `frames`.
    /// The capture callback must only ever `try_send`.
    fn acquire(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), CaptureError>;

    /// Stops capture and gives up the OS-level device. Idempotent.
    fn release(&mut self);
}

/// One live connection: an outbound queue and a stream of inbound events.
///
/// Dropping the link closes the connection. Background tasks registered with
/// [`Link::with_task`] are aborted on drop.
pub struct Link {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::Receiver<InboundEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::Receiver<InboundEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Queues a message for the writer without waiting.
    pub fn send(&self, message: ClientMessage) -> Result<(), TransportFailure> {
        self.outbound
            .send(message)
            .map_err(|_| TransportFailure::transient("outbound channel closed"))
    }

    /// The next inbound event; `None` once the connection's reader is gone.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.inbound.recv().await
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
