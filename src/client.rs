use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gemini_live_types::{ClientMessage, ServerMessage, SessionConfig};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::events::InboundEvent;
use crate::session::{Connector, Link, TransportFailure};

pub mod config;
pub mod consts;
mod utils;

pub use config::{Config, ConfigBuilder};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Opens live connections to the Gemini service over a WebSocket.
pub struct GeminiConnector {
    config: Config,
}

impl GeminiConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn authorize(&mut self) -> Result<(), TransportFailure> {
        if self.config.api_key().expose_secret().trim().is_empty() {
            return Err(TransportFailure::permanent(format!(
                "{} is not set",
                consts::GEMINI_API_KEY
            )));
        }
        Ok(())
    }

    async fn connect(&mut self, setup: &SessionConfig) -> Result<Link, TransportFailure> {
        let request = utils::build_request(&self.config)
            .map_err(|e| TransportFailure::permanent(format!("invalid endpoint: {}", e)))?;

        let handshake = tokio_tungstenite::connect_async(request);
        let (ws_stream, _) = tokio::time::timeout(self.config.handshake_timeout(), handshake)
            .await
            .map_err(|_| TransportFailure::transient("handshake timed out"))?
            .map_err(|e| utils::classify_connect_error(&e))?;
        tracing::info!("connected to {}", self.config.base_url());

        let (mut write, read) = ws_stream.split();

        let output_rate = setup.output_sample_rate();
        let setup = serde_json::to_string(&ClientMessage::Setup(setup.clone()))
            .map_err(|e| TransportFailure::transient(format!("failed to serialize setup: {}", e)))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| TransportFailure::transient(format!("failed to send setup: {}", e)))?;

        let (c_tx, c_rx) = mpsc::unbounded_channel();
        let (s_tx, s_rx) = mpsc::channel(self.config.capacity());

        // The writer is left to finish on its own so the close frame goes out
        // after the link is dropped.
        tokio::spawn(write_loop(write, c_rx));
        let recv_handle = tokio::spawn(read_loop(read, s_tx, output_rate));

        Ok(Link::new(c_tx, s_rx).with_task(recv_handle))
    }
}

async fn write_loop(mut write: WsWriter, mut c_rx: mpsc::UnboundedReceiver<ClientMessage>) {
    while let Some(message) = c_rx.recv().await {
        match serde_json::to_string(&message) {
            Ok(text) => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("failed to send message: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("failed to serialize message: {}", e);
            }
        }
    }
    if let Err(e) = write.close().await {
        tracing::debug!("failed to close connection cleanly: {}", e);
    }
}

async fn read_loop(mut read: WsReader, s_tx: mpsc::Sender<InboundEvent>, output_rate: u32) {
    let closing = loop {
        let message = match read.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::error!("failed to read message: {}", e);
                break InboundEvent::Error(TransportFailure::transient(e.to_string()));
            }
            None => break InboundEvent::Closed { reason: None },
        };

        let parsed = match message {
            Message::Text(text) => serde_json::from_str::<ServerMessage>(&text),
            Message::Binary(bin) => serde_json::from_slice::<ServerMessage>(&bin),
            Message::Close(frame) => {
                tracing::info!("connection closed: {:?}", frame);
                let (code, reason) = frame
                    .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                break match utils::classify_close(code, &reason) {
                    Some(failure) => InboundEvent::Error(failure),
                    None => InboundEvent::Closed {
                        reason: Some(reason).filter(|r| !r.is_empty()),
                    },
                };
            }
            _ => continue,
        };

        match parsed {
            Ok(server_message) => {
                tracing::debug!("received message: {}", server_message.kind());
                for event in InboundEvent::from_server_message(server_message, output_rate) {
                    if s_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => tracing::error!("failed to deserialize server message: {}", e),
        }
    };
    let _ = s_tx.send(closing).await;
}
