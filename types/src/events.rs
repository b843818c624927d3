pub mod client;
pub mod server;

use client::*;
use server::*;

/// Messages the client writes to the socket. Each serializes as a single-key object,
/// ex: `{"setup": {...}}` or `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(crate::SessionConfig),
    RealtimeInput(RealtimeInput),
}

/// A message read from the socket. The service sets exactly one of the fields
/// per message, but every field is optional on the wire.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_content: Option<LiveServerContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// The message's kind, for logging.
    pub fn kind(&self) -> &'static str {
        if self.setup_complete.is_some() {
            "setupComplete"
        } else if self.server_content.is_some() {
            "serverContent"
        } else if self.go_away.is_some() {
            "goAway"
        } else if self.usage_metadata.is_some() {
            "usageMetadata"
        } else {
            "unknown"
        }
    }
}
