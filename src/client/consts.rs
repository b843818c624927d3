use std::time::Duration;

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

pub const BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws";
pub const LIVE_METHOD: &str =
    "google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const INBOUND_CAPACITY: usize = 1024;

/// WebSocket close code for policy violations; the service uses it for bad keys.
pub const POLICY_VIOLATION: u16 = 1008;
