use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::client::config::Config;
use crate::client::consts::{LIVE_METHOD, POLICY_VIOLATION};
use crate::session::TransportFailure;

pub fn build_request(config: &Config) -> tungstenite::Result<Request> {
    format!(
        "{}/{}?key={}",
        config.base_url(),
        LIVE_METHOD,
        config.api_key().expose_secret()
    )
    .into_client_request()
}

fn mentions_bad_credentials(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    ["api key", "api_key", "permission", "unauthenticated", "unauthorized"]
        .iter()
        .any(|needle| text.contains(needle))
}

/// Rejected upgrades with 401/403 are credential problems; everything else
/// might work on the next try.
pub fn classify_connect_error(error: &tungstenite::Error) -> TransportFailure {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportFailure::permanent(format!("handshake rejected with HTTP {}", status))
            } else {
                TransportFailure::transient(format!("handshake failed with HTTP {}", status))
            }
        }
        other => TransportFailure::transient(other.to_string()),
    }
}

/// `None` for a close that carries no hint of a credential problem.
pub fn classify_close(code: u16, reason: &str) -> Option<TransportFailure> {
    if code == POLICY_VIOLATION || mentions_bad_credentials(reason) {
        let message = if reason.is_empty() {
            format!("closed with code {}", code)
        } else {
            reason.to_string()
        };
        return Some(TransportFailure::permanent(message));
    }
    None
}
