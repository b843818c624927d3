use std::fmt;

/// Whether a transport failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network blip, server hiccup, stream end. Consumes reconnect budget.
    Transient,
    /// Invalid, expired or unauthorized credentials. Never retried.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct TransportFailure {
    kind: FailureKind,
    message: String,
}

impl TransportFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient transport failure: {}", self.message),
            FailureKind::Permanent => write!(f, "permanent transport failure: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("no capture device available: {0}")]
    Unavailable(String),
    #[error("capture permission denied: {0}")]
    Denied(String),
    #[error("failed to open capture stream: {0}")]
    Stream(String),
}

/// Errors surfaced to the user. Everything else is recovered inside its component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(#[from] CaptureError),
    #[error("the service rejected the credentials ({0}); re-authorize and start again")]
    AuthorizationRejected(String),
    #[error("connection lost and {attempts} reconnect attempt(s) failed: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("a session is already {0}")]
    AlreadyRunning(super::ConnectionState),
    #[error("the session loop has shut down")]
    Shutdown,
}
