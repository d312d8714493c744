use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Token refresh failed; the operator has to log in again.
    #[error("session expired, please log in again")]
    SessionExpired,

    #[error("not logged in")]
    NotAuthenticated,

    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("push channel error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid backend url '{0}'")]
    InvalidUrl(String),
}

impl GatewayError {
    /// Authentication failures are never replaced by demo data.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::NotAuthenticated)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
