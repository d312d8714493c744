use thiserror::Error;

/// Errors raised while interpreting wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown push message type '{0}'")]
    UnknownPushType(String),

    #[error("unknown {kind} identifier '{value}'")]
    UnknownIdentifier { kind: &'static str, value: String },

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}
