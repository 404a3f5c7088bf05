//! Client error types.

use parley_protocol::StatusCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    /// The connection went away before a reply arrived.
    #[error("connection lost")]
    ConnectionLost,

    #[error("request timeout")]
    Timeout,

    /// The server answered with a non-OK `Status` packet.
    #[error("server returned status {}: {message}", display_code(.code))]
    Status { code: u16, message: String },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

fn display_code(code: &u16) -> String {
    match StatusCode::from_wire(*code) {
        Some(known) => known.to_string(),
        None => code.to_string(),
    }
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionLost => true,
            ClientError::Status { code, .. } => StatusCode::from_wire(*code)
                .map(|c| c.is_retryable())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Status code carried by a `Status` error, if known.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { code, .. } => StatusCode::from_wire(*code),
            _ => None,
        }
    }
}
