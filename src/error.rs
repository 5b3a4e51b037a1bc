//! Error types
//!
//! Every recoverable failure of the recognition core maps onto one of these
//! variants. Nothing is raised across `step()`; the host sees failures
//! through the `Result` of connect/start and the status flags.

use crate::business::SessionState;

/// Malformed inbound application message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("unsupported message type {0:#x}")]
    UnsupportedMessageType(u8),
    #[error("JSON payload of {size} bytes exceeds the {limit} byte parser bound")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("malformed websocket frame header")]
    MalformedFrame,
}

/// Errors raised by the recognition core
#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("microphone initialization failed: {0}")]
    HardwareInit(String),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("websocket framing error: {0}")]
    Framing(#[from] tungstenite::Error),
    #[error("failed to encode session config: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("{operation} is not allowed while {state:?}")]
    BadState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("reconnect failed: {0}")]
    Reconnect(#[source] Box<AsrError>),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("connection closed by server")]
    RemoteClosed,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Result type for recognition core operations
pub type AsrResult<T> = Result<T, AsrError>;
