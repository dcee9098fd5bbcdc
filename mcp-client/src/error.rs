// mcp-client/src/error.rs
use std::time::Duration;

use thiserror::Error;

use mcp_bridge_protocol::DecodeError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client.
///
/// Transport-level failures (`Connect`, `Send`, `Receive`) are fatal to the
/// session; requests still in flight when one occurs resolve with
/// `Cancelled`. Server-returned error objects arrive as `Protocol`, untouched
/// and never retried here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to establish transport: {0}")]
    Connect(String),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("session has not been initialized")]
    NotReady,

    #[error("session is closed")]
    SessionClosed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error {code}: {message}")]
    Protocol {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("session closed while the request was in flight")]
    Cancelled,

    #[error("server repeated pagination cursor {0:?}")]
    PaginationLoop(String),
}
