// mcp-client/src/transport/mod.rs
pub mod sse;
pub mod stdio;
pub mod streamable_http;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;

use mcp_bridge_protocol::JsonRpcMessage;

use crate::error::Result;

/// Capacity of the inbound channel handed out by every transport constructor
pub(crate) const CHANNEL_CAPACITY: usize = 100;

/// Transport trait for sending and receiving MCP messages.
///
/// Constructors return the transport together with an
/// `mpsc::Receiver<JsonRpcMessage>`; the receiver yields inbound messages in
/// arrival order and closes exactly when the transport does. Implementations
/// serialize physical writes internally, drop (and log) individual malformed
/// inbound frames, and keep `close` idempotent.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the channel and start delivering inbound messages
    async fn start(&self) -> Result<()>;

    /// Send a message to the server
    async fn send(&self, message: JsonRpcMessage) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

pub use sse::{SseConfig, SseTransport};
pub use stdio::{StdioConfig, StdioTransport};
pub use streamable_http::{StreamableHttpConfig, StreamableHttpTransport};
