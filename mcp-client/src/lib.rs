// mcp-client/src/lib.rs
pub mod client;
pub mod error;
mod paginate;
pub mod session;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use session::{NotificationHandler, Session};
pub use transport::{
    SseConfig, SseTransport, StdioConfig, StdioTransport, StreamableHttpConfig,
    StreamableHttpTransport, Transport,
};

pub use mcp_bridge_protocol as protocol;
