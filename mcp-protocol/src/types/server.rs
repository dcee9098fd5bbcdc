// mcp-protocol/src/types/server.rs
use serde::{Deserialize, Serialize};

/// Information about the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}
