// mcp-protocol/src/lib.rs
pub mod codec;
pub mod constants;
pub mod messages;
pub mod types;
pub mod version;

// Re-export commonly used items
pub use codec::{decode, encode, DecodeError};
pub use constants::PROTOCOL_VERSION;
pub use messages::JsonRpcMessage;
pub use types::*;
