// mcp-protocol/src/codec.rs
use serde_json::Value;
use thiserror::Error;

use crate::messages::JsonRpcMessage;

/// Error produced when an inbound frame cannot be turned into a message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("unsupported jsonrpc version {0:?}")]
    Version(String),

    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
}

/// Encode a message into its wire form (one JSON object, no trailing newline).
///
/// Field order is fixed by the message structs, so encoding the same logical
/// message always yields the same bytes.
pub fn encode(message: &JsonRpcMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Decode one frame into a message, validating the envelope shape.
///
/// Serde's untagged matching alone would accept frames such as a response
/// with neither result nor error; everything a transport feeds into the
/// session goes through the explicit checks here instead.
pub fn decode(raw: &str) -> Result<JsonRpcMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    match object.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        Some(Value::String(v)) => return Err(DecodeError::Version(v.clone())),
        Some(_) => return Err(DecodeError::Malformed("jsonrpc field must be a string")),
        None => return Err(DecodeError::Malformed("missing jsonrpc field")),
    }

    let id = match object.get("id") {
        Some(id) if id.is_string() || id.is_number() => Some(id.clone()),
        Some(_) => return Err(DecodeError::Malformed("id must be a string or a number")),
        None => None,
    };

    let method = match object.get("method") {
        Some(Value::String(m)) => Some(m.clone()),
        Some(_) => return Err(DecodeError::Malformed("method must be a string")),
        None => None,
    };

    let params = object.get("params").cloned();

    match (method, id) {
        (Some(method), Some(id)) => Ok(JsonRpcMessage::Request {
            jsonrpc: "2.0".to_string(),
            id,
            method,
            params,
        }),
        (Some(method), None) => Ok(JsonRpcMessage::Notification {
            jsonrpc: "2.0".to_string(),
            method,
            params,
        }),
        (None, Some(id)) => {
            let result = object.get("result").cloned();
            let error = match object.get("error") {
                Some(error) => Some(serde_json::from_value(error.clone())?),
                None => None,
            };

            if result.is_some() && error.is_some() {
                return Err(DecodeError::Malformed("response carries both result and error"));
            }
            if result.is_none() && error.is_none() {
                return Err(DecodeError::Malformed("response carries neither result nor error"));
            }

            Ok(JsonRpcMessage::Response {
                jsonrpc: "2.0".to_string(),
                id,
                result,
                error,
            })
        }
        (None, None) => Err(DecodeError::Malformed("message has neither method nor id")),
    }
}
