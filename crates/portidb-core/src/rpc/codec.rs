//! JSON framing for ports that carry text instead of structured messages.

use crate::{proto::Message, rpc::RpcError};

/// Encode one frame.
pub fn encode(message: &Message) -> Result<String, RpcError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one frame.
pub fn decode(text: &str) -> Result<Message, RpcError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode one frame from UTF-8 bytes.
pub fn decode_slice(bytes: &[u8]) -> Result<Message, RpcError> {
    Ok(serde_json::from_slice(bytes)?)
}
