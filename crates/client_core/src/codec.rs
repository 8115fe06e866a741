use shared::{error::CodecError, protocol::CollaborationMessage};

pub fn decode(bytes: &[u8]) -> Result<CollaborationMessage, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Malformed)
}

pub fn encode(message: &CollaborationMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

#[cfg(test)]
#[path = "tests/codec_tests.rs"]
mod tests;
