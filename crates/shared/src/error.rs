use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed collaboration envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode collaboration envelope: {0}")]
    Encode(#[source] serde_json::Error),
}
