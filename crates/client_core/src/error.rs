use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to open collaboration connection: {0}")]
    Connect(String),
    #[error("collaboration connection receive failed: {0}")]
    Receive(String),
    #[error("collaboration connection send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid collaboration server url {url}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("unsupported collaboration server scheme: {0}")]
    UnsupportedScheme(String),
}
