use thiserror::Error;

/// Failure to decode a live-session frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid frame: {0}")]
    Invalid(String),
}
