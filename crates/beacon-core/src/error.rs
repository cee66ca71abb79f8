//! Error types for Beacon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown job state: {0}")]
    UnknownState(String),

    #[error("malformed {channel} notification: {message}")]
    Decode { channel: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
