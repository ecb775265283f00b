//! Errors raised by the RTMP client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RtmpError>;

#[derive(Debug, Error)]
pub enum RtmpError {
    #[error("invalid RTMP url `{0}`")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("AMF0 decode error: {0}")]
    Amf(String),

    #[error("server rejected {command}: {code}")]
    Rejected { command: String, code: String },

    #[error("no stream has been created on this connection")]
    NoStream,

    #[error("connection closed")]
    Closed,
}
