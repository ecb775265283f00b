use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an flv file: {0}")]
    InvalidHeader(String),

    #[error("corrupt tag at offset {offset}: {reason}")]
    CorruptTag { offset: u64, reason: String },

    #[error("media source is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, MediaError>;
