//! Media demuxer capability
//!
//! The pacer reads tags through [`MediaSource`] and obtains a fresh source
//! for every test run from a [`MediaOpener`]. [`FlvFile`] is the
//! file-backed implementation.

pub mod error;
pub mod flv;

pub use error::{MediaError, Result};
pub use flv::{FlvFile, FlvOpener};

use async_trait::async_trait;

use crate::model::MediaFrame;

/// Sequential reader over the tags of a recorded stream
#[async_trait]
pub trait MediaSource: Send {
    /// Read the next tag. `presentation_delta_ms` is left at zero.
    async fn read_tag(&mut self) -> Result<MediaFrame>;

    /// Whether every tag has been read.
    fn is_finished(&self) -> bool;

    /// Rewind to the first tag.
    async fn loop_back(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Opens a new [`MediaSource`]
#[async_trait]
pub trait MediaOpener: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn MediaSource>>;
}
