//! Media frames replayed from the source file

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// FLV tag / RTMP message type of a media payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Audio,
    Video,
    Script,
}

impl TagType {
    /// Map an FLV tag type / RTMP message type id.
    pub fn from_type_id(id: u8) -> Option<Self> {
        match id {
            8 => Some(TagType::Audio),
            9 => Some(TagType::Video),
            18 => Some(TagType::Script),
            _ => None,
        }
    }

    pub fn type_id(self) -> u8 {
        match self {
            TagType::Audio => 8,
            TagType::Video => 9,
            TagType::Script => 18,
        }
    }
}

/// A single demuxed tag, ready to be pushed by every publishing client.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub tag_type: TagType,

    /// Container timestamp of the tag in milliseconds
    pub timestamp: u32,

    /// Size of the tag body as declared by the container header
    pub tag_size: u32,

    pub payload: Bytes,

    /// Offset from the start of the current loop, in milliseconds
    pub presentation_delta_ms: u32,
}
