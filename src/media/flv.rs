//! FLV file demuxer
//!
//! ```text
//! +-----------+---------------+------------+---------------+------------+-----
//! | header(9) | prev size0(4) | tag hdr(11)| tag body(N)   | prev size(4)| ...
//! +-----------+---------------+------------+---------------+------------+-----
//!
//! tag header: type(1) | data size(3) | timestamp(3) | ts extended(1) | stream id(3)
//! ```

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, trace};

use crate::model::{MediaFrame, TagType};

use super::error::{MediaError, Result};
use super::{MediaOpener, MediaSource};

const SIGNATURE: &[u8; 3] = b"FLV";
const FILE_HEADER_SIZE: usize = 9;
const TAG_HEADER_SIZE: usize = 11;
const PREVIOUS_TAG_SIZE: u64 = 4;

#[derive(Debug)]
pub struct FlvFile {
    path: PathBuf,
    /// `None` once closed
    reader: Option<BufReader<File>>,
    /// Offset of the first tag header
    first_tag: u64,
    position: u64,
    length: u64,
}

impl FlvFile {
    /// Open `path` and validate the file header.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let length = file.metadata().await?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; FILE_HEADER_SIZE];
        reader.read_exact(&mut header).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                MediaError::InvalidHeader(format!("{} is too short", path.display()))
            }
            _ => MediaError::Io(e),
        })?;

        if &header[..3] != SIGNATURE {
            return Err(MediaError::InvalidHeader(format!(
                "{} has no FLV signature",
                path.display()
            )));
        }

        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as u64;
        if data_offset < FILE_HEADER_SIZE as u64 {
            return Err(MediaError::InvalidHeader(format!(
                "{} declares a data offset of {data_offset}",
                path.display()
            )));
        }

        let first_tag = data_offset + PREVIOUS_TAG_SIZE;
        reader.seek(SeekFrom::Start(first_tag)).await?;

        debug!(
            "opened {} (version {}, {length} bytes)",
            path.display(),
            header[3]
        );

        Ok(Self {
            path,
            reader: Some(reader),
            first_tag,
            position: first_tag,
            length,
        })
    }
}

#[async_trait]
impl MediaSource for FlvFile {
    async fn read_tag(&mut self) -> Result<MediaFrame> {
        let reader = self.reader.as_mut().ok_or(MediaError::Closed)?;

        loop {
            let offset = self.position;
            let mut header = [0u8; TAG_HEADER_SIZE];
            reader.read_exact(&mut header).await?;

            let data_size = u32::from_be_bytes([0, header[1], header[2], header[3]]);
            let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

            let mut body = vec![0u8; data_size as usize];
            reader.read_exact(&mut body).await?;

            let mut previous = [0u8; PREVIOUS_TAG_SIZE as usize];
            reader.read_exact(&mut previous).await?;
            self.position += TAG_HEADER_SIZE as u64 + data_size as u64 + PREVIOUS_TAG_SIZE;

            let declared = u32::from_be_bytes(previous);
            if declared != 0 && declared != TAG_HEADER_SIZE as u32 + data_size {
                return Err(MediaError::CorruptTag {
                    offset,
                    reason: format!(
                        "previous tag size {declared} does not match {}",
                        TAG_HEADER_SIZE as u32 + data_size
                    ),
                });
            }

            // the filter and reserved bits share the type byte
            match TagType::from_type_id(header[0] & 0x1F) {
                Some(tag_type) => {
                    return Ok(MediaFrame {
                        tag_type,
                        timestamp,
                        tag_size: data_size,
                        payload: Bytes::from(body),
                        presentation_delta_ms: 0,
                    });
                }
                None => trace!("skipping tag type {} at offset {offset}", header[0]),
            }

            if self.position >= self.length {
                return Err(MediaError::CorruptTag {
                    offset,
                    reason: "no media tags left".to_string(),
                });
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.position >= self.length
    }

    async fn loop_back(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(MediaError::Closed)?;
        reader.seek(SeekFrom::Start(self.first_tag)).await?;
        self.position = self.first_tag;
        trace!("rewound {}", self.path.display());
        Ok(())
    }

    async fn close(&mut self) {
        self.reader = None;
    }
}

/// Opens the same FLV file for every test run
#[derive(Debug, Clone)]
pub struct FlvOpener {
    path: PathBuf,
}

impl FlvOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MediaOpener for FlvOpener {
    async fn open(&self) -> Result<Box<dyn MediaSource>> {
        Ok(Box::new(FlvFile::open(&self.path).await?))
    }
}
