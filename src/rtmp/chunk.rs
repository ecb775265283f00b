//! RTMP chunk stream framing
//!
//! Outbound messages always start with a type 0 header followed by type 3
//! continuation chunks. Inbound chunks of every header type are reassembled
//! per chunk stream id.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{Result, RtmpError};

pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// Chunk size announced to the server right after the handshake
pub const OUTBOUND_CHUNK_SIZE: usize = 4096;

const MAX_CHUNK_SIZE: usize = 0x7FFF_FFFF;
const MAX_MESSAGE_SIZE: usize = 0xFF_FFFF;
const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Message type ids
pub mod msg_type {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL: u8 = 4;
    pub const WINDOW_ACK_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const DATA_AMF0: u8 = 18;
    pub const COMMAND_AMF0: u8 = 20;
}

/// Chunk stream ids used for outbound traffic
pub mod csid {
    pub const PROTOCOL_CONTROL: u32 = 2;
    pub const COMMAND: u32 = 3;
    pub const AUDIO: u32 = 4;
    pub const DATA: u32 = 5;
    pub const VIDEO: u32 = 6;
}

/// A complete, reassembled RTMP message
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    pub type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(type_id: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            type_id,
            stream_id,
            timestamp,
            payload,
        }
    }

    pub fn set_chunk_size(size: usize) -> Self {
        let size = size.min(MAX_CHUNK_SIZE) as u32;
        Self::new(
            msg_type::SET_CHUNK_SIZE,
            0,
            0,
            Bytes::copy_from_slice(&size.to_be_bytes()),
        )
    }

    pub fn acknowledgement(sequence: u32) -> Self {
        Self::new(
            msg_type::ACKNOWLEDGEMENT,
            0,
            0,
            Bytes::copy_from_slice(&sequence.to_be_bytes()),
        )
    }

    /// User control message: event type followed by its payload.
    pub fn user_control(event: u16, data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(2 + data.len());
        payload.put_u16(event);
        payload.put_slice(data);
        Self::new(msg_type::USER_CONTROL, 0, 0, payload.freeze())
    }

    /// Big-endian u32 payload of protocol control messages
    pub fn control_value(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

pub struct ChunkWriter<W> {
    inner: W,
    chunk_size: usize,
}

impl<W: AsyncWrite + Unpin> ChunkWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Change the size used for subsequent messages. Announcing it to the
    /// peer is up to the caller.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub async fn write_message(&mut self, csid: u32, message: &RtmpMessage) -> Result<()> {
        let encoded = encode_message(csid, message, self.chunk_size)?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

fn put_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => buf.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            buf.put_u8(fmt << 6);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            buf.put_u8((fmt << 6) | 1);
            buf.put_u16_le((csid - 64) as u16);
        }
    }
}

fn encode_message(csid: u32, message: &RtmpMessage, chunk_size: usize) -> Result<BytesMut> {
    let len = message.payload.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(RtmpError::Protocol(format!("message of {len} bytes is too large")));
    }

    let extended = message.timestamp >= EXTENDED_TIMESTAMP;
    let chunks = len.div_ceil(chunk_size).max(1);
    let mut buf = BytesMut::with_capacity(len + 16 + chunks * 8);

    put_basic_header(&mut buf, 0, csid);
    buf.put_uint(u64::from(message.timestamp.min(EXTENDED_TIMESTAMP)), 3);
    buf.put_uint(len as u64, 3);
    buf.put_u8(message.type_id);
    buf.put_u32_le(message.stream_id);
    if extended {
        buf.put_u32(message.timestamp);
    }

    for (index, chunk) in message.payload.chunks(chunk_size).enumerate() {
        if index > 0 {
            put_basic_header(&mut buf, 3, csid);
            if extended {
                buf.put_u32(message.timestamp);
            }
        }
        buf.put_slice(chunk);
    }

    Ok(buf)
}

#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    delta: u32,
    length: usize,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    buffer: BytesMut,
}

pub struct ChunkReader<R> {
    inner: R,
    chunk_size: usize,
    streams: HashMap<u32, ChunkStreamState>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            bytes_read: 0,
        }
    }

    /// Apply a `SetChunkSize` received from the peer.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Total bytes consumed from the transport, for acknowledgements.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read chunks until one message is complete.
    pub async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(message) = self.read_chunk().await? {
                return Ok(message);
            }
        }
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).await?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }

    async fn read_uint(&mut self, n: usize) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.fill(&mut raw[4 - n..]).await?;
        Ok(u32::from_be_bytes(raw))
    }

    async fn read_chunk(&mut self) -> Result<Option<RtmpMessage>> {
        let first = self.read_uint(1).await? as u8;
        let fmt = first >> 6;
        let csid = match u32::from(first & 0x3F) {
            0 => 64 + self.read_uint(1).await?,
            1 => {
                let low = self.read_uint(1).await?;
                let high = self.read_uint(1).await?;
                64 + low + high * 256
            }
            id => id,
        };

        let known = self.streams.contains_key(&csid);
        if fmt != 0 && !known {
            return Err(RtmpError::Protocol(format!(
                "chunk type {fmt} on unknown chunk stream {csid}"
            )));
        }

        match fmt {
            0 => {
                let mut timestamp = self.read_uint(3).await?;
                let length = self.read_uint(3).await? as usize;
                let type_id = self.read_uint(1).await? as u8;
                let mut sid = [0u8; 4];
                self.fill(&mut sid).await?;
                let extended = timestamp == EXTENDED_TIMESTAMP;
                if extended {
                    timestamp = self.read_uint(4).await?;
                }

                let state = self.streams.entry(csid).or_default();
                state.timestamp = timestamp;
                state.delta = 0;
                state.length = length;
                state.type_id = type_id;
                state.stream_id = u32::from_le_bytes(sid);
                state.extended = extended;
                state.buffer.clear();
            }
            1 | 2 => {
                let mut delta = self.read_uint(3).await?;
                let header = if fmt == 1 {
                    let length = self.read_uint(3).await? as usize;
                    let type_id = self.read_uint(1).await? as u8;
                    Some((length, type_id))
                } else {
                    None
                };
                let extended = delta == EXTENDED_TIMESTAMP;
                if extended {
                    delta = self.read_uint(4).await?;
                }

                let state = self.streams.entry(csid).or_default();
                if let Some((length, type_id)) = header {
                    state.length = length;
                    state.type_id = type_id;
                }
                state.delta = delta;
                state.extended = extended;
                state.timestamp = state.timestamp.wrapping_add(delta);
                state.buffer.clear();
            }
            _ => {
                let extended = self.streams.get(&csid).is_some_and(|s| s.extended);
                if extended {
                    self.read_uint(4).await?;
                }
                let state = self.streams.entry(csid).or_default();
                if state.buffer.is_empty() {
                    state.timestamp = state.timestamp.wrapping_add(state.delta);
                }
            }
        }

        let (length, buffered) = self
            .streams
            .get(&csid)
            .map(|s| (s.length, s.buffer.len()))
            .unwrap_or_default();
        let take = (length - buffered).min(self.chunk_size);

        let mut data = vec![0u8; take];
        self.fill(&mut data).await?;

        let state = self.streams.entry(csid).or_default();
        state.buffer.extend_from_slice(&data);

        if state.buffer.len() < state.length {
            return Ok(None);
        }

        Ok(Some(RtmpMessage {
            type_id: state.type_id,
            stream_id: state.stream_id,
            timestamp: state.timestamp,
            payload: state.buffer.split().freeze(),
        }))
    }
}
