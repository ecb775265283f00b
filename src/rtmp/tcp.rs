//! RTMP over plain TCP
//!
//! ## Message Flow
//!
//! ```text
//! TcpConnector::dial → TCP connect → handshake → spawn reader task
//!
//! actor ── connect/createStream/publish/play ──► ChunkWriter ──► server
//! server ──► ChunkReader (reader task) ── _result/onStatus/media ──► RtmpEventHandler
//! ```
//!
//! The writer is shared between the owning actor and the reader task, which
//! needs it for acknowledgements and ping responses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::model::{ConnectionStatus, TagType};

use super::amf0::{self, Amf0Value};
use super::chunk::{ChunkReader, ChunkWriter, OUTBOUND_CHUNK_SIZE, RtmpMessage, csid, msg_type};
use super::error::{Result, RtmpError};
use super::handshake::client_handshake;
use super::{
    MediaMessage, PublishMode, RtmpConnection, RtmpConnector, RtmpEvent, RtmpEventHandler,
    StreamHandle,
};

pub const DEFAULT_PORT: u16 = 1935;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer length requested from the server when playing, in milliseconds
const PLAY_BUFFER_MS: u32 = 3000;

const USER_CONTROL_SET_BUFFER_LENGTH: u16 = 3;
const USER_CONTROL_PING_REQUEST: u16 = 6;
const USER_CONTROL_PING_RESPONSE: u16 = 7;

/// Parsed `rtmp://host[:port]/app` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub tc_url: String,
}

impl RtmpUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw).map_err(|_| RtmpError::InvalidUrl(raw.to_string()))?;

        if parsed.scheme() != "rtmp" {
            return Err(RtmpError::InvalidUrl(raw.to_string()));
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RtmpError::InvalidUrl(raw.to_string()))?
            .to_string();
        let app = parsed.path().trim_matches('/').to_string();

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            app,
            tc_url: raw.trim_end_matches('/').to_string(),
        })
    }
}

type Writer = Arc<Mutex<ChunkWriter<OwnedWriteHalf>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transaction {
    Connect,
    CreateStream,
}

type PendingTransactions = Arc<StdMutex<HashMap<u64, Transaction>>>;

/// Connector that dials real servers over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl RtmpConnector for TcpConnector {
    async fn dial(
        &self,
        url: &str,
        handler: Arc<dyn RtmpEventHandler>,
    ) -> Result<Box<dyn RtmpConnection>> {
        let target = RtmpUrl::parse(url)?;
        debug!("dialing {}:{}", target.host, target.port);

        let socket = tokio::time::timeout(self.connect_timeout, async {
            let mut socket = TcpStream::connect((target.host.as_str(), target.port)).await?;
            socket.set_nodelay(true)?;
            client_handshake(&mut socket).await?;
            Ok::<_, RtmpError>(socket)
        })
        .await
        .map_err(|_| {
            RtmpError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })??;
        handler
            .on_event(RtmpEvent::StatusChanged(ConnectionStatus::HandshakeOk))
            .await;

        let (read_half, write_half) = socket.into_split();
        let writer: Writer = Arc::new(Mutex::new(ChunkWriter::new(write_half)));
        let pending: PendingTransactions = Arc::default();

        let reader = tokio::spawn(read_loop(
            ChunkReader::new(BufReader::new(read_half)),
            writer.clone(),
            pending.clone(),
            handler.clone(),
        ));

        Ok(Box::new(TcpConnection {
            target,
            writer,
            pending,
            handler,
            reader: Some(reader),
            next_transaction: 1,
            streams: Vec::new(),
        }))
    }
}

pub struct TcpConnection {
    target: RtmpUrl,
    writer: Writer,
    pending: PendingTransactions,
    handler: Arc<dyn RtmpEventHandler>,
    /// `None` once closed
    reader: Option<JoinHandle<()>>,
    next_transaction: u64,
    streams: Vec<StreamHandle>,
}

impl TcpConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.reader.is_none() {
            return Err(RtmpError::Closed);
        }
        Ok(())
    }

    fn begin_transaction(&mut self, kind: Transaction) -> f64 {
        let id = self.next_transaction;
        self.next_transaction += 1;
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, kind);
        }
        id as f64
    }

    async fn send(&self, chunk_stream: u32, message: RtmpMessage) -> Result<()> {
        self.writer
            .lock()
            .await
            .write_message(chunk_stream, &message)
            .await
    }

    async fn send_command(&self, stream_id: u32, values: &[Amf0Value]) -> Result<()> {
        let message = RtmpMessage::new(
            msg_type::COMMAND_AMF0,
            stream_id,
            0,
            amf0::encode_all(values),
        );
        self.send(csid::COMMAND, message).await
    }

    async fn report(&self, status: ConnectionStatus) {
        self.handler.on_event(RtmpEvent::StatusChanged(status)).await;
    }
}

#[async_trait]
impl RtmpConnection for TcpConnection {
    async fn connect(&mut self) -> Result<()> {
        self.ensure_open()?;

        {
            let mut writer = self.writer.lock().await;
            writer
                .write_message(
                    csid::PROTOCOL_CONTROL,
                    &RtmpMessage::set_chunk_size(OUTBOUND_CHUNK_SIZE),
                )
                .await?;
            writer.set_chunk_size(OUTBOUND_CHUNK_SIZE);
        }

        let transaction = self.begin_transaction(Transaction::Connect);
        let properties = amf0::object([
            ("app", Amf0Value::String(self.target.app.clone())),
            ("type", Amf0Value::String("nonprivate".into())),
            (
                "flashVer",
                Amf0Value::String("FMLE/3.0 (compatible; rtmp-stress)".into()),
            ),
            ("tcUrl", Amf0Value::String(self.target.tc_url.clone())),
            ("fpad", Amf0Value::Boolean(false)),
            ("capabilities", Amf0Value::Number(15.0)),
            ("audioCodecs", Amf0Value::Number(3575.0)),
            ("videoCodecs", Amf0Value::Number(252.0)),
            ("videoFunction", Amf0Value::Number(1.0)),
        ]);

        self.report(ConnectionStatus::Connect).await;
        self.send_command(
            0,
            &[
                Amf0Value::String("connect".into()),
                Amf0Value::Number(transaction),
                properties,
            ],
        )
        .await
    }

    async fn create_stream(&mut self) -> Result<()> {
        self.ensure_open()?;

        let transaction = self.begin_transaction(Transaction::CreateStream);
        self.report(ConnectionStatus::CreateStream).await;
        self.send_command(
            0,
            &[
                Amf0Value::String("createStream".into()),
                Amf0Value::Number(transaction),
                Amf0Value::Null,
            ],
        )
        .await
    }

    async fn publish(&mut self, stream: StreamHandle, key: &str, mode: PublishMode) -> Result<()> {
        self.ensure_open()?;
        self.streams.push(stream);

        self.send_command(
            stream.0,
            &[
                Amf0Value::String("publish".into()),
                Amf0Value::Number(0.0),
                Amf0Value::Null,
                Amf0Value::String(key.to_string()),
                Amf0Value::String(mode.as_str().to_string()),
            ],
        )
        .await
    }

    async fn play(&mut self, stream: StreamHandle, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.streams.push(stream);

        let mut buffer_length = [0u8; 8];
        buffer_length[..4].copy_from_slice(&stream.0.to_be_bytes());
        buffer_length[4..].copy_from_slice(&PLAY_BUFFER_MS.to_be_bytes());
        self.send(
            csid::PROTOCOL_CONTROL,
            RtmpMessage::user_control(USER_CONTROL_SET_BUFFER_LENGTH, &buffer_length),
        )
        .await?;

        self.send_command(
            stream.0,
            &[
                Amf0Value::String("play".into()),
                Amf0Value::Number(0.0),
                Amf0Value::Null,
                Amf0Value::String(key.to_string()),
                // live if available, recorded otherwise
                Amf0Value::Number(-2.0),
            ],
        )
        .await
    }

    async fn publish_data(
        &mut self,
        stream: StreamHandle,
        tag_type: TagType,
        payload: Bytes,
        timestamp: u32,
    ) -> Result<()> {
        self.ensure_open()?;

        let chunk_stream = match tag_type {
            TagType::Audio => csid::AUDIO,
            TagType::Video => csid::VIDEO,
            TagType::Script => csid::DATA,
        };
        let message = RtmpMessage::new(tag_type.type_id(), stream.0, timestamp, payload);
        self.send(chunk_stream, message).await
    }

    async fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        for stream in std::mem::take(&mut self.streams) {
            let delete = [
                Amf0Value::String("deleteStream".into()),
                Amf0Value::Number(0.0),
                Amf0Value::Null,
                Amf0Value::Number(f64::from(stream.0)),
            ];
            if let Err(e) = self.send_command(0, &delete).await {
                trace!("deleteStream failed: {e}");
                break;
            }
        }

        if let Err(e) = self.writer.lock().await.shutdown().await {
            trace!("shutdown failed: {e}");
        }
        reader.abort();
        debug!("connection to {} closed", self.target.host);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop<R>(
    mut reader: ChunkReader<R>,
    writer: Writer,
    pending: PendingTransactions,
    handler: Arc<dyn RtmpEventHandler>,
) where
    R: AsyncRead + Unpin,
{
    let mut window: Option<u64> = None;
    let mut acknowledged: u64 = 0;

    loop {
        let message = match reader.read_message().await {
            Ok(message) => message,
            Err(e) => {
                debug!("read loop finished: {e}");
                break;
            }
        };

        if let Some(window) = window
            && reader.bytes_read() - acknowledged >= window
        {
            acknowledged = reader.bytes_read();
            let ack = RtmpMessage::acknowledgement(acknowledged as u32);
            if let Err(e) = writer
                .lock()
                .await
                .write_message(csid::PROTOCOL_CONTROL, &ack)
                .await
            {
                debug!("failed to send acknowledgement: {e}");
            }
        }

        match message.type_id {
            msg_type::SET_CHUNK_SIZE => {
                if let Some(size) = message.control_value() {
                    trace!("peer chunk size {size}");
                    reader.set_chunk_size((size & 0x7FFF_FFFF) as usize);
                }
            }
            msg_type::WINDOW_ACK_SIZE => {
                window = message.control_value().map(u64::from);
            }
            msg_type::USER_CONTROL => {
                if message.payload.len() >= 2
                    && u16::from_be_bytes([message.payload[0], message.payload[1]])
                        == USER_CONTROL_PING_REQUEST
                {
                    let pong =
                        RtmpMessage::user_control(USER_CONTROL_PING_RESPONSE, &message.payload[2..]);
                    if let Err(e) = writer
                        .lock()
                        .await
                        .write_message(csid::PROTOCOL_CONTROL, &pong)
                        .await
                    {
                        debug!("failed to answer ping: {e}");
                    }
                }
            }
            msg_type::AUDIO | msg_type::VIDEO => {
                let tag_type = if message.type_id == msg_type::AUDIO {
                    TagType::Audio
                } else {
                    TagType::Video
                };
                handler
                    .on_event(RtmpEvent::MessageReceived(MediaMessage {
                        tag_type,
                        timestamp: message.timestamp,
                        payload: message.payload,
                    }))
                    .await;
            }
            msg_type::COMMAND_AMF0 => match amf0::decode_all(message.payload.clone()) {
                Ok(values) => {
                    for event in command_events(&values, message.stream_id, &pending) {
                        handler.on_event(event).await;
                    }
                }
                Err(e) => warn!("undecodable command: {e}"),
            },
            other => trace!("ignoring message type {other}"),
        }
    }

    handler.on_event(RtmpEvent::Closed).await;
}

/// Translate a command received from the server into callbacks.
fn command_events(
    values: &[Amf0Value],
    stream_id: u32,
    pending: &PendingTransactions,
) -> Vec<RtmpEvent> {
    let name = values.first().and_then(Amf0Value::as_str).unwrap_or_default();
    let transaction = values
        .get(1)
        .and_then(Amf0Value::as_number)
        .unwrap_or_default() as u64;

    let take_pending = || {
        pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&transaction))
    };

    match name {
        "_result" => match take_pending() {
            Some(Transaction::Connect) => {
                vec![RtmpEvent::StatusChanged(ConnectionStatus::ConnectOk)]
            }
            Some(Transaction::CreateStream) => {
                match values.get(3).and_then(Amf0Value::as_number) {
                    Some(id) => vec![
                        RtmpEvent::StatusChanged(ConnectionStatus::CreateStreamOk),
                        RtmpEvent::StreamCreated(StreamHandle(id as u32)),
                    ],
                    None => {
                        warn!("createStream result without a stream id");
                        vec![RtmpEvent::StatusChanged(ConnectionStatus::Error)]
                    }
                }
            }
            None => {
                trace!("result for unknown transaction {transaction}");
                Vec::new()
            }
        },
        "_error" => {
            let kind = take_pending();
            let code = status_code(values).unwrap_or("unknown");
            warn!("server rejected {kind:?}: {code}");
            vec![RtmpEvent::StatusChanged(ConnectionStatus::Error)]
        }
        "onStatus" => {
            let code = status_code(values).unwrap_or_default();
            let level = values
                .get(3)
                .and_then(|info| info.get("level"))
                .and_then(Amf0Value::as_str)
                .unwrap_or_default();

            if code == "NetStream.Publish.Start" {
                vec![RtmpEvent::PublishStarted(StreamHandle(stream_id))]
            } else if level == "error" {
                warn!("stream error: {code}");
                vec![RtmpEvent::StatusChanged(ConnectionStatus::Error)]
            } else {
                trace!("stream status {code}");
                Vec::new()
            }
        }
        other => {
            trace!("ignoring command {other}");
            Vec::new()
        }
    }
}

fn status_code(values: &[Amf0Value]) -> Option<&str> {
    values
        .get(3)
        .and_then(|info| info.get("code"))
        .and_then(Amf0Value::as_str)
}
