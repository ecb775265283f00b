//! Client side of the plain RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes) ---------------|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! No HMAC digest is sent; every common server accepts the plain form
//! from clients.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::error::{Result, RtmpError};

pub const HANDSHAKE_SIZE: usize = 1536;
pub const RTMP_VERSION: u8 = 3;

/// Run the handshake on a freshly opened transport.
pub async fn client_handshake<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let c1 = generate_packet();

    let mut c0c1 = Vec::with_capacity(1 + HANDSHAKE_SIZE);
    c0c1.push(RTMP_VERSION);
    c0c1.extend_from_slice(&c1);
    stream.write_all(&c0c1).await?;
    stream.flush().await?;
    trace!("sent C0+C1");

    let version = stream.read_u8().await?;
    if version != RTMP_VERSION {
        return Err(RtmpError::Handshake(format!(
            "unsupported server version {version}"
        )));
    }

    let mut s1 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s1).await?;

    let mut s2 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s2).await?;
    trace!("received S0+S1+S2");

    stream.write_all(&s1).await?;
    stream.flush().await?;
    trace!("sent C2");

    Ok(())
}

fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];

    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    packet[0..4].copy_from_slice(&time.to_be_bytes());
    // bytes 4..8 stay zero
    rand::rng().fill(&mut packet[8..]);

    packet
}
