use crate::error::ProbeError;
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{Duration, timeout},
};

/// Status replies are served whatever protocol the handshake announces.
const HANDSHAKE_PROTOCOL_VERSION: i32 = 47;
const NEXT_STATE_STATUS: i32 = 1;
const PACKET_ID_HANDSHAKE: i32 = 0x00;
const PACKET_ID_STATUS: i32 = 0x00;
const MAX_PACKET_LEN: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub version: String,
    pub protocol: i32,
    pub players_online: Option<u32>,
    pub players_max: Option<u32>,
}

impl ServerStatus {
    pub fn is_ready(&self) -> bool {
        !self.version.trim().is_empty()
    }
}

#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn query_status(&self, host: &str, port: u16) -> Result<ServerStatus, ProbeError>;
}

pub struct JavaStatusProbe {
    timeout: Duration,
}

impl JavaStatusProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl StatusProbe for JavaStatusProbe {
    async fn query_status(&self, host: &str, port: u16) -> Result<ServerStatus, ProbeError> {
        timeout(self.timeout, ping(host, port))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }
}

async fn ping(host: &str, port: u16) -> Result<ServerStatus, ProbeError> {
    let mut stream = TcpStream::connect((host, port)).await?;

    stream.write_all(&handshake_packet(host, port)).await?;
    stream.write_all(&frame(PACKET_ID_STATUS, &[])).await?;

    let json = read_status_response(&mut stream).await?;
    parse_status(&json)
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    version: Option<VersionInfo>,
    players: Option<PlayersInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    protocol: i32,
}

#[derive(Debug, Deserialize)]
struct PlayersInfo {
    online: Option<u32>,
    max: Option<u32>,
}

fn parse_status(json: &str) -> Result<ServerStatus, ProbeError> {
    let response: StatusResponse = serde_json::from_str(json)?;
    let (version, protocol) = match response.version {
        Some(v) => (v.name, v.protocol),
        None => (String::new(), 0),
    };
    let (players_online, players_max) = match response.players {
        Some(p) => (p.online, p.max),
        None => (None, None),
    };

    Ok(ServerStatus {
        version,
        protocol,
        players_online,
        players_max,
    })
}

fn handshake_packet(host: &str, port: u16) -> BytesMut {
    let mut body = BytesMut::with_capacity(host.len() + 16);
    put_varint(&mut body, HANDSHAKE_PROTOCOL_VERSION);
    put_string(&mut body, host);
    body.put_u16(port);
    put_varint(&mut body, NEXT_STATE_STATUS);
    frame(PACKET_ID_HANDSHAKE, &body)
}

/// Prefixes `id` + `body` with its VarInt length.
fn frame(id: i32, body: &[u8]) -> BytesMut {
    let mut payload = BytesMut::with_capacity(body.len() + 5);
    put_varint(&mut payload, id);
    payload.put_slice(body);

    let mut packet = BytesMut::with_capacity(payload.len() + 5);
    put_varint(&mut packet, payload.len() as i32);
    packet.put_slice(&payload);
    packet
}

async fn read_status_response<R>(reader: &mut R) -> Result<String, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let len = read_varint(reader).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len > 0 && len <= MAX_PACKET_LEN)
        .ok_or_else(|| ProbeError::Protocol(format!("bad packet length {}", len)))?;

    let mut packet = BytesMut::zeroed(len);
    reader.read_exact(&mut packet).await?;

    let id = get_varint(&mut packet)?;
    if id != PACKET_ID_STATUS {
        return Err(ProbeError::Protocol(format!("unexpected packet id {:#04x}", id)));
    }
    get_string(&mut packet)
}

pub(crate) fn put_varint(buf: &mut impl BufMut, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7f == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
}

pub(crate) fn get_varint(buf: &mut impl Buf) -> Result<i32, ProbeError> {
    let mut value: u32 = 0;
    for i in 0..5 {
        if !buf.has_remaining() {
            return Err(ProbeError::Protocol("truncated VarInt".to_owned()));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeError::Protocol("VarInt longer than 5 bytes".to_owned()))
}

async fn read_varint<R>(reader: &mut R) -> Result<i32, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        value |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeError::Protocol("VarInt longer than 5 bytes".to_owned()))
}

fn put_string(buf: &mut impl BufMut, s: &str) {
    put_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut impl Buf) -> Result<String, ProbeError> {
    let len = get_varint(buf)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= buf.remaining())
        .ok_or_else(|| ProbeError::Protocol(format!("bad string length {}", len)))?;

    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|err| ProbeError::Protocol(format!("invalid UTF-8 in status: {}", err)))
}
