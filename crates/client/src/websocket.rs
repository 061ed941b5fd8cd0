//! Monoio-native WebSocket client
//!
//! RFC 6455 framing over [`TlsStream`]. After the upgrade handshake the socket
//! is split into a [`WsReader`] and a [`WsWriter`] so receiving and sending can
//! run as separate monoio tasks on the same thread.

use crate::errors::{ExchangeError, Result};
use crate::http::{connect_tls, find_subsequence, TlsReadHalf, TlsStream, TlsWriteHalf};
use backpack_core::PerfTimer;

use base64::Engine;
use rustls::ClientConfig;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const READ_CHUNK: usize = 8192;
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;
/// Frames or reassembled messages larger than this are rejected
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Close code sent on a client-initiated shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Client frames are always masked
    fn client(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: Some(rand::random()),
            payload,
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::client(OpCode::Text, data.into().into_bytes())
    }

    pub fn ping(data: Vec<u8>) -> Self {
        Self::client(OpCode::Ping, data)
    }

    pub fn pong(data: Vec<u8>) -> Self {
        Self::client(OpCode::Pong, data)
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::client(OpCode::Close, payload)
    }

    fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        out.push(if self.fin { 0x80 } else { 0x00 } | self.opcode as u8);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match self.mask {
            Some(mask) => {
                out.extend_from_slice(&mask);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                Self::apply_mask(&mut out[start..], mask);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }

    /// Decode one frame from the front of `data`
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
    /// the number of bytes it occupied.
    pub fn from_bytes(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let fin = data[0] & 0x80 != 0;
        if data[0] & 0x70 != 0 {
            return Err(ExchangeError::InvalidResponse("reserved WebSocket bits set".to_string()));
        }
        let opcode = OpCode::from_u8(data[0] & 0x0f)
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("invalid WebSocket opcode {:#x}", data[0] & 0x0f)))?;

        let masked = data[1] & 0x80 != 0;
        let mut offset = 2;
        let payload_len = match data[1] & 0x7f {
            126 => {
                let Some(bytes) = data.get(offset..offset + 2) else {
                    return Ok(None);
                };
                offset += 2;
                u16::from_be_bytes([bytes[0], bytes[1]]) as u64
            }
            127 => {
                let Some(bytes) = data.get(offset..offset + 8) else {
                    return Ok(None);
                };
                offset += 8;
                let mut len = [0u8; 8];
                len.copy_from_slice(bytes);
                u64::from_be_bytes(len)
            }
            n => n as u64,
        };

        if payload_len > MAX_MESSAGE_BYTES as u64 {
            return Err(ExchangeError::InvalidResponse(format!("WebSocket frame of {payload_len} bytes exceeds limit")));
        }
        let payload_len = payload_len as usize;

        let mask = if masked {
            let Some(bytes) = data.get(offset..offset + 4) else {
                return Ok(None);
            };
            offset += 4;
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        };

        let Some(payload) = data.get(offset..offset + payload_len) else {
            return Ok(None);
        };
        let mut payload = payload.to_vec();
        if let Some(mask) = mask {
            Self::apply_mask(&mut payload, mask);
        }

        Ok(Some((Self { fin, opcode, mask, payload }, offset + payload_len)))
    }
}

/// A complete message as seen by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<(u16, String)>),
    /// Text message whose payload is not valid UTF-8
    InvalidText(Vec<u8>),
}

/// Sec-WebSocket-Accept value for a given key
pub fn accept_key(ws_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ws_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

fn validate_handshake(head: &str, ws_key: &str) -> Result<()> {
    let status_line = head.lines().next().unwrap_or_default();
    if status_line.split_whitespace().nth(1) != Some("101") {
        return Err(ExchangeError::ConnectionFailed(format!("WebSocket upgrade rejected: {status_line}")));
    }

    let expected = accept_key(ws_key);
    let accepted = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| name.trim().eq_ignore_ascii_case("sec-websocket-accept") && value.trim() == expected);
    if !accepted {
        return Err(ExchangeError::ConnectionFailed("WebSocket upgrade returned a bad accept key".to_string()));
    }
    Ok(())
}

/// An upgraded WebSocket connection, ready to be split
pub struct MonoioWebSocket {
    stream: TlsStream,
    /// Bytes that arrived after the upgrade response
    buffer: Vec<u8>,
}

impl MonoioWebSocket {
    pub async fn connect(url: &Url, tls_config: Arc<ClientConfig>) -> Result<Self> {
        let timer = PerfTimer::start("websocket_connect");
        info!("🔗 Connecting to WebSocket: {}", url);

        if !matches!(url.scheme(), "wss" | "https") {
            return Err(ExchangeError::InvalidUrl(format!("unsupported WebSocket scheme: {}", url.scheme())));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {url}")))?
            .to_string();

        let stream = connect_tls(url, tls_config).await?;
        let mut websocket = Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
        };
        websocket.handshake(url, &host).await?;

        timer.finish();
        info!("✅ WebSocket connection established to {}", url);
        Ok(websocket)
    }

    async fn handshake(&mut self, url: &Url, host: &str) -> Result<()> {
        let ws_key = generate_key();
        let path = if url.path().is_empty() { "/" } else { url.path() };
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();

        let request = format!(
            "GET {path}{query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {ws_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        self.stream.write_all(request.as_bytes()).await?;

        let mut chunk = vec![0u8; READ_CHUNK];
        let header_end = loop {
            if let Some(pos) = find_subsequence(&self.buffer, b"\r\n\r\n") {
                break pos;
            }
            if self.buffer.len() > MAX_HANDSHAKE_BYTES {
                return Err(ExchangeError::ConnectionFailed("WebSocket upgrade response too large".to_string()));
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ExchangeError::ConnectionFailed("connection closed during WebSocket upgrade".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        validate_handshake(&head, &ws_key)?;
        self.buffer.drain(..header_end + 4);

        debug!("✅ WebSocket upgrade completed ({} bytes already buffered)", self.buffer.len());
        Ok(())
    }

    pub fn into_split(self) -> (WsReader, WsWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            WsReader {
                stream: read_half,
                buffer: self.buffer,
                assembler: MessageAssembler::default(),
            },
            WsWriter {
                stream: write_half,
                close_sent: false,
            },
        )
    }
}

/// Receiving side of a split WebSocket
pub struct WsReader {
    stream: TlsReadHalf,
    buffer: Vec<u8>,
    assembler: MessageAssembler,
}

impl WsReader {
    /// Next complete frame, without message reassembly
    pub async fn receive_frame(&mut self) -> Result<Frame> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some((frame, consumed)) = Frame::from_bytes(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(frame);
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ExchangeError::NetworkError("WebSocket connection closed by peer".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next complete message; fragmented data frames are reassembled and
    /// control frames are surfaced as they arrive
    pub async fn next_message(&mut self) -> Result<WsMessage> {
        loop {
            let frame = self.receive_frame().await?;
            if let Some(message) = self.assembler.absorb(frame)? {
                return Ok(message);
            }
        }
    }
}

/// Reassembles fragmented data frames into whole messages
#[derive(Debug, Default)]
pub struct MessageAssembler {
    /// Opcode and payload of the message being reassembled
    fragments: Option<(OpCode, Vec<u8>)>,
}

impl MessageAssembler {
    pub fn absorb(&mut self, frame: Frame) -> Result<Option<WsMessage>> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(WsMessage::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(WsMessage::Pong(frame.payload))),
            OpCode::Close => Ok(Some(WsMessage::Close(parse_close_payload(&frame.payload)))),
            OpCode::Text | OpCode::Binary => {
                if self.fragments.is_some() {
                    return Err(ExchangeError::InvalidResponse("new data frame inside fragmented message".to_string()));
                }
                if frame.fin {
                    return Ok(Some(finish_message(frame.opcode, frame.payload)));
                }
                self.fragments = Some((frame.opcode, frame.payload));
                Ok(None)
            }
            OpCode::Continuation => {
                let Some((opcode, mut payload)) = self.fragments.take() else {
                    return Err(ExchangeError::InvalidResponse("continuation frame without a start".to_string()));
                };
                payload.extend_from_slice(&frame.payload);
                if payload.len() > MAX_MESSAGE_BYTES {
                    return Err(ExchangeError::InvalidResponse("fragmented message exceeds limit".to_string()));
                }
                if frame.fin {
                    return Ok(Some(finish_message(opcode, payload)));
                }
                self.fragments = Some((opcode, payload));
                Ok(None)
            }
        }
    }
}

fn finish_message(opcode: OpCode, payload: Vec<u8>) -> WsMessage {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(WsMessage::Text)
            .unwrap_or_else(|e| WsMessage::InvalidText(e.into_bytes())),
        _ => WsMessage::Binary(payload),
    }
}

fn parse_close_payload(payload: &[u8]) -> Option<(u16, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    Some((code, String::from_utf8_lossy(&payload[2..]).into_owned()))
}

/// Sending side of a split WebSocket
pub struct WsWriter {
    stream: TlsWriteHalf,
    close_sent: bool,
}

impl WsWriter {
    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if self.close_sent {
            return Err(ExchangeError::NotConnected("close frame already sent".to_string()));
        }
        if frame.opcode == OpCode::Close {
            self.close_sent = true;
        }
        self.stream.write_all(&frame.to_bytes()).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send_frame(Frame::text(text)).await
    }

    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.send_frame(Frame::pong(payload)).await
    }

    /// Send a close frame then shut down TLS; a second call is a no-op
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        if self.close_sent {
            return Ok(());
        }
        self.send_frame(Frame::close(code, reason)).await?;
        self.stream.shutdown().await
    }

    pub fn close_sent(&self) -> bool {
        self.close_sent
    }
}
