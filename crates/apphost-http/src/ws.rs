// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebSocket framing (RFC 6455).
//!
//! Frame layout:
//! - byte 0: FIN + opcode
//! - byte 1: MASK + 7-bit length; 126 -> 16-bit length, 127 -> 64-bit length
//! - 4-byte masking key when MASK is set
//! - payload, XOR-masked with the key when present
//!
//! Client-to-server frames must be masked, server-to-client frames must not
//! be. 64-bit extended lengths are parsed but payloads are capped at
//! `u32::MAX` bytes; longer frames are rejected with a frame-size error.

use base64::Engine as _;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::engine::Role;
use crate::error::{HttpError, Result};
use crate::pipe::Pipe;

/// Handshake GUID (RFC 6455 section 1.3).
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest accepted frame payload. See module docs.
pub const MAX_FRAME_PAYLOAD: u64 = u32::MAX as u64;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single decoded frame.
#[derive(Debug, Clone)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// A complete message, after reassembly of fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
}

/// Reassembly and close-tracking state, owned by the engine.
#[derive(Debug, Default)]
pub struct WsChannel {
    pub(crate) fragments: Vec<u8>,
    pub(crate) fragment_opcode: Option<Opcode>,
    pub(crate) closed: bool,
    pub(crate) close_sent: bool,
}

/// Compute `Sec-WebSocket-Accept` for a handshake key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Read one frame, enforcing the masking rule for `role`.
pub async fn read_frame(pipe: &mut Pipe, role: Role) -> Result<WsFrame> {
    let header = pipe
        .read_exact(2)
        .await?
        .filter(|h| h.len() == 2)
        .ok_or(HttpError::ConnectionClosed)?;

    let fin = header[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(header[0])
        .ok_or_else(|| HttpError::Parse(format!("invalid opcode {:#x}", header[0] & 0x0F)))?;
    let masked = header[1] & 0x80 != 0;
    let mut len = (header[1] & 0x7F) as u64;

    if len == 126 {
        let ext = pipe
            .read_exact(2)
            .await?
            .filter(|e| e.len() == 2)
            .ok_or(HttpError::ConnectionClosed)?;
        len = u16::from_be_bytes([ext[0], ext[1]]) as u64;
    } else if len == 127 {
        let ext = pipe
            .read_exact(8)
            .await?
            .filter(|e| e.len() == 8)
            .ok_or(HttpError::ConnectionClosed)?;
        len = u64::from_be_bytes([
            ext[0], ext[1], ext[2], ext[3], ext[4], ext[5], ext[6], ext[7],
        ]);
    }

    if len > MAX_FRAME_PAYLOAD {
        return Err(HttpError::FrameTooLarge(len));
    }
    if opcode.is_control() {
        if !fin {
            return Err(HttpError::Protocol("fragmented control frame".into()));
        }
        if len > 125 {
            return Err(HttpError::Protocol("control frame payload too large".into()));
        }
    }
    match role {
        Role::Server if !masked => {
            return Err(HttpError::Protocol(
                "client-to-server frames must be masked".into(),
            ));
        }
        Role::Client if masked => {
            return Err(HttpError::Protocol(
                "server-to-client frames must not be masked".into(),
            ));
        }
        _ => {}
    }

    let mask = if masked {
        let key = pipe
            .read_exact(4)
            .await?
            .filter(|k| k.len() == 4)
            .ok_or(HttpError::ConnectionClosed)?;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    let payload = if len == 0 {
        Bytes::new()
    } else {
        let data = pipe
            .read_exact(len as usize)
            .await?
            .ok_or(HttpError::ConnectionClosed)?;
        if (data.len() as u64) < len {
            return Err(HttpError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF inside websocket frame",
            )));
        }
        match mask {
            Some(key) => {
                let mut unmasked = data.to_vec();
                for (i, byte) in unmasked.iter_mut().enumerate() {
                    *byte ^= key[i % 4];
                }
                Bytes::from(unmasked)
            }
            None => data,
        }
    };

    Ok(WsFrame { fin, opcode, payload })
}

/// Write one frame, masking when `role` is the client side.
pub async fn write_frame(
    pipe: &mut Pipe,
    fin: bool,
    opcode: Opcode,
    payload: &[u8],
    role: Role,
) -> Result<()> {
    let mask = match role {
        Role::Client => Some(rand::random::<[u8; 4]>()),
        Role::Server => None,
    };

    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(if fin { 0x80 } else { 0x00 } | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len < 65536 {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            for (i, byte) in payload.iter().enumerate() {
                out.push(*byte ^ key[i % 4]);
            }
        }
        None => out.extend_from_slice(payload),
    }

    pipe.write_all(&out).await
}

/// Read frames until a complete message is assembled.
///
/// Control frames are handled inline: CLOSE is echoed once and ends the
/// stream (`None`), PING gets a PONG with the same payload, PONG is ignored.
/// Data frames reassemble across CONTINUATIONs; a stray continuation or a
/// new data frame in the middle of a fragmented message is a protocol error.
pub(crate) async fn recv_message(
    pipe: &mut Pipe,
    chan: &mut WsChannel,
    role: Role,
) -> Result<Option<WsMessage>> {
    if chan.closed {
        return Ok(None);
    }
    loop {
        let frame = read_frame(pipe, role).await?;
        match frame.opcode {
            Opcode::Close => {
                chan.closed = true;
                if !chan.close_sent {
                    chan.close_sent = true;
                    // Echo the close code (first two payload bytes) back.
                    let echo: &[u8] = if frame.payload.len() >= 2 {
                        &frame.payload[..2]
                    } else {
                        &[]
                    };
                    write_frame(pipe, true, Opcode::Close, echo, role).await?;
                }
                return Ok(None);
            }
            Opcode::Ping => {
                write_frame(pipe, true, Opcode::Pong, &frame.payload, role).await?;
            }
            Opcode::Pong => {}
            Opcode::Text | Opcode::Binary => {
                if chan.fragment_opcode.is_some() {
                    return Err(HttpError::Protocol(
                        "data frame inside fragmented message".into(),
                    ));
                }
                if frame.fin {
                    return Ok(Some(message_from(frame.opcode, frame.payload)?));
                }
                chan.fragment_opcode = Some(frame.opcode);
                chan.fragments = frame.payload.to_vec();
            }
            Opcode::Continuation => {
                let opcode = chan.fragment_opcode.ok_or_else(|| {
                    HttpError::Protocol("continuation without a message in progress".into())
                })?;
                chan.fragments.extend_from_slice(&frame.payload);
                if frame.fin {
                    chan.fragment_opcode = None;
                    let data = Bytes::from(std::mem::take(&mut chan.fragments));
                    return Ok(Some(message_from(opcode, data)?));
                }
            }
        }
    }
}

fn message_from(opcode: Opcode, payload: Bytes) -> Result<WsMessage> {
    match opcode {
        Opcode::Text => {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|_| HttpError::Parse("invalid UTF-8 in text frame".into()))?;
            Ok(WsMessage::Text(text))
        }
        Opcode::Binary => Ok(WsMessage::Binary(payload)),
        _ => Err(HttpError::Protocol("not a data opcode".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_rfc_example() {
        // Example from RFC 6455 section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_opcode_from_u8() {
        assert_eq!(Opcode::from_u8(0x81), Some(Opcode::Text));
        assert_eq!(Opcode::from_u8(0x02), Some(Opcode::Binary));
        assert_eq!(Opcode::from_u8(0x88), Some(Opcode::Close));
        assert_eq!(Opcode::from_u8(0x03), None);
        assert!(Opcode::Ping.is_control());
        assert!(!Opcode::Text.is_control());
    }

    /// Connected pipe pair over an in-memory stream.
    fn pipes() -> (Pipe, Pipe) {
        let (a, b) = tokio::io::duplex(1 << 20);
        (Pipe::new(a), Pipe::new(b))
    }

    #[tokio::test]
    async fn test_frame_round_trip_masked_and_unmasked() {
        let (mut client, mut server) = pipes();

        // Client-to-server: masked.
        write_frame(&mut client, true, Opcode::Binary, &[1, 2, 3, 250], Role::Client)
            .await
            .unwrap();
        let frame = read_frame(&mut server, Role::Server).await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Binary);
        assert_eq!(&frame.payload[..], &[1, 2, 3, 250]);

        // Server-to-client: unmasked.
        write_frame(&mut server, true, Opcode::Text, b"hi", Role::Server)
            .await
            .unwrap();
        let frame = read_frame(&mut client, Role::Client).await.unwrap();
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_extended_16bit_length() {
        let (mut client, mut server) = pipes();
        let payload = vec![0xAB; 300];
        write_frame(&mut client, true, Opcode::Binary, &payload, Role::Client)
            .await
            .unwrap();
        let frame = read_frame(&mut server, Role::Server).await.unwrap();
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_unmasked_client_frame_rejected() {
        let (mut client, mut server) = pipes();
        // Wrong direction on purpose: no mask on a client-to-server frame.
        write_frame(&mut client, true, Opcode::Text, b"x", Role::Server)
            .await
            .unwrap();
        let err = read_frame(&mut server, Role::Server).await.unwrap_err();
        assert!(matches!(err, HttpError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_fragmented_message_reassembles() {
        let (mut client, mut server) = pipes();
        write_frame(&mut client, false, Opcode::Text, b"He", Role::Client)
            .await
            .unwrap();
        write_frame(&mut client, false, Opcode::Continuation, b"ll", Role::Client)
            .await
            .unwrap();
        write_frame(&mut client, true, Opcode::Continuation, b"o", Role::Client)
            .await
            .unwrap();

        let mut chan = WsChannel::default();
        let msg = recv_message(&mut server, &mut chan, Role::Server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, WsMessage::Text("He".to_string() + "llo"));
    }

    #[tokio::test]
    async fn test_stray_continuation_is_protocol_error() {
        let (mut client, mut server) = pipes();
        write_frame(&mut client, true, Opcode::Continuation, b"x", Role::Client)
            .await
            .unwrap();
        let mut chan = WsChannel::default();
        let err = recv_message(&mut server, &mut chan, Role::Server)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong_same_payload() {
        let (mut client, mut server) = pipes();
        write_frame(&mut client, true, Opcode::Ping, &[0x01, 0x02], Role::Client)
            .await
            .unwrap();
        write_frame(&mut client, true, Opcode::Text, b"after", Role::Client)
            .await
            .unwrap();

        let mut chan = WsChannel::default();
        let msg = recv_message(&mut server, &mut chan, Role::Server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, WsMessage::Text("after".to_string()));

        // The pong went out before the text was delivered.
        let pong = read_frame(&mut client, Role::Client).await.unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(&pong.payload[..], &[0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_close_is_echoed_and_ends_stream() {
        let (mut client, mut server) = pipes();
        let close_payload = 1000u16.to_be_bytes();
        write_frame(&mut client, true, Opcode::Close, &close_payload, Role::Client)
            .await
            .unwrap();

        let mut chan = WsChannel::default();
        let end = recv_message(&mut server, &mut chan, Role::Server)
            .await
            .unwrap();
        assert!(end.is_none());
        assert!(chan.closed);

        let echo = read_frame(&mut client, Role::Client).await.unwrap();
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(&echo.payload[..], &close_payload);

        // Subsequent receives keep reporting end-of-stream.
        let again = recv_message(&mut server, &mut chan, Role::Server)
            .await
            .unwrap();
        assert!(again.is_none());
    }
}
