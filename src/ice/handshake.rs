// src/ice/handshake.rs
//! Application-level connectivity handshake.
//!
//! Exactly 9 bytes on the wire: the ASCII magic `ICEH`, a type byte and a
//! big-endian 32-bit timestamp. Anything that does not start with the
//! magic belongs to the application data stream and is never consumed by
//! the handshake.

use bytes::{BufMut, BytesMut};

/// `ICEH` magic prefix.
pub const HELLO_MAGIC: [u8; 4] = *b"ICEH";

/// Handshake packet size.
pub const HELLO_LEN: usize = 9;

/// Hello packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloKind {
    Request = 0x01,
    Response = 0x02,
}

/// A decoded hello packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub kind: HelloKind,
    pub timestamp: u32,
}

impl Hello {
    pub fn request(timestamp: u32) -> Self {
        Self {
            kind: HelloKind::Request,
            timestamp,
        }
    }

    pub fn response(timestamp: u32) -> Self {
        Self {
            kind: HelloKind::Response,
            timestamp,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HELLO_LEN);
        buf.put_slice(&HELLO_MAGIC);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.timestamp);
        buf
    }

    /// Decode a datagram; `None` for anything that is not a well-formed
    /// hello (those packets are application data, not errors).
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != HELLO_LEN || data[..4] != HELLO_MAGIC {
            return None;
        }
        let kind = match data[4] {
            0x01 => HelloKind::Request,
            0x02 => HelloKind::Response,
            _ => return None,
        };
        Some(Self {
            kind,
            timestamp: u32::from_be_bytes([data[5], data[6], data[7], data[8]]),
        })
    }
}

/// Whether a datagram carries the hello magic.
pub fn is_hello(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == HELLO_MAGIC
}
