// src/stun/message.rs
//! STUN/TURN wire codec (RFC 5389 / RFC 5766 subset).
//!
//! Covers the message and attribute set this agent actually sends and
//! receives: Binding, Allocate, Refresh, CreatePermission, ChannelBind,
//! Send/Data indications, XOR address attributes and ChannelData framing.
//! All multi-byte fields are big-endian on the wire.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use rand::RngCore;

use crate::error::StunError;

/// STUN magic cookie (RFC 5389 Section 6).
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// STUN message header size.
pub const HEADER_LEN: usize = 20;

/// Attribute type codes.
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
pub const ATTR_USERNAME: u16 = 0x0006;
pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
pub const ATTR_ERROR_CODE: u16 = 0x0009;
pub const ATTR_CHANNEL_NUMBER: u16 = 0x000C;
pub const ATTR_LIFETIME: u16 = 0x000D;
pub const ATTR_XOR_PEER_ADDRESS: u16 = 0x0012;
pub const ATTR_DATA: u16 = 0x0013;
pub const ATTR_REALM: u16 = 0x0014;
pub const ATTR_NONCE: u16 = 0x0015;
pub const ATTR_XOR_RELAYED_ADDRESS: u16 = 0x0016;
pub const ATTR_REQUESTED_TRANSPORT: u16 = 0x0019;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// IPv4 address family byte in address attributes.
const FAMILY_IPV4: u8 = 0x01;

/// UDP protocol number for REQUESTED-TRANSPORT.
pub const TRANSPORT_UDP: u8 = 17;

/// STUN/TURN message types used by this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    BindingRequest = 0x0001,
    BindingSuccess = 0x0101,
    AllocateRequest = 0x0003,
    AllocateSuccess = 0x0103,
    AllocateError = 0x0113,
    RefreshRequest = 0x0004,
    RefreshSuccess = 0x0104,
    RefreshError = 0x0114,
    CreatePermissionRequest = 0x0008,
    CreatePermissionSuccess = 0x0108,
    CreatePermissionError = 0x0118,
    ChannelBindRequest = 0x0009,
    ChannelBindSuccess = 0x0109,
    ChannelBindError = 0x0119,
    SendIndication = 0x0016,
    DataIndication = 0x0017,
}

impl MessageType {
    /// Map a wire value to a known message type.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::BindingRequest),
            0x0101 => Some(Self::BindingSuccess),
            0x0003 => Some(Self::AllocateRequest),
            0x0103 => Some(Self::AllocateSuccess),
            0x0113 => Some(Self::AllocateError),
            0x0004 => Some(Self::RefreshRequest),
            0x0104 => Some(Self::RefreshSuccess),
            0x0114 => Some(Self::RefreshError),
            0x0008 => Some(Self::CreatePermissionRequest),
            0x0108 => Some(Self::CreatePermissionSuccess),
            0x0118 => Some(Self::CreatePermissionError),
            0x0009 => Some(Self::ChannelBindRequest),
            0x0109 => Some(Self::ChannelBindSuccess),
            0x0119 => Some(Self::ChannelBindError),
            0x0016 => Some(Self::SendIndication),
            0x0017 => Some(Self::DataIndication),
            _ => None,
        }
    }

    /// Error-response class bit pattern (RFC 5389 Section 6).
    pub fn is_error(self) -> bool {
        (self as u16) & 0x0110 == 0x0110
    }

    /// Success-response class bit pattern.
    pub fn is_success(self) -> bool {
        (self as u16) & 0x0110 == 0x0100
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BindingRequest => "Binding Request",
            Self::BindingSuccess => "Binding Success",
            Self::AllocateRequest => "Allocate Request",
            Self::AllocateSuccess => "Allocate Success",
            Self::AllocateError => "Allocate Error",
            Self::RefreshRequest => "Refresh Request",
            Self::RefreshSuccess => "Refresh Success",
            Self::RefreshError => "Refresh Error",
            Self::CreatePermissionRequest => "CreatePermission Request",
            Self::CreatePermissionSuccess => "CreatePermission Success",
            Self::CreatePermissionError => "CreatePermission Error",
            Self::ChannelBindRequest => "ChannelBind Request",
            Self::ChannelBindSuccess => "ChannelBind Success",
            Self::ChannelBindError => "ChannelBind Error",
            Self::SendIndication => "Send Indication",
            Self::DataIndication => "Data Indication",
        };
        write!(f, "{name}")
    }
}

/// 96-bit STUN transaction id, rotated per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        let mut id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed STUN/TURN attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    MappedAddress(SocketAddr),
    XorMappedAddress(SocketAddr),
    XorPeerAddress(SocketAddr),
    XorRelayedAddress(SocketAddr),
    Username(String),
    Realm(String),
    Nonce(Vec<u8>),
    MessageIntegrity([u8; 20]),
    ErrorCode { code: u16, reason: String },
    ChannelNumber(u16),
    Lifetime(u32),
    Data(Vec<u8>),
    RequestedTransport(u8),
    Unknown { attr_type: u16, value: Vec<u8> },
}

impl Attribute {
    /// Wire type code of this attribute.
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => ATTR_MAPPED_ADDRESS,
            Self::XorMappedAddress(_) => ATTR_XOR_MAPPED_ADDRESS,
            Self::XorPeerAddress(_) => ATTR_XOR_PEER_ADDRESS,
            Self::XorRelayedAddress(_) => ATTR_XOR_RELAYED_ADDRESS,
            Self::Username(_) => ATTR_USERNAME,
            Self::Realm(_) => ATTR_REALM,
            Self::Nonce(_) => ATTR_NONCE,
            Self::MessageIntegrity(_) => ATTR_MESSAGE_INTEGRITY,
            Self::ErrorCode { .. } => ATTR_ERROR_CODE,
            Self::ChannelNumber(_) => ATTR_CHANNEL_NUMBER,
            Self::Lifetime(_) => ATTR_LIFETIME,
            Self::Data(_) => ATTR_DATA,
            Self::RequestedTransport(_) => ATTR_REQUESTED_TRANSPORT,
            Self::Unknown { attr_type, .. } => *attr_type,
        }
    }

    /// Append this attribute as `type|length|value` with 4-byte padding.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), StunError> {
        buf.put_u16(self.attr_type());
        let len_pos = buf.len();
        buf.put_u16(0);
        let value_start = buf.len();

        match self {
            Self::MappedAddress(addr) => encode_address(buf, *addr, false)?,
            Self::XorMappedAddress(addr)
            | Self::XorPeerAddress(addr)
            | Self::XorRelayedAddress(addr) => encode_address(buf, *addr, true)?,
            Self::Username(s) | Self::Realm(s) => buf.put_slice(s.as_bytes()),
            Self::Nonce(bytes) | Self::Data(bytes) => buf.put_slice(bytes),
            Self::MessageIntegrity(hmac) => buf.put_slice(hmac),
            Self::ErrorCode { code, reason } => {
                buf.put_u16(0);
                buf.put_u8((code / 100) as u8);
                buf.put_u8((code % 100) as u8);
                buf.put_slice(reason.as_bytes());
            }
            Self::ChannelNumber(chan) => {
                buf.put_u16(*chan);
                buf.put_u16(0);
            }
            Self::Lifetime(seconds) => buf.put_u32(*seconds),
            Self::RequestedTransport(proto) => {
                buf.put_u8(*proto);
                buf.put_u8(0);
                buf.put_u16(0);
            }
            Self::Unknown { value, .. } => buf.put_slice(value),
        }

        let value_len = buf.len() - value_start;
        buf[len_pos..len_pos + 2].copy_from_slice(&(value_len as u16).to_be_bytes());
        let padding = (4 - value_len % 4) % 4;
        buf.put_bytes(0, padding);
        Ok(())
    }

    /// Decode one attribute value. Unknown types are kept as raw bytes.
    pub fn decode(attr_type: u16, value: &[u8]) -> Result<Self, StunError> {
        Ok(match attr_type {
            ATTR_MAPPED_ADDRESS => Self::MappedAddress(decode_address(value, false)?),
            ATTR_XOR_MAPPED_ADDRESS => Self::XorMappedAddress(decode_address(value, true)?),
            ATTR_XOR_PEER_ADDRESS => Self::XorPeerAddress(decode_address(value, true)?),
            ATTR_XOR_RELAYED_ADDRESS => Self::XorRelayedAddress(decode_address(value, true)?),
            ATTR_USERNAME => Self::Username(String::from_utf8_lossy(value).into_owned()),
            ATTR_REALM => Self::Realm(String::from_utf8_lossy(value).into_owned()),
            ATTR_NONCE => Self::Nonce(value.to_vec()),
            ATTR_MESSAGE_INTEGRITY => {
                let hmac: [u8; 20] = value
                    .try_into()
                    .map_err(|_| StunError::MissingAttribute("MESSAGE-INTEGRITY"))?;
                Self::MessageIntegrity(hmac)
            }
            ATTR_ERROR_CODE => {
                if value.len() < 4 {
                    return Err(StunError::MissingAttribute("ERROR-CODE"));
                }
                let class = (value[2] & 0x07) as u16;
                let number = value[3] as u16;
                Self::ErrorCode {
                    code: class * 100 + number,
                    reason: String::from_utf8_lossy(&value[4..]).into_owned(),
                }
            }
            ATTR_CHANNEL_NUMBER => {
                if value.len() < 2 {
                    return Err(StunError::MissingAttribute("CHANNEL-NUMBER"));
                }
                Self::ChannelNumber(u16::from_be_bytes([value[0], value[1]]))
            }
            ATTR_LIFETIME => {
                if value.len() < 4 {
                    return Err(StunError::MissingAttribute("LIFETIME"));
                }
                Self::Lifetime(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
            }
            ATTR_DATA => Self::Data(value.to_vec()),
            ATTR_REQUESTED_TRANSPORT => {
                if value.is_empty() {
                    return Err(StunError::MissingAttribute("REQUESTED-TRANSPORT"));
                }
                Self::RequestedTransport(value[0])
            }
            other => Self::Unknown {
                attr_type: other,
                value: value.to_vec(),
            },
        })
    }
}

/// Encode an IPv4 address attribute value, XORing with the magic cookie
/// when `xor` is set.
fn encode_address(buf: &mut BytesMut, addr: SocketAddr, xor: bool) -> Result<(), StunError> {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => return Err(StunError::AddressFamily(0x02)),
    };

    buf.put_u8(0);
    buf.put_u8(FAMILY_IPV4);
    if xor {
        buf.put_u16(addr.port() ^ (MAGIC_COOKIE >> 16) as u16);
        buf.put_u32(u32::from(ip) ^ MAGIC_COOKIE);
    } else {
        buf.put_u16(addr.port());
        buf.put_u32(u32::from(ip));
    }
    Ok(())
}

/// Decode an IPv4 address attribute value (the inverse of [`encode_address`]).
fn decode_address(value: &[u8], xor: bool) -> Result<SocketAddr, StunError> {
    if value.len() < 8 {
        return Err(StunError::ShortMessage(value.len()));
    }
    let family = value[1];
    if family != FAMILY_IPV4 {
        return Err(StunError::AddressFamily(family));
    }

    let mut port = u16::from_be_bytes([value[2], value[3]]);
    let mut ip = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
    if xor {
        port ^= (MAGIC_COOKIE >> 16) as u16;
        ip ^= MAGIC_COOKIE;
    }
    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port))
}

/// A decoded or under-construction STUN/TURN message.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub transaction_id: TransactionId,
    pub attributes: Vec<Attribute>,
}

impl Message {
    /// New message with a fresh random transaction id.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            transaction_id: TransactionId::new(),
            attributes: Vec::new(),
        }
    }

    pub fn with_transaction(message_type: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) -> &mut Self {
        self.attributes.push(attribute);
        self
    }

    /// Encode header and attributes; the header length field is
    /// backpatched to the total padded attribute size.
    pub fn encode(&self) -> Result<BytesMut, StunError> {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_u16(self.message_type as u16);
        buf.put_u16(0);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(self.transaction_id.as_bytes());

        for attr in &self.attributes {
            attr.encode(&mut buf)?;
        }

        let attr_len = (buf.len() - HEADER_LEN) as u16;
        buf[2..4].copy_from_slice(&attr_len.to_be_bytes());
        Ok(buf)
    }

    /// Decode a datagram.
    ///
    /// Header violations (short buffer, bad cookie, declared length past
    /// the datagram, unknown type) are errors. The attribute walk is
    /// lenient: a truncated tail ends the walk keeping what decoded
    /// before it, and an individually ill-formed attribute (say an IPv6
    /// family where IPv4 is expected) is skipped so later well-formed
    /// attributes still surface.
    pub fn decode(data: &[u8]) -> Result<Self, StunError> {
        if data.len() < HEADER_LEN {
            return Err(StunError::ShortMessage(data.len()));
        }

        let raw_type = u16::from_be_bytes([data[0], data[1]]);
        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(StunError::InvalidMagicCookie(cookie));
        }
        if HEADER_LEN + declared > data.len() {
            return Err(StunError::LengthOverrun {
                declared,
                received: data.len(),
            });
        }
        let message_type =
            MessageType::from_u16(raw_type).ok_or(StunError::UnexpectedType(raw_type))?;

        let mut tid = [0u8; 12];
        tid.copy_from_slice(&data[8..HEADER_LEN]);

        let mut attributes = Vec::new();
        let end = HEADER_LEN + declared;
        let mut offset = HEADER_LEN;
        while offset + 4 <= end {
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let value_start = offset + 4;
            if value_start + attr_len > end {
                break;
            }
            if let Ok(attr) = Attribute::decode(attr_type, &data[value_start..value_start + attr_len])
            {
                attributes.push(attr);
            }
            offset = value_start + (attr_len + 3) / 4 * 4;
        }

        Ok(Self {
            message_type,
            transaction_id: TransactionId::from_bytes(tid),
            attributes,
        })
    }

    /// First XOR-MAPPED-ADDRESS, if present.
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// First XOR-RELAYED-ADDRESS, if present.
    pub fn xor_relayed_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::XorRelayedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// First XOR-PEER-ADDRESS, if present.
    pub fn xor_peer_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::XorPeerAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// ERROR-CODE as (code, reason), if present.
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::ErrorCode { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }

    pub fn realm(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Realm(realm) => Some(realm.as_str()),
            _ => None,
        })
    }

    pub fn nonce(&self) -> Option<&[u8]> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Nonce(nonce) => Some(nonce.as_slice()),
            _ => None,
        })
    }

    pub fn lifetime(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Lifetime(seconds) => Some(*seconds),
            _ => None,
        })
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Data(data) => Some(data.as_slice()),
            _ => None,
        })
    }
}

/// True when the leading byte carries the `01` ChannelData marker rather
/// than the `00` of a STUN header.
pub fn is_channel_data(data: &[u8]) -> bool {
    !data.is_empty() && data[0] & 0xC0 == 0x40
}

/// Frame a payload as `channel(2)|length(2)|payload`.
pub fn encode_channel_data(channel: u16, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u16(channel);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    buf
}

/// Strip a ChannelData header, returning the channel and payload.
pub fn decode_channel_data(data: &[u8]) -> Option<(u16, &[u8])> {
    if data.len() < 4 || !is_channel_data(data) {
        return None;
    }
    let channel = u16::from_be_bytes([data[0], data[1]]);
    let len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if 4 + len > data.len() {
        return None;
    }
    Some((channel, &data[4..4 + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut msg = Message::new(MessageType::BindingRequest);
        msg.add_attribute(Attribute::Username("alice".to_string()));
        let encoded = msg.encode().unwrap();

        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, MessageType::BindingRequest);
        assert_eq!(decoded.transaction_id, msg.transaction_id);
        assert_eq!(decoded.attributes, msg.attributes);
    }

    #[test]
    fn xor_mapped_address_round_trip() {
        let addr: SocketAddr = "203.0.113.5:41234".parse().unwrap();
        let mut msg = Message::new(MessageType::BindingSuccess);
        msg.add_attribute(Attribute::XorMappedAddress(addr));
        let encoded = msg.encode().unwrap();

        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.xor_mapped_address(), Some(addr));
        // The on-wire bytes must differ from the plain address.
        assert_ne!(encoded[26..28], addr.port().to_be_bytes());
    }

    #[test]
    fn attributes_are_padded_to_four_bytes() {
        let mut msg = Message::new(MessageType::AllocateRequest);
        msg.add_attribute(Attribute::Username("abcde".to_string()));
        msg.add_attribute(Attribute::Realm("r".to_string()));
        let encoded = msg.encode().unwrap();

        let declared = u16::from_be_bytes([encoded[2], encoded[3]]) as usize;
        assert_eq!(declared % 4, 0);
        assert_eq!(encoded.len(), HEADER_LEN + declared);

        // Each attribute starts on a 4-byte boundary.
        let mut offset = HEADER_LEN;
        while offset + 4 <= encoded.len() {
            assert_eq!((offset - HEADER_LEN) % 4, 0);
            let len = u16::from_be_bytes([encoded[offset + 2], encoded[offset + 3]]) as usize;
            offset += 4 + (len + 3) / 4 * 4;
        }
    }

    #[test]
    fn error_code_decodes_class_and_number() {
        let value = [0u8, 0, 0x04, 1, b'U', b'n', b'a', b'u', b't', b'h'];
        let attr = Attribute::decode(ATTR_ERROR_CODE, &value).unwrap();
        assert_eq!(
            attr,
            Attribute::ErrorCode {
                code: 401,
                reason: "Unauth".to_string()
            }
        );
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(matches!(
            Message::decode(&[0u8; 12]),
            Err(StunError::ShortMessage(12))
        ));
    }

    #[test]
    fn bad_cookie_is_rejected() {
        let mut msg = Message::new(MessageType::BindingSuccess).encode().unwrap();
        msg[4] = 0xFF;
        assert!(matches!(
            Message::decode(&msg),
            Err(StunError::InvalidMagicCookie(_))
        ));
    }

    #[test]
    fn declared_length_overrun_is_rejected() {
        let mut msg = Message::new(MessageType::BindingSuccess).encode().unwrap();
        msg[3] = 0x40;
        assert!(matches!(
            Message::decode(&msg),
            Err(StunError::LengthOverrun { .. })
        ));
    }

    #[test]
    fn truncated_attribute_ends_walk_silently() {
        let addr: SocketAddr = "192.0.2.1:1000".parse().unwrap();
        let mut msg = Message::new(MessageType::BindingSuccess);
        msg.add_attribute(Attribute::XorMappedAddress(addr));
        let mut encoded = msg.encode().unwrap().to_vec();

        // Claim a second attribute that is not actually there.
        encoded.extend_from_slice(&ATTR_USERNAME.to_be_bytes());
        encoded.extend_from_slice(&64u16.to_be_bytes());
        let total = (encoded.len() - HEADER_LEN) as u16;
        encoded[2..4].copy_from_slice(&total.to_be_bytes());

        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.attributes.len(), 1);
        assert_eq!(decoded.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn ill_formed_attribute_is_skipped_not_fatal() {
        let addr: SocketAddr = "203.0.113.5:41234".parse().unwrap();
        let mut msg = Message::new(MessageType::BindingSuccess);
        // An IPv6-family mapped address this agent does not speak...
        let mut v6_value = vec![0u8, 0x02, 0x12, 0x34];
        v6_value.extend_from_slice(&[0u8; 16]);
        msg.add_attribute(Attribute::Unknown {
            attr_type: ATTR_XOR_MAPPED_ADDRESS,
            value: v6_value,
        });
        // ...followed by the IPv4 one it wants.
        msg.add_attribute(Attribute::XorMappedAddress(addr));

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn unknown_attribute_is_preserved_raw() {
        let attr = Attribute::decode(0x8022, b"software").unwrap();
        assert_eq!(
            attr,
            Attribute::Unknown {
                attr_type: 0x8022,
                value: b"software".to_vec()
            }
        );
    }

    #[test]
    fn channel_data_round_trip() {
        let framed = encode_channel_data(0x4000, b"payload");
        assert!(is_channel_data(&framed));
        let (channel, payload) = decode_channel_data(&framed).unwrap();
        assert_eq!(channel, 0x4000);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn leading_bits_disambiguate_stun_from_channel_data() {
        let stun = Message::new(MessageType::BindingRequest).encode().unwrap();
        assert!(!is_channel_data(&stun));
        assert!(is_channel_data(&[0x40, 0x00, 0x00, 0x00]));
        assert!(!is_channel_data(&[0x80, 0x00, 0x00, 0x00]));
    }

    #[test]
    fn channel_data_length_overrun_is_rejected() {
        let mut framed = encode_channel_data(0x4001, b"abc").to_vec();
        framed[3] = 0x20;
        assert!(decode_channel_data(&framed).is_none());
    }

    #[test]
    fn ipv6_address_encode_is_refused() {
        let addr: SocketAddr = "[::1]:9000".parse().unwrap();
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_address(&mut buf, addr, true),
            Err(StunError::AddressFamily(0x02))
        ));
    }
}
