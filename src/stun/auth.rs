// src/stun/auth.rs
//! Long-term credential authentication (RFC 5389 Sections 10.2 and 15.4).

use bytes::{BufMut, BytesMut};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use super::message::{ATTR_MESSAGE_INTEGRITY, HEADER_LEN};

type HmacSha1 = Hmac<Sha1>;

/// Derive the long-term credential key: MD5 of `username:realm:password`.
pub fn long_term_key(username: &str, realm: &str, password: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(format!("{username}:{realm}:{password}").as_bytes());
    hasher.finalize().into()
}

/// Append a MESSAGE-INTEGRITY attribute to an encoded message.
///
/// Per RFC 5389 Section 15.4 the header length is rewritten, before the
/// HMAC runs, to cover everything up to and including the integrity
/// attribute (current attribute bytes + 4 header + 20 value). The HMAC
/// covers the adjusted header and all bytes preceding the attribute, and
/// the length field keeps the adjusted value afterwards.
pub fn append_message_integrity(buf: &mut BytesMut, key: &[u8]) {
    let integrity_len = (buf.len() - HEADER_LEN + 24) as u16;
    buf[2..4].copy_from_slice(&integrity_len.to_be_bytes());

    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(buf);
    let hmac = mac.finalize().into_bytes();

    buf.put_u16(ATTR_MESSAGE_INTEGRITY);
    buf.put_u16(20);
    buf.put_slice(&hmac);
}

/// Verify the MESSAGE-INTEGRITY attribute of a raw message.
///
/// Walks the attributes to locate the integrity attribute, recomputes the
/// HMAC over a copy whose length field is adjusted as on send, and compares.
pub fn verify_message_integrity(raw: &[u8], key: &[u8]) -> bool {
    let Some(mi_offset) = find_integrity_offset(raw) else {
        return false;
    };
    if mi_offset + 24 > raw.len() {
        return false;
    }

    let mut covered = raw[..mi_offset].to_vec();
    let adjusted = (mi_offset - HEADER_LEN + 24) as u16;
    covered[2..4].copy_from_slice(&adjusted.to_be_bytes());

    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&covered);
    mac.verify_slice(&raw[mi_offset + 4..mi_offset + 24]).is_ok()
}

/// Byte offset of the MESSAGE-INTEGRITY attribute header, if any.
fn find_integrity_offset(raw: &[u8]) -> Option<usize> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let mut offset = HEADER_LEN;
    while offset + 4 <= raw.len() {
        let attr_type = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
        let attr_len = u16::from_be_bytes([raw[offset + 2], raw[offset + 3]]) as usize;
        if attr_type == ATTR_MESSAGE_INTEGRITY {
            return Some(offset);
        }
        offset += 4 + (attr_len + 3) / 4 * 4;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::message::{Attribute, Message, MessageType};

    #[test]
    fn long_term_key_is_sixteen_bytes_and_credential_sensitive() {
        let key = long_term_key("user", "realm", "pass");
        assert_eq!(key.len(), 16);
        assert_ne!(key, long_term_key("user", "realm", "other"));
        assert_ne!(key, long_term_key("user", "other", "pass"));
    }

    #[test]
    fn integrity_length_stays_adjusted_after_hmac() {
        let mut msg = Message::new(MessageType::AllocateRequest);
        msg.add_attribute(Attribute::Username("u".to_string()));
        let mut buf = msg.encode().unwrap();
        let plain_len = buf.len();

        let key = long_term_key("u", "r", "p");
        append_message_integrity(&mut buf, &key);

        assert_eq!(buf.len(), plain_len + 24);
        let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        // With MESSAGE-INTEGRITY last, the adjusted value equals the real
        // attribute length, and it must not be rewritten afterwards.
        assert_eq!(declared, buf.len() - HEADER_LEN);
        assert_eq!(declared, plain_len - HEADER_LEN + 24);
    }

    #[test]
    fn integrity_round_trip_verifies() {
        let mut msg = Message::new(MessageType::AllocateRequest);
        msg.add_attribute(Attribute::Username("alice".to_string()));
        msg.add_attribute(Attribute::Realm("example.org".to_string()));
        let mut buf = msg.encode().unwrap();

        let key = long_term_key("alice", "example.org", "wonderland");
        append_message_integrity(&mut buf, &key);

        assert!(verify_message_integrity(&buf, &key));
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut msg = Message::new(MessageType::AllocateRequest);
        msg.add_attribute(Attribute::Username("alice".to_string()));
        let mut buf = msg.encode().unwrap();
        let key = long_term_key("alice", "r", "p");
        append_message_integrity(&mut buf, &key);

        let mut tampered = buf.to_vec();
        tampered[24] ^= 0x01;
        assert!(!verify_message_integrity(&tampered, &key));
        assert!(!verify_message_integrity(&buf, b"wrong key"));
    }

    #[test]
    fn missing_integrity_fails_verification() {
        let buf = Message::new(MessageType::AllocateRequest).encode().unwrap();
        assert!(!verify_message_integrity(&buf, b"key"));
    }
}
