// src/stun/mod.rs
//! STUN wire codec, long-term credential crypto and binding client.

pub mod auth;
pub mod client;
pub mod message;

pub use auth::{append_message_integrity, long_term_key, verify_message_integrity};
pub use client::{StunClient, STUN_DEFAULT_PORT};
pub use message::{
    decode_channel_data, encode_channel_data, is_channel_data, Attribute, Message, MessageType,
    TransactionId, HEADER_LEN, MAGIC_COOKIE, TRANSPORT_UDP,
};
