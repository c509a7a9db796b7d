// src/error.rs
//! Error types for the NAT traversal agent.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type for agent operations.
pub type IceResult<T> = Result<T, IceError>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum IceError {
    /// STUN-specific errors
    #[error("STUN error: {0}")]
    Stun(#[from] StunError),

    /// TURN-specific errors
    #[error("TURN error: {0}")]
    Turn(#[from] TurnError),

    /// Network I/O errors
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    /// Timed out waiting for a response
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration errors (unresolvable server, missing credentials)
    #[error("configuration error: {0}")]
    Config(String),
}

/// STUN protocol errors.
#[derive(Error, Debug)]
pub enum StunError {
    /// Buffer shorter than the 20-byte header
    #[error("message too short: {0} bytes")]
    ShortMessage(usize),

    /// Magic cookie mismatch
    #[error("invalid magic cookie: 0x{0:08X}")]
    InvalidMagicCookie(u32),

    /// Declared attribute length runs past the datagram
    #[error("declared length {declared} exceeds received {received} bytes")]
    LengthOverrun { declared: usize, received: usize },

    /// Response type other than the one the request expects
    #[error("unexpected message type: 0x{0:04X}")]
    UnexpectedType(u16),

    /// Response transaction id does not match the request
    #[error("transaction id mismatch")]
    TransactionMismatch,

    /// Address family other than IPv4 where IPv4 is required
    #[error("unsupported address family: 0x{0:02X}")]
    AddressFamily(u8),

    /// A required attribute was absent
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// No response from the server within the wait window
    #[error("no response from {0}")]
    NoResponse(SocketAddr),
}

/// TURN client errors.
#[derive(Error, Debug)]
pub enum TurnError {
    /// Server error response that the client cannot authenticate past
    /// (non-401, or 401 after the single authenticated retry)
    #[error("server error {code}: {reason}")]
    ErrorResponse { code: u16, reason: String },

    /// 401 challenge without REALM or NONCE
    #[error("unauthenticated challenge missing {0}")]
    IncompleteChallenge(&'static str),

    /// Operation requires an active allocation
    #[error("no active allocation")]
    NotAllocated,

    /// Channel number outside 0x4000..=0x7FFF
    #[error("invalid channel number: 0x{0:04X}")]
    InvalidChannel(u16),

    /// CreatePermission rejected
    #[error("permission denied for peer {0}")]
    PermissionDenied(SocketAddr),

    /// ChannelBind rejected
    #[error("failed to bind channel 0x{0:04X}")]
    ChannelBindFailed(u16),
}
