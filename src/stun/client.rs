// src/stun/client.rs
//! STUN binding client: discover the public mapping of a UDP socket.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{IceResult, StunError};
use crate::net;

use super::message::{Message, MessageType};

/// Default STUN port.
pub const STUN_DEFAULT_PORT: u16 = 3478;

/// Receive buffer for binding responses.
const RESPONSE_BUF_LEN: usize = 1024;

/// Minimal STUN client issuing binding requests over transient sockets.
#[derive(Debug, Clone)]
pub struct StunClient {
    /// How long to wait for a binding response.
    pub request_timeout: Duration,
}

impl Default for StunClient {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl StunClient {
    /// Ask `server` (`host[:port]`, port defaulting to 3478) for our
    /// public address.
    ///
    /// One request, one response: a transient socket sends a bare Binding
    /// Request and the first well-formed IPv4 XOR-MAPPED-ADDRESS in a
    /// matching Binding Success wins. The socket drops on every exit path.
    pub async fn probe(&self, server: &str) -> IceResult<SocketAddr> {
        let server_addr = net::resolve(server, STUN_DEFAULT_PORT).await?;
        let socket = net::bind_any().await?;

        let request = Message::new(MessageType::BindingRequest);
        let encoded = request.encode()?;
        socket.send_to(&encoded, server_addr).await?;

        let mut buf = [0u8; RESPONSE_BUF_LEN];
        let (received, from) =
            net::recv_from_timeout(&socket, &mut buf, self.request_timeout).await?;
        if from != server_addr {
            tracing::debug!(%from, expected = %server_addr, "binding response from unexpected address");
            return Err(StunError::NoResponse(server_addr).into());
        }

        let response = Message::decode(&buf[..received])?;
        if response.message_type != MessageType::BindingSuccess {
            return Err(StunError::UnexpectedType(response.message_type as u16).into());
        }
        if response.transaction_id != request.transaction_id {
            return Err(StunError::TransactionMismatch.into());
        }

        let mapped = response
            .xor_mapped_address()
            .ok_or(StunError::MissingAttribute("XOR-MAPPED-ADDRESS"))?;
        tracing::debug!(server, public = %mapped, "binding probe succeeded");
        Ok(mapped)
    }
}
