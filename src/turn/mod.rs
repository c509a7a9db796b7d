// src/turn/mod.rs
//! TURN relay client (RFC 5766) with long-term credentials.
//!
//! One `TurnClient` owns the persistent socket its allocation is bound to.
//! Control requests (Allocate, Refresh, CreatePermission, ChannelBind) are
//! bounded round-trips; relayed application data moves through
//! [`TurnClient::send_through`] / [`TurnClient::try_recv_through`] as
//! ChannelData frames once a channel is bound, or Send/Data indications
//! otherwise.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{IceError, IceResult, StunError, TurnError};
use crate::net;
use crate::stun::{
    append_message_integrity, decode_channel_data, encode_channel_data, is_channel_data,
    long_term_key, Attribute, Message, MessageType, TransactionId, STUN_DEFAULT_PORT,
    TRANSPORT_UDP,
};

/// Channel numbers are confined to this range by RFC 5766 Section 11.
pub const CHANNEL_MIN: u16 = 0x4000;
pub const CHANNEL_MAX: u16 = 0x7FFF;

/// Lifetime the server is assumed to grant until it says otherwise.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(600);

/// Wait window for TURN control responses.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Receive buffer for control responses.
const CONTROL_BUF_LEN: usize = 1024;

/// Receive buffer for relayed data.
const RELAY_BUF_LEN: usize = 2048;

/// TURN client bound to one server with one (at most) active allocation.
pub struct TurnClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    username: String,
    credential: String,
    realm: Option<String>,
    nonce: Option<Vec<u8>>,
    relay_addr: Option<SocketAddr>,
    lifetime: Duration,
    channel: Option<u16>,
    channel_peer: Option<SocketAddr>,
    active: bool,
}

impl TurnClient {
    /// Resolve `server` (`host[:port]`, default 3478) and bind the
    /// persistent relay socket.
    pub async fn connect(server: &str, username: &str, credential: &str) -> IceResult<Self> {
        let server_addr = net::resolve(server, STUN_DEFAULT_PORT).await?;
        let socket = net::bind_any().await?;
        Ok(Self {
            socket,
            server_addr,
            username: username.to_string(),
            credential: credential.to_string(),
            realm: None,
            nonce: None,
            relay_addr: None,
            lifetime: DEFAULT_LIFETIME,
            channel: None,
            channel_peer: None,
            active: false,
        })
    }

    /// The relayed transport address, once allocated.
    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.relay_addr
    }

    /// Server-granted allocation lifetime.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Whether an allocation is currently believed to be live.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Perform the two-phase Allocate exchange (RFC 5766 Section 6).
    ///
    /// Phase one carries USERNAME and REQUESTED-TRANSPORT only and expects
    /// a 401 challenge with REALM and NONCE. Phase two retries exactly once
    /// with the long-term credential MESSAGE-INTEGRITY; a second 401 is a
    /// hard failure rather than another round.
    pub async fn allocate(&mut self) -> IceResult<SocketAddr> {
        let request = self.build_allocate(false)?;
        let response = self.exchange(request).await?;

        match response.message_type {
            MessageType::AllocateSuccess => {
                // Server accepted without authentication; take it.
                return self.accept_allocation(&response);
            }
            MessageType::AllocateError => {
                let (code, reason) = response
                    .error_code()
                    .ok_or(StunError::MissingAttribute("ERROR-CODE"))?;
                if code != 401 {
                    return Err(TurnError::ErrorResponse {
                        code,
                        reason: reason.to_string(),
                    }
                    .into());
                }
                self.realm = Some(
                    response
                        .realm()
                        .ok_or(TurnError::IncompleteChallenge("REALM"))?
                        .to_string(),
                );
                self.nonce = Some(
                    response
                        .nonce()
                        .ok_or(TurnError::IncompleteChallenge("NONCE"))?
                        .to_vec(),
                );
                tracing::debug!(realm = ?self.realm, "TURN 401 challenge received");
            }
            other => return Err(StunError::UnexpectedType(other as u16).into()),
        }

        let request = self.build_allocate(true)?;
        let response = self.exchange(request).await?;
        match response.message_type {
            MessageType::AllocateSuccess => self.accept_allocation(&response),
            MessageType::AllocateError => {
                let (code, reason) = response.error_code().unwrap_or((0, ""));
                // One authenticated retry only; a repeated 401 means the
                // credentials are wrong, not that the nonce went stale.
                Err(TurnError::ErrorResponse {
                    code,
                    reason: reason.to_string(),
                }
                .into())
            }
            other => Err(StunError::UnexpectedType(other as u16).into()),
        }
    }

    /// Refresh the allocation (RFC 5766 Section 7). A 438/401 reply with a
    /// fresh nonce gets one authenticated retry, mirroring the allocate
    /// guard. On failure the allocation is marked inactive.
    pub async fn refresh(&mut self) -> IceResult<Duration> {
        if self.relay_addr.is_none() {
            return Err(TurnError::NotAllocated.into());
        }

        match self.refresh_once().await {
            Ok(lifetime) => Ok(lifetime),
            Err(IceError::Turn(TurnError::ErrorResponse { code, .. }))
                if code == 401 || code == 438 =>
            {
                tracing::debug!(code, "TURN refresh challenged, retrying with fresh nonce");
                match self.refresh_once().await {
                    Ok(lifetime) => Ok(lifetime),
                    Err(e) => {
                        self.active = false;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.active = false;
                Err(e)
            }
        }
    }

    async fn refresh_once(&mut self) -> IceResult<Duration> {
        let mut request = Message::new(MessageType::RefreshRequest);
        request.add_attribute(Attribute::Lifetime(self.lifetime.as_secs() as u32));
        let encoded = self.authenticate(request)?;

        self.socket.send_to(&encoded, self.server_addr).await?;
        let response = self.await_response(&encoded).await?;

        match response.message_type {
            MessageType::RefreshSuccess => {
                if let Some(seconds) = response.lifetime() {
                    self.lifetime = Duration::from_secs(u64::from(seconds));
                }
                self.active = true;
                tracing::debug!(lifetime = ?self.lifetime, "TURN allocation refreshed");
                Ok(self.lifetime)
            }
            MessageType::RefreshError => {
                let (code, reason) = response.error_code().unwrap_or((0, ""));
                if code == 438 || code == 401 {
                    if let Some(realm) = response.realm() {
                        self.realm = Some(realm.to_string());
                    }
                    if let Some(nonce) = response.nonce() {
                        self.nonce = Some(nonce.to_vec());
                    }
                }
                Err(TurnError::ErrorResponse {
                    code,
                    reason: reason.to_string(),
                }
                .into())
            }
            other => Err(StunError::UnexpectedType(other as u16).into()),
        }
    }

    /// Install a permission for `peer` (RFC 5766 Section 9).
    pub async fn create_permission(&mut self, peer: SocketAddr) -> IceResult<()> {
        if !self.active {
            return Err(TurnError::NotAllocated.into());
        }
        let mut request = Message::new(MessageType::CreatePermissionRequest);
        request.add_attribute(Attribute::XorPeerAddress(peer));
        let encoded = self.authenticate(request)?;

        self.socket.send_to(&encoded, self.server_addr).await?;
        let response = self.await_response(&encoded).await?;
        match response.message_type {
            MessageType::CreatePermissionSuccess => {
                tracing::debug!(%peer, "TURN permission installed");
                Ok(())
            }
            MessageType::CreatePermissionError => Err(TurnError::PermissionDenied(peer).into()),
            other => Err(StunError::UnexpectedType(other as u16).into()),
        }
    }

    /// Bind `channel` to `peer` (RFC 5766 Section 11), switching the data
    /// path to ChannelData framing.
    pub async fn channel_bind(&mut self, peer: SocketAddr, channel: u16) -> IceResult<()> {
        if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&channel) {
            return Err(TurnError::InvalidChannel(channel).into());
        }
        if !self.active {
            return Err(TurnError::NotAllocated.into());
        }

        let mut request = Message::new(MessageType::ChannelBindRequest);
        request.add_attribute(Attribute::ChannelNumber(channel));
        request.add_attribute(Attribute::XorPeerAddress(peer));
        let encoded = self.authenticate(request)?;

        self.socket.send_to(&encoded, self.server_addr).await?;
        let response = self.await_response(&encoded).await?;
        match response.message_type {
            MessageType::ChannelBindSuccess => {
                self.channel = Some(channel);
                self.channel_peer = Some(peer);
                tracing::debug!(channel, %peer, "TURN channel bound");
                Ok(())
            }
            MessageType::ChannelBindError => Err(TurnError::ChannelBindFailed(channel).into()),
            other => Err(StunError::UnexpectedType(other as u16).into()),
        }
    }

    /// Relay `data` to `peer`: ChannelData when the bound channel matches,
    /// a Send indication otherwise.
    pub async fn send_through(&self, peer: SocketAddr, data: &[u8]) -> IceResult<()> {
        if !self.active {
            return Err(TurnError::NotAllocated.into());
        }

        let framed = match (self.channel, self.channel_peer) {
            (Some(channel), Some(bound)) if bound == peer => {
                encode_channel_data(channel, data).to_vec()
            }
            _ => {
                let mut indication = Message::new(MessageType::SendIndication);
                indication.add_attribute(Attribute::XorPeerAddress(peer));
                indication.add_attribute(Attribute::Data(data.to_vec()));
                indication.encode()?.to_vec()
            }
        };

        let sent = self.socket.send_to(&framed, self.server_addr).await?;
        if sent != framed.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "partial relay send").into());
        }
        Ok(())
    }

    /// Poll the relay socket without blocking.
    ///
    /// Returns the peer and payload of one ChannelData frame or Data
    /// indication, `None` when nothing relevant is queued. Unrelated
    /// datagrams (stray control responses, unknown channels) are dropped.
    pub fn try_recv_through(&self) -> IceResult<Option<(SocketAddr, Vec<u8>)>> {
        let mut buf = [0u8; RELAY_BUF_LEN];
        loop {
            let (received, from) = match self.socket.try_recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if from != self.server_addr {
                continue;
            }
            let data = &buf[..received];

            if is_channel_data(data) {
                if let Some((channel, payload)) = decode_channel_data(data) {
                    if self.channel == Some(channel) {
                        let peer = self.channel_peer.unwrap_or(self.server_addr);
                        return Ok(Some((peer, payload.to_vec())));
                    }
                    tracing::debug!(channel, "dropping ChannelData for unbound channel");
                }
                continue;
            }

            if let Ok(message) = Message::decode(data) {
                if message.message_type == MessageType::DataIndication {
                    if let (Some(peer), Some(payload)) =
                        (message.xor_peer_address(), message.data())
                    {
                        return Ok(Some((peer, payload.to_vec())));
                    }
                }
            }
        }
    }

    /// Drop the allocation state. No lifetime-0 Refresh is sent; the
    /// server expires the allocation on its own clock.
    pub fn close(&mut self) {
        self.active = false;
        self.relay_addr = None;
        self.channel = None;
        self.channel_peer = None;
        self.realm = None;
        self.nonce = None;
    }

    fn build_allocate(&self, authenticated: bool) -> IceResult<Vec<u8>> {
        let mut request = Message::new(MessageType::AllocateRequest);
        request.add_attribute(Attribute::RequestedTransport(TRANSPORT_UDP));
        request.add_attribute(Attribute::Username(self.username.clone()));
        if !authenticated {
            return Ok(request.encode()?.to_vec());
        }
        self.authenticate(request)
    }

    /// Encode `request` with USERNAME/REALM/NONCE and MESSAGE-INTEGRITY.
    fn authenticate(&self, mut request: Message) -> IceResult<Vec<u8>> {
        let realm = self
            .realm
            .as_deref()
            .ok_or(TurnError::IncompleteChallenge("REALM"))?;
        let nonce = self
            .nonce
            .as_deref()
            .ok_or(TurnError::IncompleteChallenge("NONCE"))?;

        if !request
            .attributes
            .iter()
            .any(|a| matches!(a, Attribute::Username(_)))
        {
            request.add_attribute(Attribute::Username(self.username.clone()));
        }
        request.add_attribute(Attribute::Realm(realm.to_string()));
        request.add_attribute(Attribute::Nonce(nonce.to_vec()));

        let mut buf = request.encode()?;
        let key = long_term_key(&self.username, realm, &self.credential);
        append_message_integrity(&mut buf, &key);
        Ok(buf.to_vec())
    }

    /// Send an encoded request and await its response.
    async fn exchange(&self, encoded: Vec<u8>) -> IceResult<Message> {
        self.socket.send_to(&encoded, self.server_addr).await?;
        self.await_response(&encoded).await
    }

    /// Receive until a STUN message matching the request's transaction id
    /// arrives from the server, or the wait window closes.
    async fn await_response(&self, request: &[u8]) -> IceResult<Message> {
        let expected = TransactionId::from_bytes(
            request[8..20]
                .try_into()
                .map_err(|_| StunError::ShortMessage(request.len()))?,
        );

        let deadline = tokio::time::Instant::now() + REQUEST_TIMEOUT;
        let mut buf = [0u8; CONTROL_BUF_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(IceError::Timeout(REQUEST_TIMEOUT));
            }
            let (received, from) = net::recv_from_timeout(&self.socket, &mut buf, remaining)
                .await
                .map_err(|_| IceError::Timeout(REQUEST_TIMEOUT))?;
            if from != self.server_addr {
                continue;
            }
            let data = &buf[..received];
            if is_channel_data(data) {
                continue;
            }
            match Message::decode(data) {
                Ok(message) if message.transaction_id == expected => return Ok(message),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring undecodable datagram on relay socket");
                    continue;
                }
            }
        }
    }

    fn accept_allocation(&mut self, response: &Message) -> IceResult<SocketAddr> {
        let relay = response
            .xor_relayed_address()
            .ok_or(StunError::MissingAttribute("XOR-RELAYED-ADDRESS"))?;
        if let Some(seconds) = response.lifetime() {
            self.lifetime = Duration::from_secs(u64::from(seconds));
        }
        self.relay_addr = Some(relay);
        self.active = true;
        tracing::info!(%relay, lifetime = ?self.lifetime, "TURN allocation created");
        Ok(relay)
    }
}
