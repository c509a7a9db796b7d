//! Loopback mock TURN server shared by the integration tests.
//!
//! Implements just enough of RFC 5766 to exercise the client: the 401
//! challenge dance with real MESSAGE-INTEGRITY validation, Allocate,
//! Refresh, CreatePermission, ChannelBind, Send indications and
//! bidirectional ChannelData relaying for a single client.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use icefall::stun::{
    decode_channel_data, encode_channel_data, is_channel_data, long_term_key,
    verify_message_integrity, Attribute, Message, MessageType,
};
use tokio::net::UdpSocket;

pub const TEST_REALM: &str = "icefall.test";
pub const TEST_NONCE: &[u8] = b"f00dfaceb00c";
pub const TEST_LIFETIME: u32 = 600;

/// Counters and addresses of a running mock server.
pub struct MockTurn {
    pub control_addr: SocketAddr,
    pub relay_addr: SocketAddr,
    pub allocate_requests: Arc<AtomicUsize>,
    pub refresh_requests: Arc<AtomicUsize>,
}

impl MockTurn {
    pub fn allocates(&self) -> usize {
        self.allocate_requests.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_requests.load(Ordering::SeqCst)
    }
}

/// Spawn a mock accepting `username`/`password`. With `always_401` every
/// Allocate is challenged, authenticated or not.
pub async fn spawn_mock_turn(username: &str, password: &str, always_401: bool) -> MockTurn {
    let control = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let control_addr = control.local_addr().unwrap();
    let relay_addr = relay.local_addr().unwrap();

    let allocate_requests = Arc::new(AtomicUsize::new(0));
    let refresh_requests = Arc::new(AtomicUsize::new(0));

    let key = long_term_key(username, TEST_REALM, password);
    let state = ServerState {
        control,
        relay,
        relay_addr,
        key,
        always_401,
        allocate_requests: allocate_requests.clone(),
        refresh_requests: refresh_requests.clone(),
        client: None,
        permissions: HashSet::new(),
        channels: HashMap::new(),
        peers: HashMap::new(),
    };
    tokio::spawn(state.run());

    MockTurn {
        control_addr,
        relay_addr,
        allocate_requests,
        refresh_requests,
    }
}

struct ServerState {
    control: UdpSocket,
    relay: UdpSocket,
    relay_addr: SocketAddr,
    key: [u8; 16],
    always_401: bool,
    allocate_requests: Arc<AtomicUsize>,
    refresh_requests: Arc<AtomicUsize>,
    client: Option<SocketAddr>,
    permissions: HashSet<IpAddr>,
    channels: HashMap<u16, SocketAddr>,
    peers: HashMap<SocketAddr, u16>,
}

impl ServerState {
    async fn run(mut self) {
        let mut control_buf = [0u8; 2048];
        let mut relay_buf = [0u8; 2048];
        loop {
            tokio::select! {
                received = self.control.recv_from(&mut control_buf) => {
                    let Ok((n, from)) = received else { return };
                    let data = control_buf[..n].to_vec();
                    self.handle_control(&data, from).await;
                }
                received = self.relay.recv_from(&mut relay_buf) => {
                    let Ok((n, from)) = received else { return };
                    let data = relay_buf[..n].to_vec();
                    self.handle_peer(&data, from).await;
                }
            }
        }
    }

    async fn handle_control(&mut self, data: &[u8], from: SocketAddr) {
        if is_channel_data(data) {
            if let Some((channel, payload)) = decode_channel_data(data) {
                if let Some(peer) = self.channels.get(&channel) {
                    let _ = self.relay.send_to(payload, *peer).await;
                }
            }
            return;
        }

        let Ok(request) = Message::decode(data) else {
            return;
        };
        let authenticated = !self.always_401 && verify_message_integrity(data, &self.key);

        match request.message_type {
            MessageType::AllocateRequest => {
                self.allocate_requests.fetch_add(1, Ordering::SeqCst);
                if !authenticated {
                    self.send_challenge(MessageType::AllocateError, &request, from)
                        .await;
                    return;
                }
                self.client = Some(from);
                let mut response =
                    Message::with_transaction(MessageType::AllocateSuccess, request.transaction_id);
                response.add_attribute(Attribute::XorRelayedAddress(self.relay_addr));
                response.add_attribute(Attribute::XorMappedAddress(from));
                response.add_attribute(Attribute::Lifetime(TEST_LIFETIME));
                self.send(response, from).await;
            }
            MessageType::RefreshRequest => {
                if !authenticated {
                    self.send_challenge(MessageType::RefreshError, &request, from)
                        .await;
                    return;
                }
                self.refresh_requests.fetch_add(1, Ordering::SeqCst);
                let mut response =
                    Message::with_transaction(MessageType::RefreshSuccess, request.transaction_id);
                response.add_attribute(Attribute::Lifetime(TEST_LIFETIME));
                self.send(response, from).await;
            }
            MessageType::CreatePermissionRequest => {
                if !authenticated {
                    self.send_challenge(MessageType::CreatePermissionError, &request, from)
                        .await;
                    return;
                }
                if let Some(peer) = request.xor_peer_address() {
                    self.permissions.insert(peer.ip());
                }
                let response = Message::with_transaction(
                    MessageType::CreatePermissionSuccess,
                    request.transaction_id,
                );
                self.send(response, from).await;
            }
            MessageType::ChannelBindRequest => {
                if !authenticated {
                    self.send_challenge(MessageType::ChannelBindError, &request, from)
                        .await;
                    return;
                }
                let channel = request.attributes.iter().find_map(|a| match a {
                    Attribute::ChannelNumber(c) => Some(*c),
                    _ => None,
                });
                if let (Some(channel), Some(peer)) = (channel, request.xor_peer_address()) {
                    self.channels.insert(channel, peer);
                    self.peers.insert(peer, channel);
                    self.permissions.insert(peer.ip());
                }
                let response = Message::with_transaction(
                    MessageType::ChannelBindSuccess,
                    request.transaction_id,
                );
                self.send(response, from).await;
            }
            MessageType::SendIndication => {
                if let (Some(peer), Some(payload)) = (request.xor_peer_address(), request.data()) {
                    if self.permissions.contains(&peer.ip()) {
                        let _ = self.relay.send_to(payload, peer).await;
                    }
                }
            }
            _ => {}
        }
    }

    /// A datagram from a peer arrives on the relay address: wrap it as
    /// ChannelData when a channel is bound, as a Data indication when only
    /// a permission exists.
    async fn handle_peer(&mut self, data: &[u8], from: SocketAddr) {
        let Some(client) = self.client else { return };

        if let Some(channel) = self.peers.get(&from) {
            let framed = encode_channel_data(*channel, data);
            let _ = self.control.send_to(&framed, client).await;
            return;
        }
        if self.permissions.contains(&from.ip()) {
            let mut indication = Message::new(MessageType::DataIndication);
            indication.add_attribute(Attribute::XorPeerAddress(from));
            indication.add_attribute(Attribute::Data(data.to_vec()));
            let encoded = indication.encode().unwrap();
            let _ = self.control.send_to(&encoded, client).await;
        }
    }

    async fn send(&self, message: Message, to: SocketAddr) {
        let encoded = message.encode().unwrap();
        let _ = self.control.send_to(&encoded, to).await;
    }

    async fn send_challenge(&self, error_type: MessageType, request: &Message, to: SocketAddr) {
        let mut response = Message::with_transaction(error_type, request.transaction_id);
        response.add_attribute(Attribute::ErrorCode {
            code: 401,
            reason: "Unauthorized".to_string(),
        });
        response.add_attribute(Attribute::Realm(TEST_REALM.to_string()));
        response.add_attribute(Attribute::Nonce(TEST_NONCE.to_vec()));
        self.send(response, to).await;
    }
}
