// src/ice/agent.rs
//! The NAT traversal agent: candidate gathering, pair selection, the
//! direct-first / relay-fallback connection state machine, handshake and
//! the connected data path.
//!
//! The agent spawns no tasks of its own. Gathering and TURN control
//! requests are bounded awaited round-trips; everything else is driven by
//! [`IceAgent::tick`], which accumulates the caller's delta time so tests
//! can run on simulated clocks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::net::UdpSocket;

use crate::config::AgentConfig;
use crate::net;
use crate::turn::{TurnClient, CHANNEL_MIN};

use super::candidate::{select_pair, Candidate, CandidateType, PairStage};
use super::gathering;
use super::handshake::{Hello, HelloKind};

/// Direct attempts before falling back to the relay stage.
pub const MAX_DIRECT_ATTEMPTS: u32 = 3;

/// Total attempt budget across both stages.
pub const MAX_TOTAL_ATTEMPTS: u32 = 10;

/// Seconds between connection attempts.
pub const RETRY_DELAY: f32 = 1.0;

/// Seconds before an unanswered handshake fails the connection.
pub const HANDSHAKE_TIMEOUT: f32 = 5.0;

/// Seconds between hello retransmissions.
pub const HANDSHAKE_RETRY_INTERVAL: f32 = 1.0;

/// The allocation is refreshed at this fraction of its lifetime.
const REFRESH_FRACTION: f32 = 0.8;

/// A failed refresh retries this many seconds earlier than the schedule.
const REFRESH_RETRY_SLACK: f32 = 30.0;

/// Receive buffer for the direct data socket.
const DATA_BUF_LEN: usize = 2048;

/// Connection state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Gathering,
    ConnectingDirect,
    ConnectingRelay,
    PerformingHandshake,
    Connected,
    Failed,
}

/// Subscriber invoked synchronously on every state transition.
pub type StateListener = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// A single NAT traversal endpoint.
pub struct IceAgent {
    config: AgentConfig,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    selected_local: Option<Candidate>,
    selected_remote: Option<Candidate>,
    socket: Option<UdpSocket>,
    turn: Option<TurnClient>,
    direct_attempts: u32,
    total_attempts: u32,
    since_last_attempt: f32,
    handshake_elapsed: f32,
    since_last_hello: f32,
    refresh_elapsed: f32,
    refresh_failed: bool,
    hello_sent: bool,
    hello_received: bool,
    listeners: Mutex<Vec<StateListener>>,
}

impl IceAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::New),
            connected: AtomicBool::new(false),
            local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            selected_local: None,
            selected_remote: None,
            socket: None,
            turn: None,
            direct_attempts: 0,
            total_attempts: 0,
            since_last_attempt: 0.0,
            handshake_elapsed: 0.0,
            since_last_hello: 0.0,
            refresh_elapsed: 0.0,
            refresh_failed: false,
            hello_sent: false,
            hello_received: false,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Current connection state.
    pub fn get_connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Cheap connected check for hot paths.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Register a state-change subscriber.
    pub fn on_state_change(&self, listener: StateListener) {
        self.listeners.lock().push(listener);
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            tracing::info!(from = ?*state, to = ?next, "connection state change");
            *state = next;
        }
        self.connected
            .store(next == ConnectionState::Connected, Ordering::Release);
        for listener in self.listeners.lock().iter() {
            listener(next);
        }
    }

    /// Gather host, server-reflexive and relayed candidates.
    ///
    /// Returns true when at least one candidate was gathered. The host
    /// candidate's socket is bound here, so its advertised port is final
    /// before candidates go out through signaling.
    pub async fn gather_candidates(&mut self) -> bool {
        self.set_state(ConnectionState::Gathering);
        self.local_candidates.clear();

        match gathering::gather(&self.config).await {
            Ok(outcome) => {
                self.local_candidates = outcome.candidates;
                self.socket = outcome.host_socket;
                if let Some(turn) = outcome.turn_client {
                    self.refresh_elapsed = 0.0;
                    self.refresh_failed = false;
                    self.turn = Some(turn);
                }
                tracing::info!(count = self.local_candidates.len(), "gathered candidates");
                !self.local_candidates.is_empty()
            }
            Err(e) => {
                tracing::warn!(error = %e, "candidate gathering failed");
                false
            }
        }
    }

    pub fn get_local_candidates(&self) -> Vec<Candidate> {
        self.local_candidates.clone()
    }

    pub fn add_remote_candidate(&mut self, candidate: Candidate) {
        tracing::debug!(candidate = %candidate, "adding remote candidate");
        self.remote_candidates.push(candidate);
    }

    /// Begin connectivity checks over the exchanged candidates.
    ///
    /// No-op success when already connected. Returns false, without
    /// touching state, when the connection is failed or either candidate
    /// list is empty. Otherwise enters the direct stage and attempts
    /// immediately.
    pub async fn start_connectivity_checks(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        if self.get_connection_state() == ConnectionState::Failed {
            tracing::warn!("connection is failed; close() before retrying");
            return false;
        }
        if self.local_candidates.is_empty() || self.remote_candidates.is_empty() {
            tracing::warn!("connectivity checks need local and remote candidates");
            return false;
        }

        self.direct_attempts = 0;
        self.total_attempts = 0;
        self.since_last_attempt = 0.0;
        self.hello_sent = false;
        self.hello_received = false;
        self.set_state(ConnectionState::ConnectingDirect);
        self.attempt_connection().await;
        true
    }

    /// Drive timers: connection retries, handshake retransmission and
    /// timeout, inbound polling, TURN refresh.
    pub async fn tick(&mut self, dt: f32) {
        match self.get_connection_state() {
            ConnectionState::ConnectingDirect | ConnectionState::ConnectingRelay => {
                self.since_last_attempt += dt;
                if self.since_last_attempt >= RETRY_DELAY {
                    self.attempt_connection().await;
                }
            }
            ConnectionState::PerformingHandshake => {
                self.handshake_elapsed += dt;
                self.since_last_hello += dt;
                self.poll_handshake().await;

                if self.hello_sent && self.hello_received {
                    self.set_state(ConnectionState::Connected);
                } else if self.handshake_elapsed >= HANDSHAKE_TIMEOUT {
                    tracing::warn!("handshake timed out");
                    self.set_state(ConnectionState::Failed);
                } else if !self.hello_received && self.since_last_hello >= HANDSHAKE_RETRY_INTERVAL
                {
                    self.since_last_hello = 0.0;
                    if let Err(e) = self.send_hello(HelloKind::Request).await {
                        tracing::debug!(error = %e, "hello retransmission failed");
                    }
                }
            }
            // Connected: the data socket belongs to receive_data, which
            // answers late hello requests itself.
            _ => {}
        }

        self.tick_turn_refresh(dt).await;
    }

    /// Send application data over the established path.
    pub async fn send_data(&mut self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(remote) = self.selected_remote.clone() else {
            return false;
        };
        let remote_addr = SocketAddr::new(remote.address, remote.port);

        if self.relay_path_active() {
            if let Some(turn) = self.turn.as_ref() {
                return match turn.send_through(remote_addr, data).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "relay send failed");
                        false
                    }
                };
            }
            return false;
        }

        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        match socket.send_to(data, remote_addr).await {
            Ok(sent) if sent == data.len() => true,
            Ok(sent) => {
                tracing::warn!(sent, expected = data.len(), "partial send");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                false
            }
        }
    }

    /// Poll for one application datagram. Handshake packets are consumed
    /// internally (requests still get answered) and never surface here.
    pub async fn receive_data(&mut self) -> Option<Vec<u8>> {
        if !self.is_connected() {
            return None;
        }

        loop {
            let (payload, from) = self.poll_datagram()?;
            if let Some(hello) = Hello::decode(&payload) {
                self.handle_hello(hello, from).await;
                continue;
            }
            return Some(payload);
        }
    }

    /// Tear everything down and return to `New`. Idempotent.
    ///
    /// The TURN allocation is dropped without a lifetime-0 refresh; the
    /// server expires it on its own schedule.
    pub fn close(&mut self) {
        if let Some(mut turn) = self.turn.take() {
            turn.close();
        }
        self.socket = None;
        self.local_candidates.clear();
        self.remote_candidates.clear();
        self.selected_local = None;
        self.selected_remote = None;
        self.direct_attempts = 0;
        self.total_attempts = 0;
        self.since_last_attempt = 0.0;
        self.handshake_elapsed = 0.0;
        self.since_last_hello = 0.0;
        self.refresh_elapsed = 0.0;
        self.refresh_failed = false;
        self.hello_sent = false;
        self.hello_received = false;
        self.set_state(ConnectionState::New);
    }

    // ---- connection attempts -------------------------------------------

    async fn attempt_connection(&mut self) {
        self.since_last_attempt = 0.0;

        if self.total_attempts >= MAX_TOTAL_ATTEMPTS {
            tracing::warn!(attempts = self.total_attempts, "attempt budget exhausted");
            self.set_state(ConnectionState::Failed);
            return;
        }
        self.total_attempts += 1;

        let stage = match self.get_connection_state() {
            ConnectionState::ConnectingDirect => {
                self.direct_attempts += 1;
                PairStage::Direct
            }
            ConnectionState::ConnectingRelay => PairStage::Relay,
            _ => return,
        };

        match select_pair(&self.local_candidates, &self.remote_candidates, stage) {
            Some((local, remote)) => {
                tracing::debug!(local = %local, remote = %remote, "selected candidate pair");
                self.selected_local = Some(local);
                self.selected_remote = Some(remote);
                if self.establish_path().await {
                    self.hello_sent = true;
                    self.hello_received = false;
                    self.handshake_elapsed = 0.0;
                    self.since_last_hello = 0.0;
                    self.set_state(ConnectionState::PerformingHandshake);
                    return;
                }
            }
            None => {
                tracing::debug!(?stage, "no eligible candidate pair");
            }
        }

        self.after_failed_attempt(stage);
    }

    fn after_failed_attempt(&mut self, stage: PairStage) {
        if stage == PairStage::Direct && self.direct_attempts >= MAX_DIRECT_ATTEMPTS {
            tracing::info!("direct attempts exhausted, falling back to relay");
            self.set_state(ConnectionState::ConnectingRelay);
        }
        if self.total_attempts >= MAX_TOTAL_ATTEMPTS {
            self.set_state(ConnectionState::Failed);
        }
    }

    /// Bind the data path for the selected pair and send the first hello.
    async fn establish_path(&mut self) -> bool {
        let Some(local) = self.selected_local.clone() else {
            return false;
        };
        let Some(remote) = self.selected_remote.clone() else {
            return false;
        };
        let remote_addr = SocketAddr::new(remote.address, remote.port);

        // Replace the data socket: the host candidate keeps its advertised
        // addr:port, reflexive/relayed paths take a fresh wildcard port.
        let bind_addr = match local.candidate_type {
            CandidateType::Host => SocketAddr::new(local.address, local.port),
            _ => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };
        self.socket = None;
        let socket = match net::bind_data_socket(bind_addr) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(%bind_addr, error = %e, "data socket bind failed");
                return false;
            }
        };
        if let Ok(bound) = socket.local_addr() {
            self.propagate_bound_port(bound.port());
        }
        self.socket = Some(socket);

        if local.candidate_type == CandidateType::Relayed {
            let Some(turn) = self.turn.as_mut() else {
                tracing::warn!("relayed candidate selected without a TURN allocation");
                return false;
            };
            if let Err(e) = turn.create_permission(remote_addr).await {
                tracing::warn!(error = %e, "TURN permission failed");
                return false;
            }
            if let Err(e) = turn.channel_bind(remote_addr, CHANNEL_MIN).await {
                tracing::warn!(error = %e, "TURN channel bind failed");
                return false;
            }
        }

        match self.send_hello(HelloKind::Request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "initial hello failed");
                false
            }
        }
    }

    /// Propagate an OS-assigned port into candidates still carrying the
    /// unbound marker. Bound ports are immutable.
    fn propagate_bound_port(&mut self, port: u16) {
        if let Some(local) = self.selected_local.as_mut() {
            if local.port == 0 {
                local.port = port;
            }
        }
        for candidate in &mut self.local_candidates {
            if candidate.port == 0 {
                candidate.port = port;
            }
        }
    }

    // ---- handshake ------------------------------------------------------

    fn relay_path_active(&self) -> bool {
        self.selected_local
            .as_ref()
            .map(|l| l.candidate_type == CandidateType::Relayed)
            .unwrap_or(false)
            && self.turn.as_ref().map(TurnClient::is_active).unwrap_or(false)
    }

    fn unix_timestamp() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }

    async fn send_hello(&mut self, kind: HelloKind) -> crate::error::IceResult<()> {
        let Some(remote) = self.selected_remote.clone() else {
            return Ok(());
        };
        let remote_addr = SocketAddr::new(remote.address, remote.port);
        let hello = match kind {
            HelloKind::Request => Hello::request(Self::unix_timestamp()),
            HelloKind::Response => Hello::response(Self::unix_timestamp()),
        };
        let packet = hello.encode();

        if self.relay_path_active() {
            if let Some(turn) = self.turn.as_ref() {
                turn.send_through(remote_addr, &packet).await?;
            }
        } else if let Some(socket) = self.socket.as_ref() {
            socket.send_to(&packet, remote_addr).await?;
        }
        Ok(())
    }

    /// Drain queued datagrams, handling hellos and discarding the rest
    /// (pre-connection, nothing else is expected on this socket).
    async fn poll_handshake(&mut self) {
        while let Some((payload, from)) = self.poll_datagram() {
            if let Some(hello) = Hello::decode(&payload) {
                self.handle_hello(hello, from).await;
            }
        }
    }

    async fn handle_hello(&mut self, hello: Hello, from: SocketAddr) {
        tracing::debug!(kind = ?hello.kind, %from, "hello received");
        self.hello_received = true;
        if hello.kind == HelloKind::Request {
            if let Err(e) = self.send_hello(HelloKind::Response).await {
                tracing::debug!(error = %e, "hello response failed");
            }
        }
    }

    /// Non-blocking receive from whichever path is selected.
    fn poll_datagram(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        if self.relay_path_active() {
            let turn = self.turn.as_ref()?;
            return match turn.try_recv_through() {
                Ok(Some((peer, payload))) => Some((payload, peer)),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "relay receive failed");
                    None
                }
            };
        }

        let socket = self.socket.as_ref()?;
        let mut buf = [0u8; DATA_BUF_LEN];
        match socket.try_recv_from(&mut buf) {
            Ok((received, from)) => Some((buf[..received].to_vec(), from)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::debug!(error = %e, "receive failed");
                None
            }
        }
    }

    // ---- TURN refresh ---------------------------------------------------

    async fn tick_turn_refresh(&mut self, dt: f32) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.relay_addr().is_none() {
            return;
        }

        self.refresh_elapsed += dt;
        let lifetime = turn.lifetime().as_secs_f32();
        let threshold = if self.refresh_failed {
            (lifetime * REFRESH_FRACTION - REFRESH_RETRY_SLACK).max(1.0)
        } else {
            lifetime * REFRESH_FRACTION
        };
        if self.refresh_elapsed < threshold {
            return;
        }

        self.refresh_elapsed = 0.0;
        match turn.refresh().await {
            Ok(lifetime) => {
                self.refresh_failed = false;
                tracing::debug!(?lifetime, "TURN refresh ok");
            }
            Err(e) => {
                self.refresh_failed = true;
                tracing::warn!(error = %e, "TURN refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn loopback_config() -> AgentConfig {
        AgentConfig {
            stun_servers: Vec::new(),
            bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..Default::default()
        }
    }

    #[test]
    fn new_agent_starts_in_new_state() {
        let agent = IceAgent::new(loopback_config());
        assert_eq!(agent.get_connection_state(), ConnectionState::New);
        assert!(!agent.is_connected());
    }

    #[tokio::test]
    async fn checks_refuse_to_start_without_candidates() {
        let mut agent = IceAgent::new(loopback_config());
        assert!(!agent.start_connectivity_checks().await);
        assert_eq!(agent.get_connection_state(), ConnectionState::New);

        assert!(agent.gather_candidates().await);
        // Still no remote candidates.
        assert!(!agent.start_connectivity_checks().await);
        assert_eq!(agent.get_connection_state(), ConnectionState::Gathering);
    }

    #[tokio::test]
    async fn send_and_receive_refuse_when_disconnected() {
        let mut agent = IceAgent::new(loopback_config());
        assert!(!agent.send_data(b"ping").await);
        assert!(agent.receive_data().await.is_none());
    }

    #[tokio::test]
    async fn close_resets_everything_and_is_idempotent() {
        let mut agent = IceAgent::new(loopback_config());
        assert!(agent.gather_candidates().await);
        agent.add_remote_candidate(Candidate::host(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            65000,
        ));
        assert!(agent.start_connectivity_checks().await);

        agent.close();
        assert_eq!(agent.get_connection_state(), ConnectionState::New);
        assert!(agent.get_local_candidates().is_empty());
        assert!(agent.remote_candidates.is_empty());
        assert!(agent.socket.is_none());
        assert!(agent.turn.is_none());
        assert_eq!(agent.total_attempts, 0);
        assert_eq!(agent.handshake_elapsed, 0.0);

        agent.close();
        assert_eq!(agent.get_connection_state(), ConnectionState::New);
    }

    #[tokio::test]
    async fn state_listeners_fire_on_transitions() {
        let mut agent = IceAgent::new(loopback_config());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        agent.on_state_change(Box::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(agent.gather_candidates().await);
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn direct_attempts_decay_into_relay_stage_then_fail() {
        let mut agent = IceAgent::new(loopback_config());
        assert!(agent.gather_candidates().await);
        // Only a relayed remote: the direct stage can never pair.
        agent.add_remote_candidate(Candidate::relayed(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            65001,
            None,
        ));

        assert!(agent.start_connectivity_checks().await);
        assert_eq!(agent.get_connection_state(), ConnectionState::ConnectingDirect);

        agent.tick(RETRY_DELAY).await;
        agent.tick(RETRY_DELAY).await;
        assert_eq!(agent.get_connection_state(), ConnectionState::ConnectingRelay);

        // No local relayed candidate either: the budget drains to Failed.
        for _ in 0..MAX_TOTAL_ATTEMPTS {
            agent.tick(RETRY_DELAY).await;
        }
        assert_eq!(agent.get_connection_state(), ConnectionState::Failed);

        // Failed is terminal until close().
        assert!(!agent.start_connectivity_checks().await);
        agent.tick(RETRY_DELAY).await;
        assert_eq!(agent.get_connection_state(), ConnectionState::Failed);
        agent.close();
        assert_eq!(agent.get_connection_state(), ConnectionState::New);
    }
}
