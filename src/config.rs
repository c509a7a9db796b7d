// src/config.rs
//! Agent configuration.

use std::net::IpAddr;

/// Configuration for the NAT traversal agent.
///
/// STUN and TURN server lists are ordered: gathering tries each entry in
/// turn and keeps the first that answers. Server strings are `host[:port]`
/// with the standard 3478 default.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// STUN servers for server-reflexive discovery.
    pub stun_servers: Vec<String>,

    /// TURN servers for relay allocation. Empty list skips relay gathering.
    pub turn_servers: Vec<String>,

    /// TURN long-term credential username.
    pub turn_username: String,

    /// TURN long-term credential password.
    pub turn_credential: String,

    /// Reserved: IPv6 candidate gathering is not implemented.
    pub enable_ipv6: bool,

    /// Fixed address for the host candidate. When unset the primary
    /// non-loopback IPv4 interface is used, falling back to loopback.
    pub bind_address: Option<IpAddr>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            turn_username: String::new(),
            turn_credential: String::new(),
            enable_ipv6: false,
            bind_address: None,
        }
    }
}

impl AgentConfig {
    /// True when TURN servers are configured together with credentials.
    pub fn has_turn_credentials(&self) -> bool {
        !self.turn_username.is_empty() && !self.turn_credential.is_empty()
    }
}
