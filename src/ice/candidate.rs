// src/ice/candidate.rs
//! ICE candidate representation, priority and pair selection (RFC 8445
//! subset: UDP, IPv4, component 1).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::IceError;

/// Local preference used for every candidate of this single-homed agent.
pub const DEFAULT_LOCAL_PREFERENCE: u32 = 65535;

/// Candidate type (RFC 8445 Section 5.1.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    /// Locally bound address.
    Host,
    /// Public mapping observed by a STUN server.
    ServerReflexive,
    /// TURN relay address.
    Relayed,
}

impl CandidateType {
    /// SDP token for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::Relayed => "relay",
        }
    }

    /// Type preference (RFC 8445 Section 5.1.2.2).
    pub fn preference(self) -> u32 {
        match self {
            Self::Host => 126,
            Self::ServerReflexive => 100,
            Self::Relayed => 0,
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "host" => Some(Self::Host),
            "srflx" => Some(Self::ServerReflexive),
            "relay" => Some(Self::Relayed),
            _ => None,
        }
    }
}

/// Transport protocol. Only UDP is gathered; the token survives parsing
/// so remote candidates keep whatever their peer advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    #[default]
    Udp,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "UDP",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "UDP" => Some(Self::Udp),
            _ => None,
        }
    }
}

/// A transport address the agent is willing to receive on.
///
/// Port 0 means the backing socket is not bound yet; once bound the port
/// is non-zero and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component_id: u32,
    pub transport: Transport,
    pub priority: u32,
    pub address: IpAddr,
    pub port: u16,
    pub candidate_type: CandidateType,
    pub related_address: Option<IpAddr>,
    pub related_port: Option<u16>,
}

/// RFC 8445 Section 5.1.2.1 priority.
pub fn priority(
    candidate_type: CandidateType,
    local_preference: u32,
    component_id: u32,
) -> u32 {
    let component = component_id.clamp(1, 256);
    (candidate_type.preference() << 24) | ((local_preference & 0xFFFF) << 8) | (256 - component)
}

impl Candidate {
    /// Host candidate. Port 0 until the data socket binds.
    pub fn host(address: IpAddr, port: u16) -> Self {
        Self {
            foundation: "1".to_string(),
            component_id: 1,
            transport: Transport::Udp,
            priority: priority(CandidateType::Host, DEFAULT_LOCAL_PREFERENCE, 1),
            address,
            port,
            candidate_type: CandidateType::Host,
            related_address: None,
            related_port: None,
        }
    }

    /// Server-reflexive candidate with its host base as related address.
    pub fn server_reflexive(address: IpAddr, port: u16, base: Option<(IpAddr, u16)>) -> Self {
        Self {
            foundation: "2".to_string(),
            component_id: 1,
            transport: Transport::Udp,
            priority: priority(CandidateType::ServerReflexive, DEFAULT_LOCAL_PREFERENCE, 1),
            address,
            port,
            candidate_type: CandidateType::ServerReflexive,
            related_address: base.map(|(ip, _)| ip),
            related_port: base.map(|(_, port)| port),
        }
    }

    /// Relayed candidate with the client's reflexive base as related.
    pub fn relayed(address: IpAddr, port: u16, base: Option<(IpAddr, u16)>) -> Self {
        Self {
            foundation: "3".to_string(),
            component_id: 1,
            transport: Transport::Udp,
            priority: priority(CandidateType::Relayed, DEFAULT_LOCAL_PREFERENCE, 1),
            address,
            port,
            candidate_type: CandidateType::Relayed,
            related_address: base.map(|(ip, _)| ip),
            related_port: base.map(|(_, port)| port),
        }
    }

    /// Whether this candidate may take part in the direct stage.
    pub fn is_direct(&self) -> bool {
        matches!(
            self.candidate_type,
            CandidateType::Host | CandidateType::ServerReflexive
        )
    }
}

impl fmt::Display for Candidate {
    /// `candidate:<found> <cid> <transport> <prio> <addr> <port> typ <typ>`
    /// with `raddr <ip> rport <port>` appended when a related address is
    /// known.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component_id,
            self.transport.as_str(),
            self.priority,
            self.address,
            self.port,
            self.candidate_type.as_str(),
        )?;
        if let (Some(raddr), Some(rport)) = (self.related_address, self.related_port) {
            write!(f, " raddr {raddr} rport {rport}")?;
        }
        Ok(())
    }
}

impl FromStr for Candidate {
    type Err = IceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("candidate:").unwrap_or(s);
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() < 8 || parts[6] != "typ" {
            return Err(IceError::Config(format!("malformed candidate string '{s}'")));
        }

        let bad = |field: &str| IceError::Config(format!("invalid candidate {field} in '{s}'"));

        let mut candidate = Candidate {
            foundation: parts[0].to_string(),
            component_id: parts[1].parse().map_err(|_| bad("component id"))?,
            transport: Transport::parse(parts[2]).ok_or_else(|| bad("transport"))?,
            priority: parts[3].parse().map_err(|_| bad("priority"))?,
            address: parts[4].parse().map_err(|_| bad("address"))?,
            port: parts[5].parse().map_err(|_| bad("port"))?,
            candidate_type: CandidateType::parse(parts[7]).ok_or_else(|| bad("type"))?,
            related_address: None,
            related_port: None,
        };

        let mut rest = parts[8..].chunks_exact(2);
        for pair in &mut rest {
            match pair[0] {
                "raddr" => {
                    candidate.related_address = Some(pair[1].parse().map_err(|_| bad("raddr"))?)
                }
                "rport" => {
                    candidate.related_port = Some(pair[1].parse().map_err(|_| bad("rport"))?)
                }
                _ => {} // unknown extension tokens are ignored
            }
        }

        Ok(candidate)
    }
}

/// Connection stage a pair is selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStage {
    /// Host and server-reflexive candidates only.
    Direct,
    /// Relayed candidates only.
    Relay,
}

impl PairStage {
    fn admits(self, candidate: &Candidate) -> bool {
        match self {
            Self::Direct => candidate.is_direct(),
            Self::Relay => candidate.candidate_type == CandidateType::Relayed,
        }
    }
}

/// Pick the highest-priority local and remote admitted by `stage`.
///
/// Ties keep the earliest entry, so selection is deterministic for a given
/// gathering order.
pub fn select_pair(
    locals: &[Candidate],
    remotes: &[Candidate],
    stage: PairStage,
) -> Option<(Candidate, Candidate)> {
    let best = |candidates: &[Candidate]| {
        candidates
            .iter()
            .filter(|c| stage.admits(c))
            .fold(None::<&Candidate>, |best, c| match best {
                Some(b) if b.priority >= c.priority => Some(b),
                _ => Some(c),
            })
            .cloned()
    };
    Some((best(locals)?, best(remotes)?))
}
