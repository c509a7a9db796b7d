// src/signaling/mod.rs
//! Out-of-band candidate exchange.
//!
//! Signaling is not part of ICE itself: peers need some rendezvous channel
//! to trade candidate lists before connectivity checks can run. The
//! [`Signaling`] trait abstracts that channel; [`file::FileSignaling`]
//! implements it over a shared directory for local testing.

pub mod file;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ice::{Candidate, CandidateType, Transport};

/// Signal message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Session offer carrying the initiator's candidates.
    Offer,
    /// Session answer carrying the responder's candidates.
    Answer,
    /// Incremental candidate update.
    Candidate,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }
}

/// A candidate-exchange message.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub kind: SignalKind,
    pub session_id: String,
    pub sender_id: String,
    /// Empty means broadcast.
    pub receiver_id: String,
    pub candidates: Vec<Candidate>,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl SignalMessage {
    pub fn new(kind: SignalKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            sender_id: String::new(),
            receiver_id: String::new(),
            candidates: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize to the wire JSON shape.
    pub fn to_json(&self) -> String {
        let wire = WireMessage {
            kind: self.kind.as_str().to_string(),
            session_id: self.session_id.clone(),
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            timestamp: Some(self.timestamp.to_rfc3339()),
            candidates: self.candidates.iter().map(WireCandidate::from).collect(),
            metadata: self.metadata.clone(),
        };
        serde_json::to_string(&wire).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "signal serialization failed");
            String::from("{}")
        })
    }

    /// Deserialize leniently.
    ///
    /// An unknown `type` falls back to Candidate, a missing or unparsable
    /// timestamp to now, and candidate entries that fail validation are
    /// skipped. Each case warns, none fails. Only JSON that does not
    /// parse at all produces the default message.
    pub fn from_json(json: &str) -> Self {
        let wire: WireMessage = match serde_json::from_str(json) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse signal message JSON");
                return Self::new(SignalKind::Candidate, "");
            }
        };

        let kind = match wire.kind.as_str() {
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "candidate" => SignalKind::Candidate,
            other => {
                tracing::warn!(kind = other, "unknown signal type, treating as candidate");
                SignalKind::Candidate
            }
        };

        let timestamp = match wire.timestamp.as_deref() {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => parsed.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(raw, error = %e, "bad signal timestamp, using now");
                    Utc::now()
                }
            },
            None => {
                tracing::warn!("signal message missing timestamp, using now");
                Utc::now()
            }
        };

        let candidates = wire
            .candidates
            .into_iter()
            .filter_map(|wire| match Candidate::try_from(wire) {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed candidate in signal");
                    None
                }
            })
            .collect();

        Self {
            kind,
            session_id: wire.session_id,
            sender_id: wire.sender_id,
            receiver_id: wire.receiver_id,
            candidates,
            metadata: wire.metadata,
            timestamp,
        }
    }

    /// Receive-side filter: own messages and messages addressed to another
    /// peer are dropped.
    pub fn is_for(&self, local_peer_id: &str) -> bool {
        if self.sender_id == local_peer_id {
            return false;
        }
        self.receiver_id.is_empty() || self.receiver_id == local_peer_id
    }
}

/// Subscriber invoked for each accepted inbound message.
pub type SignalListener = Box<dyn FnMut(&SignalMessage) + Send>;

/// A candidate-exchange transport.
pub trait Signaling {
    /// Bring the channel up. Must be called before send/process.
    fn init(&mut self) -> bool;

    /// Tear the channel down.
    fn shutdown(&mut self);

    /// Publish one message.
    fn send_signal(&mut self, message: &SignalMessage) -> bool;

    /// Drain newly arrived messages, apply the receive filter and invoke
    /// subscribers. Called periodically from the host's tick.
    fn process_signals(&mut self);

    fn is_active(&self) -> bool;

    /// This peer's locally generated id.
    fn local_peer_id(&self) -> &str;

    /// Register an inbound-message subscriber.
    fn subscribe(&mut self, listener: SignalListener);
}

// ---- wire shapes --------------------------------------------------------

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    sender_id: String,
    #[serde(default)]
    receiver_id: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    foundation: String,
    #[serde(default = "default_component")]
    component_id: u32,
    #[serde(default)]
    transport: String,
    #[serde(default)]
    priority: u32,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(rename = "type", default)]
    candidate_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    related_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    related_port: Option<u16>,
}

fn default_component() -> u32 {
    1
}

impl From<&Candidate> for WireCandidate {
    fn from(c: &Candidate) -> Self {
        Self {
            foundation: c.foundation.clone(),
            component_id: c.component_id,
            transport: c.transport.as_str().to_string(),
            priority: c.priority,
            address: c.address.to_string(),
            port: c.port,
            candidate_type: c.candidate_type.as_str().to_string(),
            related_address: c.related_address.map(|ip| ip.to_string()),
            related_port: c.related_port,
        }
    }
}

impl TryFrom<WireCandidate> for Candidate {
    type Error = crate::error::IceError;

    fn try_from(wire: WireCandidate) -> Result<Self, Self::Error> {
        let bad = |field: &str| {
            crate::error::IceError::Config(format!("invalid candidate {field} in signal"))
        };
        Ok(Candidate {
            foundation: wire.foundation,
            component_id: wire.component_id,
            transport: Transport::parse(&wire.transport).ok_or_else(|| bad("transport"))?,
            priority: wire.priority,
            address: wire.address.parse().map_err(|_| bad("address"))?,
            port: wire.port,
            candidate_type: CandidateType::parse(&wire.candidate_type)
                .ok_or_else(|| bad("type"))?,
            related_address: match wire.related_address {
                Some(raw) => Some(raw.parse().map_err(|_| bad("relatedAddress"))?),
                None => None,
            },
            related_port: wire.related_port,
        })
    }
}
