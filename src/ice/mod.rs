// src/ice/mod.rs
//! Minimal ICE: candidates, gathering, pairing and the connection agent.

pub mod agent;
pub mod candidate;
pub mod gathering;
pub mod handshake;

pub use agent::{
    ConnectionState, IceAgent, StateListener, HANDSHAKE_RETRY_INTERVAL, HANDSHAKE_TIMEOUT,
    MAX_DIRECT_ATTEMPTS, MAX_TOTAL_ATTEMPTS, RETRY_DELAY,
};
pub use candidate::{priority, select_pair, Candidate, CandidateType, PairStage, Transport};
pub use handshake::{Hello, HelloKind, HELLO_LEN, HELLO_MAGIC};
