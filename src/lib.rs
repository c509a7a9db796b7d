//! icefall, a UDP NAT traversal agent.
//!
//! Two endpoints behind arbitrary NATs discover each other's reachable
//! transport addresses (STUN), fall back to an authenticated relay when no
//! direct path works (TURN), and expose a plain datagram channel once a
//! minimal application handshake completes.
//!
//! The expected flow mirrors ICE: [`IceAgent::gather_candidates`], trade
//! candidate lists over a [`signaling::Signaling`] channel, feed the
//! remote's list in with [`IceAgent::add_remote_candidate`], then
//! [`IceAgent::start_connectivity_checks`] and drive [`IceAgent::tick`]
//! until the agent reports Connected.

pub mod config;
pub mod error;
pub mod ice;
pub mod net;
pub mod signaling;
pub mod stun;
pub mod turn;

pub use config::AgentConfig;
pub use error::{IceError, IceResult, StunError, TurnError};
pub use ice::{Candidate, CandidateType, ConnectionState, IceAgent};
pub use signaling::{file::FileSignaling, SignalKind, SignalMessage, Signaling};
pub use stun::StunClient;
pub use turn::TurnClient;

/// Initialize tracing output for binaries and examples embedding the agent.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
