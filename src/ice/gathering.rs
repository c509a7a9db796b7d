// src/ice/gathering.rs
//! Candidate gathering: host, then server-reflexive, then relayed.

use std::net::{IpAddr, Ipv4Addr};

use tokio::net::UdpSocket;

use crate::config::AgentConfig;
use crate::error::IceResult;
use crate::stun::StunClient;
use crate::turn::TurnClient;

use super::candidate::Candidate;

/// Everything one gathering pass produces: the ordered candidate list,
/// the pre-bound host socket (so the advertised host port is real before
/// signaling) and the TURN client backing a relayed candidate, if any.
pub struct GatherOutcome {
    pub candidates: Vec<Candidate>,
    pub host_socket: Option<UdpSocket>,
    pub turn_client: Option<TurnClient>,
}

/// Run the gathering pipeline for `config`.
///
/// Per category the configured servers are tried in order and the first
/// success short-circuits. Category failures are absorbed: a dead STUN
/// server just means no srflx candidate.
pub async fn gather(config: &AgentConfig) -> IceResult<GatherOutcome> {
    let mut candidates = Vec::new();

    // Host: bind immediately so the candidate carries its final port.
    let host_ip = config.bind_address.unwrap_or_else(primary_local_ip);
    let mut host_socket = None;
    let mut host_base = None;
    match UdpSocket::bind((host_ip, 0)).await {
        Ok(socket) => match socket.local_addr() {
            Ok(local) => {
                tracing::debug!(address = %local, "host candidate bound");
                candidates.push(Candidate::host(local.ip(), local.port()));
                host_base = Some((local.ip(), local.port()));
                host_socket = Some(socket);
            }
            Err(e) => tracing::warn!(error = %e, "could not read back host socket address"),
        },
        Err(e) => tracing::warn!(%host_ip, error = %e, "host candidate bind failed"),
    }

    // Server-reflexive: first STUN server that answers.
    let stun = StunClient::default();
    for server in &config.stun_servers {
        match stun.probe(server).await {
            Ok(mapped) => {
                tracing::info!(server, public = %mapped, "server-reflexive candidate");
                candidates.push(Candidate::server_reflexive(
                    mapped.ip(),
                    mapped.port(),
                    host_base,
                ));
                break;
            }
            Err(e) => {
                tracing::debug!(server, error = %e, "STUN probe failed, trying next");
            }
        }
    }

    // Relayed: first TURN server that allocates. Missing credentials is a
    // configuration problem worth a warning, but never fails gathering.
    let mut turn_client = None;
    if !config.turn_servers.is_empty() {
        if !config.has_turn_credentials() {
            tracing::warn!("TURN servers configured without credentials, skipping relay");
        } else {
            for server in &config.turn_servers {
                match allocate_relay(server, config).await {
                    Ok((client, relay)) => {
                        tracing::info!(server, %relay, "relayed candidate");
                        candidates.push(Candidate::relayed(relay.ip(), relay.port(), host_base));
                        turn_client = Some(client);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(server, error = %e, "TURN allocation failed, trying next");
                    }
                }
            }
        }
    }

    Ok(GatherOutcome {
        candidates,
        host_socket,
        turn_client,
    })
}

async fn allocate_relay(
    server: &str,
    config: &AgentConfig,
) -> IceResult<(TurnClient, std::net::SocketAddr)> {
    let mut client =
        TurnClient::connect(server, &config.turn_username, &config.turn_credential).await?;
    let relay = client.allocate().await?;
    Ok((client, relay))
}

/// Primary IPv4 address: the first non-loopback interface, loopback as the
/// last resort.
fn primary_local_ip() -> IpAddr {
    if let Ok(interfaces) = if_addrs::get_if_addrs() {
        for iface in interfaces {
            if iface.is_loopback() {
                continue;
            }
            if let IpAddr::V4(v4) = iface.ip() {
                return IpAddr::V4(v4);
            }
        }
    }
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
