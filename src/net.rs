// src/net.rs
//! UDP transport helpers shared by the STUN and TURN clients.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use crate::error::{IceError, IceResult};

/// Resolve a `host[:port]` server string to a socket address.
///
/// Dotted-quad literals short-circuit; anything else goes through DNS with
/// IPv4 answers preferred. Resolution failure is a configuration error.
pub async fn resolve(server: &str, default_port: u16) -> IceResult<SocketAddr> {
    let (host, port) = match server.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| IceError::Config(format!("invalid port in server '{server}'")))?;
            (host, port)
        }
        None => (server, default_port),
    };

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let lookup = timeout(Duration::from_secs(5), lookup_host((host, port)))
        .await
        .map_err(|_| IceError::Timeout(Duration::from_secs(5)))?
        .map_err(|e| IceError::Config(format!("failed to resolve '{host}': {e}")))?;

    let mut fallback = None;
    for addr in lookup {
        if addr.is_ipv4() {
            return Ok(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback.ok_or_else(|| IceError::Config(format!("no addresses found for '{host}'")))
}

/// Bind a UDP socket to an OS-assigned port on the wildcard address.
pub async fn bind_any() -> IceResult<UdpSocket> {
    Ok(UdpSocket::bind("0.0.0.0:0").await?)
}

/// Bind the connection's data socket with address reuse enabled, so a
/// retry can rebind the port a just-dropped socket advertised.
pub fn bind_data_socket(addr: SocketAddr) -> IceResult<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Receive a single datagram, waiting at most `wait`.
pub async fn recv_from_timeout(
    socket: &UdpSocket,
    buf: &mut [u8],
    wait: Duration,
) -> IceResult<(usize, SocketAddr)> {
    match timeout(wait, socket.recv_from(buf)).await {
        Ok(Ok(received)) => Ok(received),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(IceError::Timeout(wait)),
    }
}
