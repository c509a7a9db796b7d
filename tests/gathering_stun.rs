//! Gathering against a loopback STUN mock: server iteration order and the
//! first-success short-circuit.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use icefall::ice::CandidateType;
use icefall::stun::{Attribute, Message, MessageType};
use icefall::{AgentConfig, IceAgent};
use tokio::net::UdpSocket;

/// STUN mock reporting a fixed public mapping, counting requests.
async fn spawn_mock_stun(public: SocketAddr) -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = Message::decode(&buf[..n]) else {
                continue;
            };
            if request.message_type != MessageType::BindingRequest {
                continue;
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let mut response =
                Message::with_transaction(MessageType::BindingSuccess, request.transaction_id);
            response.add_attribute(Attribute::XorMappedAddress(public));
            let _ = socket.send_to(&response.encode().unwrap(), from).await;
        }
    });

    (addr, requests)
}

#[tokio::test]
async fn first_responding_server_wins_and_short_circuits() {
    let public: SocketAddr = "203.0.113.5:41234".parse().unwrap();
    let (first, first_requests) = spawn_mock_stun(public).await;
    let (second, second_requests) = spawn_mock_stun("198.51.100.99:1000".parse().unwrap()).await;

    let mut agent = IceAgent::new(AgentConfig {
        // An unresolvable entry ahead of the live ones exercises the
        // keep-trying path without waiting out a timeout.
        stun_servers: vec![
            "no-such-host.invalid".to_string(),
            first.to_string(),
            second.to_string(),
        ],
        bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ..Default::default()
    });

    assert!(agent.gather_candidates().await);
    let candidates = agent.get_local_candidates();
    assert_eq!(candidates.len(), 2, "host + srflx expected: {candidates:?}");

    let host = &candidates[0];
    assert_eq!(host.candidate_type, CandidateType::Host);

    let srflx = &candidates[1];
    assert_eq!(srflx.candidate_type, CandidateType::ServerReflexive);
    assert_eq!(srflx.foundation, "2");
    assert_eq!(SocketAddr::new(srflx.address, srflx.port), public);
    assert_eq!(srflx.related_address, Some(host.address));
    assert_eq!(srflx.related_port, Some(host.port));
    // Gathering order: STUN before TURN, host first.
    assert!(host.priority > srflx.priority);

    assert_eq!(first_requests.load(Ordering::SeqCst), 1);
    assert_eq!(
        second_requests.load(Ordering::SeqCst),
        0,
        "gathering must stop at the first success"
    );
}
