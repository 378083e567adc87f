//! Network thread tests against an in-process mock node

mod common;

use common::*;
use pastel_mininode::network::peer::Peer;
use pastel_mininode::network::protocol::MIN_CHECKSUM_VERSION;
use pastel_mininode::network::{
    ConnectionState, DefaultHandler, NetworkManager, NodeHandler, ProtocolMessage,
    RecordingHandler,
};
use pastel_mininode::primitives::Block;
use pastel_mininode::HarnessConfig;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn fast_config() -> HarnessConfig {
    HarnessConfig {
        poll_interval_ms: 20,
        ..Default::default()
    }
}

fn handshake_done(net: &NetworkManager<RecordingHandler>, id: u64) -> bool {
    net.wait_until(TIMEOUT, |m| m.peer(id).is_some_and(|p| p.verack_received()))
}

#[test]
fn test_handshake_with_current_peer() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();

    assert!(handshake_done(&net, id));
    {
        let manager = net.lock();
        let peer = manager.peer(id).unwrap();
        assert_eq!(peer.state(), ConnectionState::Connected);
        assert_eq!(peer.ver_send(), 170008);
        assert_eq!(peer.ver_recv(), 170008);
        assert_eq!(
            peer.remote_version().unwrap().user_agent.as_deref(),
            Some(&b"/MockPastel:1.0/"[..])
        );
    }
    assert!(mock.wait_for(TIMEOUT, |m| m.iter().any(|x| *x == ProtocolMessage::Verack)));
    match &mock.received()[0] {
        ProtocolMessage::Version(v) => assert_eq!(v.version, 170008),
        other => panic!("first message was {}", other),
    }

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
    assert_eq!(net.state(id).unwrap(), ConnectionState::Closed);
    assert_eq!(net.with_connection(id, |_, h| h.close_count()).unwrap(), 1);
}

#[test]
fn test_version_negotiated_down_to_older_peer() {
    let mock = MockNode::start(MockOptions {
        version: 170006,
        ..Default::default()
    });
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();

    assert!(handshake_done(&net, id));
    let (send, recv) = net.with_connection(id, |p, _| (p.ver_send(), p.ver_recv())).unwrap();
    assert_eq!((send, recv), (170006, 170006));

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_pre_checksum_peer_uses_legacy_framing() {
    let mock = MockNode::start(MockOptions {
        version: 200,
        ..Default::default()
    });
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();

    assert!(net.wait_until(TIMEOUT, |m| m
        .handler(id)
        .is_some_and(|h| h.count("version") == 1)));
    let (send, recv, legacy) = net
        .with_connection(id, |p, _| (p.ver_send(), p.ver_recv(), p.uses_legacy_ping()))
        .unwrap();
    assert_eq!((send, recv), (200, 200));
    assert!(send < MIN_CHECKSUM_VERSION);
    assert!(legacy);

    // No verack for such an old peer, and later frames drop the checksum
    net.send(id, &ProtocolMessage::GetAddr).unwrap();
    assert!(mock.wait_for(TIMEOUT, |m| m.iter().any(|x| *x == ProtocolMessage::GetAddr)));
    assert_eq!(mock.count("verack"), 0);

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_one_pong_per_ping() {
    let mock = MockNode::start(MockOptions {
        pings_after_verack: vec![0x1111, 0x2222],
        ..Default::default()
    });
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();

    assert!(mock.wait_for(TIMEOUT, |m| m.iter().filter(|x| x.command() == "pong").count() >= 2));
    std::thread::sleep(Duration::from_millis(200));
    let pongs: Vec<_> = mock
        .received()
        .into_iter()
        .filter(|m| m.command() == "pong")
        .collect();
    assert_eq!(pongs, vec![ProtocolMessage::Pong(0x1111), ProtocolMessage::Pong(0x2222)]);

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_ping_round_trip() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();
    assert!(handshake_done(&net, id));

    net.send(id, &ProtocolMessage::Ping(77)).unwrap();
    assert!(net.wait_until(TIMEOUT, |m| m
        .handler(id)
        .is_some_and(|h| h.messages().contains(&ProtocolMessage::Pong(77)))));

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_idle_connection_sends_ping() {
    let mock = MockNode::start(MockOptions {
        answer_pings: false,
        ..Default::default()
    });
    let net = NetworkManager::new(HarnessConfig {
        idle_ping_secs: 0,
        ..fast_config()
    });
    let id = net.connect(mock.addr, DefaultHandler);
    let driver = net.start().unwrap();

    assert!(mock.wait_for(TIMEOUT, |m| m.iter().any(|x| x.command() == "ping")));

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_no_idle_ping_within_window() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();
    assert!(handshake_done(&net, id));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(mock.count("ping"), 0);

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

/// Fails on every block but keeps the default handshake behaviour
#[derive(Default)]
struct BlockRefusingHandler {
    failures: usize,
    pongs: usize,
}

impl NodeHandler for BlockRefusingHandler {
    fn on_block(&mut self, _peer: &mut Peer, _block: &Block) -> anyhow::Result<()> {
        self.failures += 1;
        anyhow::bail!("refusing block")
    }

    fn on_pong(&mut self, _peer: &mut Peer, _nonce: u64) -> anyhow::Result<()> {
        self.pongs += 1;
        Ok(())
    }
}

#[test]
fn test_handler_failure_keeps_connection() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, BlockRefusingHandler::default());
    let driver = net.start().unwrap();
    assert!(net.wait_until(TIMEOUT, |m| m.peer(id).is_some_and(|p| p.verack_received())));

    // The mock only sends blocks on request, so feed one through the handler
    // path directly under the lock, then confirm the socket still works.
    net.with_connection(id, |peer, handler| {
        let frame = pastel_mininode::network::ProtocolParser::serialize_message(
            peer.network().magic(),
            &ProtocolMessage::Block(Block::default()),
            true,
        );
        peer.receive(&frame, handler)
    })
    .unwrap()
    .unwrap();

    net.send(id, &ProtocolMessage::Ping(5)).unwrap();
    assert!(net.wait_until(TIMEOUT, |m| m.handler(id).is_some_and(|h| h.pongs == 1)));
    assert_eq!(net.with_connection(id, |_, h| h.failures).unwrap(), 1);
    assert!(net.state(id).unwrap() == ConnectionState::Connected);

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_remote_close_ends_network_thread() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();
    assert!(handshake_done(&net, id));

    drop(mock);
    driver.join().unwrap().unwrap();
    let manager = net.lock();
    assert!(manager.peer(id).unwrap().is_closed());
    assert_eq!(manager.handler(id).unwrap().close_count(), 1);
}

#[test]
fn test_send_before_connected_is_dropped() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());

    // Socket is open but the network thread has not adopted it yet
    assert_eq!(net.state(id).unwrap(), ConnectionState::Connecting);
    assert!(net.send(id, &ProtocolMessage::GetAddr).is_err());

    let driver = net.start().unwrap();
    assert!(handshake_done(&net, id));
    assert_eq!(mock.count("getaddr"), 0);

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
}

#[test]
fn test_write_to_reset_peer_closes_connection() {
    let mock = MockNode::start(MockOptions {
        reset_after_verack: true,
        ..Default::default()
    });
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, RecordingHandler::new());
    let driver = net.start().unwrap();
    assert!(handshake_done(&net, id));

    // Keep queueing until the reset surfaces on a write or a read
    assert!(net.wait_until(TIMEOUT, |m| {
        let peer = m.peer_mut(id).unwrap();
        if peer.is_connected() {
            peer.send_message(&ProtocolMessage::Ping(9));
        }
        peer.is_closed()
    }));
    driver.join().unwrap().unwrap();

    assert_eq!(net.state(id).unwrap(), ConnectionState::Closed);
    assert_eq!(net.with_connection(id, |_, h| h.close_count()).unwrap(), 1);
    assert!(net.send(id, &ProtocolMessage::Ping(10)).is_err());
}

/// Panics on the first pong, like a failed assertion in test logic
#[derive(Default)]
struct AssertingHandler {
    pongs: Vec<u64>,
    closed: bool,
}

impl NodeHandler for AssertingHandler {
    fn on_pong(&mut self, _peer: &mut Peer, nonce: u64) -> anyhow::Result<()> {
        assert_ne!(nonce, 1, "unexpected pong");
        self.pongs.push(nonce);
        Ok(())
    }

    fn on_close(&mut self, _peer: &mut Peer) {
        self.closed = true;
    }
}

#[test]
fn test_handler_panic_keeps_network_thread() {
    let mock = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let id = net.connect(mock.addr, AssertingHandler::default());
    let driver = net.start().unwrap();
    assert!(net.wait_until(TIMEOUT, |m| m.peer(id).is_some_and(|p| p.verack_received())));

    net.send(id, &ProtocolMessage::Ping(1)).unwrap();
    net.send(id, &ProtocolMessage::Ping(2)).unwrap();
    assert!(net.wait_until(TIMEOUT, |m| m
        .handler(id)
        .is_some_and(|h| h.pongs == vec![2])));
    assert!(!driver.is_finished());
    assert_eq!(net.state(id).unwrap(), ConnectionState::Connected);

    net.disconnect(id).unwrap();
    driver.join().unwrap().unwrap();
    assert!(net.with_connection(id, |_, h| h.closed).unwrap());
}

#[test]
fn test_remove_closed_connection() {
    let first = MockNode::start(MockOptions::default());
    let second = MockNode::start(MockOptions::default());
    let net = NetworkManager::new(fast_config());
    let a = net.connect(first.addr, RecordingHandler::new());
    let b = net.connect(second.addr, RecordingHandler::new());
    let driver = net.start().unwrap();
    assert!(handshake_done(&net, a));
    assert!(handshake_done(&net, b));

    net.disconnect(a).unwrap();
    assert!(net.wait_until(TIMEOUT, |m| !m.is_live(a)));
    let (peer, handler) = net.remove(a).unwrap();
    assert!(peer.is_closed());
    assert_eq!(handler.close_count(), 1);
    assert!(handler.count("verack") >= 1);
    assert!(matches!(
        net.state(a),
        Err(pastel_mininode::NetworkError::UnknownConnection(_))
    ));
    assert_eq!(net.lock().ids(), vec![b]);

    // The other connection keeps the network thread alive
    net.send(b, &ProtocolMessage::Ping(3)).unwrap();
    assert!(net.wait_until(TIMEOUT, |m| m
        .handler(b)
        .is_some_and(|h| h.messages().contains(&ProtocolMessage::Pong(3)))));

    net.disconnect(b).unwrap();
    driver.join().unwrap().unwrap();
}
