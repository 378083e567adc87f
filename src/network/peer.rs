//! Peer connection state machine
//!
//! A [`Peer`] owns the protocol state of one outbound connection: negotiated
//! versions, the send and receive buffers and the framing mode. It never
//! touches the socket itself; the network thread moves bytes in and out while
//! holding the shared lock, so every method here runs under that lock.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use super::dispatcher::{dispatch, NodeHandler};
use super::error::{NetworkError, NetworkResult};
use super::protocol::{
    NetworkAddress, NetworkKind, ProtocolMessage, ProtocolParser, VersionMessage,
    BIP0031_VERSION, MIN_CHECKSUM_VERSION,
};
use crate::config::HarnessConfig;

/// Identifier of a registered connection
pub type ConnectionId = u64;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket not yet handed to the network thread
    Connecting,
    Connected,
    Closed,
}

/// Per-connection traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub messages_sent: u64,
    pub messages_recv: u64,
}

/// One outbound connection to a node under test
#[derive(Debug)]
pub struct Peer {
    id: ConnectionId,
    addr: SocketAddr,
    network: NetworkKind,
    state: ConnectionState,
    disconnect_requested: bool,
    /// Version used to frame outgoing messages
    ver_send: i32,
    /// Version used to parse incoming frames
    ver_recv: i32,
    local_version: i32,
    /// Peer predates BIP31; `ping` bodies are empty
    legacy_ping: bool,
    verack_received: bool,
    remote_version: Option<VersionMessage>,
    send_buf: BytesMut,
    recv_buf: BytesMut,
    last_sent: Instant,
    idle_ping: Duration,
    max_message_length: usize,
    stats: PeerStats,
}

impl Peer {
    /// Create a connection in `Connecting` state with its `version` already
    /// queued. This is the only message allowed before the socket is up.
    pub fn new(id: ConnectionId, addr: SocketAddr, config: &HarnessConfig) -> Self {
        let mut peer = Self {
            id,
            addr,
            network: config.network,
            state: ConnectionState::Connecting,
            disconnect_requested: false,
            ver_send: MIN_CHECKSUM_VERSION,
            ver_recv: MIN_CHECKSUM_VERSION,
            local_version: config.protocol_version,
            legacy_ping: false,
            verack_received: false,
            remote_version: None,
            send_buf: BytesMut::with_capacity(1024),
            recv_buf: BytesMut::with_capacity(8192),
            last_sent: Instant::now(),
            idle_ping: config.idle_ping(),
            max_message_length: config.max_message_length,
            stats: PeerStats::default(),
        };

        let version = VersionMessage::new(
            config.protocol_version,
            config.services,
            NetworkAddress::from_socket_addr(addr, config.services),
            &config.user_agent,
            config.start_height,
        );
        peer.queue_message(&ProtocolMessage::Version(version));
        info!(
            "Connecting to {} on {} using version {}",
            addr, config.network, config.protocol_version
        );
        peer
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn network(&self) -> NetworkKind {
        self.network
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Socket is established; regular sends are now accepted
    pub fn mark_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            debug!("Peer {} ({}) connected", self.id, self.addr);
            self.state = ConnectionState::Connected;
        }
    }

    /// Ask the network thread to close this connection on its next pass
    pub fn request_disconnect(&mut self) {
        self.disconnect_requested = true;
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    pub fn ver_send(&self) -> i32 {
        self.ver_send
    }

    pub fn set_ver_send(&mut self, version: i32) {
        self.ver_send = version;
    }

    pub fn ver_recv(&self) -> i32 {
        self.ver_recv
    }

    pub fn set_ver_recv(&mut self, version: i32) {
        self.ver_recv = version;
    }

    /// Version this side announces
    pub fn local_version(&self) -> i32 {
        self.local_version
    }

    pub fn uses_legacy_ping(&self) -> bool {
        self.legacy_ping
    }

    pub fn verack_received(&self) -> bool {
        self.verack_received
    }

    pub fn set_verack_received(&mut self, received: bool) {
        self.verack_received = received;
    }

    /// The peer's `version`, once received
    pub fn remote_version(&self) -> Option<&VersionMessage> {
        self.remote_version.as_ref()
    }

    pub fn stats(&self) -> PeerStats {
        self.stats
    }

    /// Queue `message` for sending.
    ///
    /// Returns false, and drops the message, unless the connection is
    /// `Connected`.
    pub fn send_message(&mut self, message: &ProtocolMessage) -> bool {
        if self.state != ConnectionState::Connected {
            debug!(
                "Not sending {} to peer {}: connection is {:?}",
                message.command(),
                self.id,
                self.state
            );
            return false;
        }
        self.queue_message(message);
        true
    }

    /// Like [`Peer::send_message`] but reports a dropped message as an error
    pub fn try_send_message(&mut self, message: &ProtocolMessage) -> NetworkResult<()> {
        if self.send_message(message) {
            Ok(())
        } else {
            Err(NetworkError::NotConnected)
        }
    }

    fn queue_message(&mut self, message: &ProtocolMessage) {
        debug!("Send to peer {}: {}", self.id, message);
        let frame = ProtocolParser::serialize_message(
            self.network.magic(),
            message,
            self.ver_send >= MIN_CHECKSUM_VERSION,
        );
        self.send_buf.extend_from_slice(&frame);
        self.last_sent = Instant::now();
        self.stats.messages_sent += 1;
    }

    /// A ping in the format this peer understands
    pub fn ping_message(&self) -> ProtocolMessage {
        if self.legacy_ping {
            ProtocolMessage::PingLegacy
        } else {
            ProtocolMessage::Ping(rand::random())
        }
    }

    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// Bytes waiting to be written
    pub fn pending_send(&self) -> &[u8] {
        &self.send_buf
    }

    /// Drop `n` bytes from the front of the send buffer after a write
    pub fn consume_sent(&mut self, n: usize) {
        let n = n.min(self.send_buf.len());
        self.send_buf.advance(n);
        self.stats.bytes_sent += n as u64;
    }

    /// Feed bytes read from the socket and dispatch every complete frame.
    ///
    /// Unknown commands and undecodable bodies are logged and dropped.
    /// Handler errors are logged and do not stop processing. A framing
    /// violation is returned and the caller must close the connection.
    pub fn receive<H: NodeHandler + ?Sized>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> NetworkResult<()> {
        self.stats.bytes_recv += data.len() as u64;
        self.recv_buf.extend_from_slice(data);

        loop {
            let parsed = ProtocolParser::parse_frame(
                self.network.magic(),
                &self.recv_buf,
                self.ver_recv >= MIN_CHECKSUM_VERSION,
                self.max_message_length,
            )?;
            let Some((frame, used)) = parsed else {
                return Ok(());
            };
            self.recv_buf.advance(used);

            match ProtocolMessage::decode(&frame.command, &frame.payload, self.legacy_ping) {
                Ok(message) => self.got_message(message, handler),
                Err(NetworkError::UnknownCommand(command)) => {
                    debug!(
                        "Unknown command from peer {}: \"{}\" {}",
                        self.id,
                        command,
                        hex::encode(&frame.payload)
                    );
                }
                Err(e) => {
                    warn!(
                        "Dropping undecodable '{}' from peer {}: {}",
                        frame.command, self.id, e
                    );
                }
            }
        }
    }

    fn got_message<H: NodeHandler + ?Sized>(&mut self, message: ProtocolMessage, handler: &mut H) {
        self.stats.messages_recv += 1;

        if let ProtocolMessage::Version(version) = &message {
            if version.version <= BIP0031_VERSION {
                self.legacy_ping = true;
            }
            self.remote_version = Some(version.clone());
        }

        if self.last_sent.elapsed() > self.idle_ping {
            let ping = self.ping_message();
            self.send_message(&ping);
        }

        debug!("Recv from peer {}: {}", self.id, message);
        if let Err(e) = dispatch(handler, self, &message) {
            warn!("Peer {}: {} ({})", self.id, e, message);
        }
    }

    /// Move to `Closed`, drop buffered bytes and tell the handler
    pub fn handle_close<H: NodeHandler + ?Sized>(&mut self, handler: &mut H) {
        if self.state == ConnectionState::Closed {
            return;
        }
        info!("Closing connection to peer {} ({})", self.id, self.addr);
        self.state = ConnectionState::Closed;
        self.send_buf.clear();
        self.recv_buf.clear();
        handler.on_close(self);
    }
}
