//! Message dispatch
//!
//! Every decoded message is routed to one callback of a [`NodeHandler`].
//! The default callbacks complete the handshake, request announced
//! inventory and answer pings; override the ones a test cares about.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use super::error::{NetworkError, NetworkResult};
use super::inventory::{requestable, InventoryItem, InventoryTracker};
use super::peer::Peer;
use super::protocol::{
    AlertMessage, LocatorMessage, NetworkAddress, ProtocolMessage, RejectMessage,
    VersionMessage, BIP0031_VERSION, MIN_CHECKSUM_VERSION,
};
use crate::primitives::{Block, BlockHeader, Transaction};

/// Callbacks invoked by the network thread while holding the shared lock.
///
/// Handlers get the [`Peer`] the message arrived on and may queue replies
/// through it. An error or a panic is logged with the command name; it never
/// closes the connection.
///
/// The shared lock is not reentrant. Queue replies through `peer` rather than
/// calling back into [`NetworkManager`](super::NetworkManager), which would
/// deadlock.
#[allow(unused_variables)]
pub trait NodeHandler: Send {
    /// Runs before the per-command callback for every message
    fn on_message(&mut self, peer: &mut Peer, message: &ProtocolMessage) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_version(&mut self, peer: &mut Peer, message: &VersionMessage) -> anyhow::Result<()> {
        respond_to_version(peer, message);
        Ok(())
    }

    fn on_verack(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        complete_handshake(peer);
        Ok(())
    }

    fn on_addr(&mut self, peer: &mut Peer, addrs: &[NetworkAddress]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_alert(&mut self, peer: &mut Peer, alert: &AlertMessage) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_inv(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        request_announced(peer, items);
        Ok(())
    }

    fn on_getdata(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_notfound(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_getblocks(&mut self, peer: &mut Peer, request: &LocatorMessage) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_getheaders(&mut self, peer: &mut Peer, request: &LocatorMessage) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_tx(&mut self, peer: &mut Peer, tx: &Transaction) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_block(&mut self, peer: &mut Peer, block: &Block) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_getaddr(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        Ok(())
    }

    /// `nonce` is `None` for a pre-BIP31 ping
    fn on_ping(&mut self, peer: &mut Peer, nonce: Option<u64>) -> anyhow::Result<()> {
        answer_ping(peer, nonce);
        Ok(())
    }

    fn on_pong(&mut self, peer: &mut Peer, nonce: u64) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_headers(&mut self, peer: &mut Peer, headers: &[BlockHeader]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_reject(&mut self, peer: &mut Peer, reject: &RejectMessage) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_mempool(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_filteradd(&mut self, peer: &mut Peer, data: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_filterclear(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        Ok(())
    }

    /// The connection has closed; `peer` no longer accepts sends
    fn on_close(&mut self, peer: &mut Peer) {}
}

impl<H: NodeHandler + ?Sized> NodeHandler for Box<H> {
    fn on_message(&mut self, peer: &mut Peer, message: &ProtocolMessage) -> anyhow::Result<()> {
        (**self).on_message(peer, message)
    }

    fn on_version(&mut self, peer: &mut Peer, message: &VersionMessage) -> anyhow::Result<()> {
        (**self).on_version(peer, message)
    }

    fn on_verack(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        (**self).on_verack(peer)
    }

    fn on_addr(&mut self, peer: &mut Peer, addrs: &[NetworkAddress]) -> anyhow::Result<()> {
        (**self).on_addr(peer, addrs)
    }

    fn on_alert(&mut self, peer: &mut Peer, alert: &AlertMessage) -> anyhow::Result<()> {
        (**self).on_alert(peer, alert)
    }

    fn on_inv(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        (**self).on_inv(peer, items)
    }

    fn on_getdata(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        (**self).on_getdata(peer, items)
    }

    fn on_notfound(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        (**self).on_notfound(peer, items)
    }

    fn on_getblocks(&mut self, peer: &mut Peer, request: &LocatorMessage) -> anyhow::Result<()> {
        (**self).on_getblocks(peer, request)
    }

    fn on_getheaders(&mut self, peer: &mut Peer, request: &LocatorMessage) -> anyhow::Result<()> {
        (**self).on_getheaders(peer, request)
    }

    fn on_tx(&mut self, peer: &mut Peer, tx: &Transaction) -> anyhow::Result<()> {
        (**self).on_tx(peer, tx)
    }

    fn on_block(&mut self, peer: &mut Peer, block: &Block) -> anyhow::Result<()> {
        (**self).on_block(peer, block)
    }

    fn on_getaddr(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        (**self).on_getaddr(peer)
    }

    fn on_ping(&mut self, peer: &mut Peer, nonce: Option<u64>) -> anyhow::Result<()> {
        (**self).on_ping(peer, nonce)
    }

    fn on_pong(&mut self, peer: &mut Peer, nonce: u64) -> anyhow::Result<()> {
        (**self).on_pong(peer, nonce)
    }

    fn on_headers(&mut self, peer: &mut Peer, headers: &[BlockHeader]) -> anyhow::Result<()> {
        (**self).on_headers(peer, headers)
    }

    fn on_reject(&mut self, peer: &mut Peer, reject: &RejectMessage) -> anyhow::Result<()> {
        (**self).on_reject(peer, reject)
    }

    fn on_mempool(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        (**self).on_mempool(peer)
    }

    fn on_filteradd(&mut self, peer: &mut Peer, data: &[u8]) -> anyhow::Result<()> {
        (**self).on_filteradd(peer, data)
    }

    fn on_filterclear(&mut self, peer: &mut Peer) -> anyhow::Result<()> {
        (**self).on_filterclear(peer)
    }

    fn on_close(&mut self, peer: &mut Peer) {
        (**self).on_close(peer)
    }
}

/// Default `version` handling.
///
/// Acknowledges peers new enough for checksummed framing, then sends with
/// the lower of the two versions. Older peers are also read without
/// checksums from here on.
pub fn respond_to_version(peer: &mut Peer, message: &VersionMessage) {
    if message.version >= MIN_CHECKSUM_VERSION {
        peer.send_message(&ProtocolMessage::Verack);
    }
    let negotiated = peer.local_version().min(message.version);
    peer.set_ver_send(negotiated);
    if message.version < MIN_CHECKSUM_VERSION {
        peer.set_ver_recv(negotiated);
    }
}

/// Default `verack` handling: incoming frames now use the negotiated version
pub fn complete_handshake(peer: &mut Peer) {
    peer.set_ver_recv(peer.ver_send());
    peer.set_verack_received(true);
}

/// Default `inv` handling: one `getdata` for every requestable item
pub fn request_announced(peer: &mut Peer, items: &[InventoryItem]) {
    let wanted = requestable(items);
    if !wanted.is_empty() {
        peer.send_message(&ProtocolMessage::GetData(wanted));
    }
}

/// Default `ping` handling: echo the nonce to BIP31 peers
pub fn answer_ping(peer: &mut Peer, nonce: Option<u64>) {
    if peer.ver_send() > BIP0031_VERSION {
        if let Some(nonce) = nonce {
            peer.send_message(&ProtocolMessage::Pong(nonce));
        }
    }
}

/// Route `message` to its callback on `handler`.
///
/// A callback that returns an error or panics becomes
/// [`NetworkError::HandlerFailure`]; the connection stays usable.
pub fn dispatch<H: NodeHandler + ?Sized>(
    handler: &mut H,
    peer: &mut Peer,
    message: &ProtocolMessage,
) -> NetworkResult<()> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| route(handler, peer, message)));
    let reason = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{:#}", e),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    Err(NetworkError::HandlerFailure {
        command: message.command().to_string(),
        reason,
    })
}

fn route<H: NodeHandler + ?Sized>(
    handler: &mut H,
    peer: &mut Peer,
    message: &ProtocolMessage,
) -> anyhow::Result<()> {
    handler.on_message(peer, message)?;
    match message {
        ProtocolMessage::Version(v) => handler.on_version(peer, v),
        ProtocolMessage::Verack => handler.on_verack(peer),
        ProtocolMessage::Addr(addrs) => handler.on_addr(peer, addrs),
        ProtocolMessage::Alert(alert) => handler.on_alert(peer, alert),
        ProtocolMessage::Inv(items) => handler.on_inv(peer, items),
        ProtocolMessage::GetData(items) => handler.on_getdata(peer, items),
        ProtocolMessage::NotFound(items) => handler.on_notfound(peer, items),
        ProtocolMessage::GetBlocks(req) => handler.on_getblocks(peer, req),
        ProtocolMessage::GetHeaders(req) => handler.on_getheaders(peer, req),
        ProtocolMessage::Tx(tx) => handler.on_tx(peer, tx),
        ProtocolMessage::Block(block) => handler.on_block(peer, block),
        ProtocolMessage::GetAddr => handler.on_getaddr(peer),
        ProtocolMessage::Ping(nonce) => handler.on_ping(peer, Some(*nonce)),
        ProtocolMessage::PingLegacy => handler.on_ping(peer, None),
        ProtocolMessage::Pong(nonce) => handler.on_pong(peer, *nonce),
        ProtocolMessage::Headers(headers) => handler.on_headers(peer, headers),
        ProtocolMessage::Reject(reject) => handler.on_reject(peer, reject),
        ProtocolMessage::Mempool => handler.on_mempool(peer),
        ProtocolMessage::FilterAdd(data) => handler.on_filteradd(peer, data),
        ProtocolMessage::FilterClear => handler.on_filterclear(peer),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handler that only runs the default callbacks
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl NodeHandler for DefaultHandler {}

/// Keeps every message it sees while behaving like [`DefaultHandler`]
#[derive(Debug, Default, Clone)]
pub struct RecordingHandler {
    messages: Vec<ProtocolMessage>,
    inventory: InventoryTracker,
    close_count: usize,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in arrival order
    pub fn messages(&self) -> &[ProtocolMessage] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<ProtocolMessage> {
        std::mem::take(&mut self.messages)
    }

    /// Number of received messages with this command
    pub fn count(&self, command: &str) -> usize {
        self.messages.iter().filter(|m| m.command() == command).count()
    }

    pub fn last_reject(&self) -> Option<&RejectMessage> {
        self.messages.iter().rev().find_map(|m| match m {
            ProtocolMessage::Reject(r) => Some(r),
            _ => None,
        })
    }

    pub fn inventory(&self) -> &InventoryTracker {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut InventoryTracker {
        &mut self.inventory
    }

    pub fn close_count(&self) -> usize {
        self.close_count
    }
}

impl NodeHandler for RecordingHandler {
    fn on_message(&mut self, _peer: &mut Peer, message: &ProtocolMessage) -> anyhow::Result<()> {
        self.messages.push(message.clone());
        Ok(())
    }

    fn on_inv(&mut self, peer: &mut Peer, items: &[InventoryItem]) -> anyhow::Result<()> {
        self.inventory.record(items);
        request_announced(peer, items);
        Ok(())
    }

    fn on_close(&mut self, peer: &mut Peer) {
        debug!("Recorded close of peer {}", peer.id());
        self.close_count += 1;
    }
}
