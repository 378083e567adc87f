//! Network layer for the harness
//!
//! Connections, message dispatch and the network thread. Test logic and the
//! network thread share one [`PeerManager`] behind a single
//! `parking_lot::Mutex`; the lock is held to deliver messages, to queue
//! outgoing bytes and to touch negotiated versions, and never across socket
//! I/O. The lock is not reentrant: handlers and code already holding
//! [`NetworkManager::lock`] must not call back into the [`NetworkManager`].

pub mod dispatcher;
pub mod error;
pub mod inventory;
pub mod peer;
pub mod protocol;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures::future::select_all;
use parking_lot::{Mutex, MutexGuard};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;

pub use dispatcher::{dispatch, DefaultHandler, NodeHandler, RecordingHandler};
pub use error::{NetworkError, NetworkResult};
pub use inventory::InventoryItem;
pub use peer::{ConnectionId, ConnectionState, Peer, PeerStats};
pub use protocol::{NetworkKind, ProtocolMessage, ProtocolParser};

/// Read size for one socket read
const READ_CHUNK_SIZE: usize = 8192;

/// Reads per socket in one pass before moving on
const MAX_READS_PER_PASS: usize = 64;

/// How often [`NetworkManager::wait_until`] re-checks its predicate
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct PeerSlot<H> {
    peer: Peer,
    handler: H,
    /// Connected socket not yet adopted by the network thread
    pending_socket: Option<std::net::TcpStream>,
}

/// Registry of connections and their handlers
pub struct PeerManager<H> {
    slots: HashMap<ConnectionId, PeerSlot<H>>,
    next_id: ConnectionId,
}

impl<H: NodeHandler> Default for PeerManager<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: NodeHandler> PeerManager<H> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a new connection; its `version` is queued immediately
    pub fn register(&mut self, addr: SocketAddr, handler: H, config: &HarnessConfig) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(
            id,
            PeerSlot {
                peer: Peer::new(id, addr, config),
                handler,
                pending_socket: None,
            },
        );
        id
    }

    pub fn peer(&self, id: ConnectionId) -> Option<&Peer> {
        self.slots.get(&id).map(|s| &s.peer)
    }

    pub fn peer_mut(&mut self, id: ConnectionId) -> Option<&mut Peer> {
        self.slots.get_mut(&id).map(|s| &mut s.peer)
    }

    pub fn handler(&self, id: ConnectionId) -> Option<&H> {
        self.slots.get(&id).map(|s| &s.handler)
    }

    pub fn handler_mut(&mut self, id: ConnectionId) -> Option<&mut H> {
        self.slots.get_mut(&id).map(|s| &mut s.handler)
    }

    /// Both halves of a connection at once
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<(&mut Peer, &mut H)> {
        self.slots
            .get_mut(&id)
            .map(|s| (&mut s.peer, &mut s.handler))
    }

    /// All registered ids, including closed connections
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Connections that are not yet closed
    pub fn live_count(&self) -> usize {
        self.slots.values().filter(|s| !s.peer.is_closed()).count()
    }

    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.slots.get(&id).is_some_and(|s| !s.peer.is_closed())
    }

    /// Close a connection and run its handler's close hook
    pub fn close(&mut self, id: ConnectionId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.pending_socket = None;
            slot.peer.handle_close(&mut slot.handler);
        }
    }

    /// Deregister connection `id`, closing it first if it is still live.
    ///
    /// The peer and handler are handed back for inspection. The network
    /// thread drops the socket of a removed connection on its next pass.
    pub fn remove(&mut self, id: ConnectionId) -> Option<(Peer, H)> {
        self.close(id);
        let slot = self.slots.remove(&id)?;
        debug!("Removed peer {} ({})", id, slot.peer.addr());
        Some((slot.peer, slot.handler))
    }

    /// Close every live connection flagged for disconnect
    pub fn close_requested(&mut self) -> usize {
        let flagged: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, s)| s.peer.disconnect_requested() && !s.peer.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in &flagged {
            self.close(*id);
        }
        flagged.len()
    }

    /// Feed bytes read from a socket; a framing violation closes the connection
    pub fn deliver(&mut self, id: ConnectionId, data: &[u8]) -> NetworkResult<()> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(NetworkError::UnknownConnection(id))?;
        let PeerSlot { peer, handler, .. } = slot;
        if let Err(e) = peer.receive(data, handler) {
            warn!("Closing peer {} ({}): {}", id, peer.addr(), e);
            peer.handle_close(handler);
            return Err(e);
        }
        Ok(())
    }

    fn attach_socket(&mut self, id: ConnectionId, socket: std::net::TcpStream) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) if !slot.peer.is_closed() => {
                slot.pending_socket = Some(socket);
                true
            }
            _ => false,
        }
    }

    fn take_pending_sockets(&mut self) -> Vec<(ConnectionId, std::net::TcpStream)> {
        self.slots
            .iter_mut()
            .filter_map(|(id, s)| s.pending_socket.take().map(|sock| (*id, sock)))
            .collect()
    }

    /// Snapshot of unsent bytes for connected peers
    fn pending_writes(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.slots
            .iter()
            .filter(|(_, s)| s.peer.is_connected() && s.peer.has_pending_send())
            .map(|(id, s)| (*id, s.peer.pending_send().to_vec()))
            .collect()
    }

    fn consume_sent(&mut self, id: ConnectionId, n: usize) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.peer.consume_sent(n);
        }
    }
}

/// Handle to the shared connection registry and the network thread
pub struct NetworkManager<H> {
    shared: Arc<Mutex<PeerManager<H>>>,
    config: HarnessConfig,
}

impl<H> Clone for NetworkManager<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
        }
    }
}

impl<H: NodeHandler + 'static> NetworkManager<H> {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(PeerManager::new())),
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Open a connection to `addr` served by `handler`.
    ///
    /// The connection is registered with its `version` queued before the
    /// socket is opened. A failed connect closes it straight away and runs
    /// the handler's close hook; the returned id stays valid either way.
    pub fn connect(&self, addr: SocketAddr, handler: H) -> ConnectionId {
        let id = self.shared.lock().register(addr, handler, &self.config);

        match open_socket(addr, self.config.connect_timeout()) {
            Ok(socket) => {
                if !self.shared.lock().attach_socket(id, socket) {
                    debug!("Peer {} closed before its socket was ready", id);
                }
            }
            Err(e) => {
                warn!("Could not connect to {}: {}", addr, e);
                self.shared.lock().close(id);
            }
        }
        id
    }

    /// Spawn the network thread.
    ///
    /// The thread runs until no live connection remains.
    pub fn start(&self) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        let shared = Arc::clone(&self.shared);
        let poll_interval = self.config.poll_interval();
        let handle = std::thread::Builder::new()
            .name("mininode-network".to_string())
            .spawn(move || -> anyhow::Result<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(run_network_loop(shared, poll_interval));
                Ok(())
            })?;
        Ok(handle)
    }

    /// Queue `message` on connection `id`
    pub fn send(&self, id: ConnectionId, message: &ProtocolMessage) -> NetworkResult<()> {
        let mut manager = self.shared.lock();
        let peer = manager
            .peer_mut(id)
            .ok_or(NetworkError::UnknownConnection(id))?;
        peer.try_send_message(message)
    }

    /// Flag connection `id`; the network thread closes it on its next pass
    pub fn disconnect(&self, id: ConnectionId) -> NetworkResult<()> {
        let mut manager = self.shared.lock();
        let peer = manager
            .peer_mut(id)
            .ok_or(NetworkError::UnknownConnection(id))?;
        peer.request_disconnect();
        Ok(())
    }

    /// Deregister connection `id` and return its peer and handler.
    ///
    /// A live connection is closed first and its close hook runs.
    pub fn remove(&self, id: ConnectionId) -> NetworkResult<(Peer, H)> {
        self.shared
            .lock()
            .remove(id)
            .ok_or(NetworkError::UnknownConnection(id))
    }

    /// Run `f` on connection `id` and its handler under the shared lock.
    ///
    /// `f` must not call back into this manager.
    pub fn with_connection<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut Peer, &mut H) -> R,
    ) -> NetworkResult<R> {
        let mut manager = self.shared.lock();
        let (peer, handler) = manager
            .connection_mut(id)
            .ok_or(NetworkError::UnknownConnection(id))?;
        Ok(f(peer, handler))
    }

    /// State of connection `id`
    pub fn state(&self, id: ConnectionId) -> NetworkResult<ConnectionState> {
        self.with_connection(id, |peer, _| peer.state())
    }

    /// Take the shared lock.
    ///
    /// The lock is not reentrant. Calling any other method of this manager
    /// while the guard is alive deadlocks, and so does holding the guard
    /// while waiting on the network thread.
    pub fn lock(&self) -> MutexGuard<'_, PeerManager<H>> {
        self.shared.lock()
    }

    /// Poll `predicate` under the lock until it holds or `timeout` passes.
    ///
    /// `predicate` runs with the lock held and must not call back into this
    /// manager.
    pub fn wait_until(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&mut PeerManager<H>) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&mut *self.shared.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

fn open_socket(addr: SocketAddr, timeout: Duration) -> io::Result<std::net::TcpStream> {
    let socket = std::net::TcpStream::connect_timeout(&addr, timeout)?;
    socket.set_nodelay(true)?;
    Ok(socket)
}

fn adopt_socket(socket: std::net::TcpStream) -> io::Result<TcpStream> {
    socket.set_nonblocking(true)?;
    TcpStream::from_std(socket)
}

/// Body of the network thread
async fn run_network_loop<H: NodeHandler>(
    shared: Arc<Mutex<PeerManager<H>>>,
    poll_interval: Duration,
) {
    info!("Network thread started");
    let mut sockets: HashMap<ConnectionId, TcpStream> = HashMap::new();

    loop {
        let writes = {
            let mut manager = shared.lock();
            let closed = manager.close_requested();
            if closed > 0 {
                debug!("Closed {} connection(s) on request", closed);
            }

            for (id, socket) in manager.take_pending_sockets() {
                match adopt_socket(socket) {
                    Ok(stream) => {
                        sockets.insert(id, stream);
                        if let Some(peer) = manager.peer_mut(id) {
                            peer.mark_connected();
                        }
                    }
                    Err(e) => {
                        warn!("Could not register socket for peer {}: {}", id, e);
                        manager.close(id);
                    }
                }
            }
            sockets.retain(|id, _| manager.is_live(*id));

            if manager.live_count() == 0 {
                break;
            }
            manager.pending_writes()
        };

        flush_writes(&shared, &sockets, writes);

        if sockets.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }
        let readiness = sockets.values().map(|s| Box::pin(s.readable()));
        let _ = tokio::time::timeout(poll_interval, select_all(readiness)).await;

        read_available(&shared, &sockets);
    }

    info!("Network thread stopped: no live connections");
}

fn flush_writes<H: NodeHandler>(
    shared: &Mutex<PeerManager<H>>,
    sockets: &HashMap<ConnectionId, TcpStream>,
    writes: Vec<(ConnectionId, Vec<u8>)>,
) {
    let mut written = Vec::new();
    let mut failed = Vec::new();
    for (id, data) in writes {
        let Some(socket) = sockets.get(&id) else {
            continue;
        };
        match socket.try_write(&data) {
            Ok(n) => written.push((id, n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!("Write to peer {} failed: {}", id, e);
                failed.push(id);
            }
        }
    }

    if written.is_empty() && failed.is_empty() {
        return;
    }
    let mut manager = shared.lock();
    for (id, n) in written {
        manager.consume_sent(id, n);
    }
    for id in failed {
        manager.close(id);
    }
}

fn read_available<H: NodeHandler>(
    shared: &Mutex<PeerManager<H>>,
    sockets: &HashMap<ConnectionId, TcpStream>,
) {
    let mut received: Vec<(ConnectionId, Vec<u8>)> = Vec::new();
    let mut eof = Vec::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    for (id, socket) in sockets {
        let mut data = Vec::new();
        for _ in 0..MAX_READS_PER_PASS {
            match socket.try_read(&mut buf) {
                Ok(0) => {
                    eof.push(*id);
                    break;
                }
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("Read from peer {} failed, retrying next pass: {}", id, e);
                    break;
                }
            }
        }
        if !data.is_empty() {
            received.push((*id, data));
        }
    }

    if received.is_empty() && eof.is_empty() {
        return;
    }
    let mut manager = shared.lock();
    for (id, data) in received {
        // Violations are logged and closed inside deliver
        let _ = manager.deliver(id, &data);
    }
    for id in eof {
        debug!("Peer {} closed the connection", id);
        manager.close(id);
    }
}
