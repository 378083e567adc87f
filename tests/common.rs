//! Shared fixtures for integration tests: a scripted mock node and a
//! deterministic PoW solver.
#![allow(dead_code)]

use pastel_mininode::network::protocol::{
    NetworkAddress, ProtocolParser, RejectMessage, VersionMessage, MAX_PROTOCOL_MESSAGE_LENGTH,
    MIN_CHECKSUM_VERSION,
};
use pastel_mininode::network::{InventoryItem, NetworkKind, ProtocolMessage};
use pastel_mininode::primitives::script::{OP_1NEGATE, OP_CHECKLOCKTIMEVERIFY, OP_DROP};
use pastel_mininode::primitives::{Block, PowSolver};
use pastel_mininode::wire::{double_sha256, Hash256};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Candidate = sha256d(prefix || nonce); one candidate per nonce
pub struct DigestSolver;

impl PowSolver for DigestSolver {
    fn generate_candidates(&self, prefix: &[u8], nonce: &Hash256) -> Vec<Vec<u8>> {
        let mut input = prefix.to_vec();
        input.extend_from_slice(nonce.as_bytes());
        vec![double_sha256(&input).to_vec()]
    }

    fn verify(&self, prefix: &[u8], nonce: &Hash256, solution: &[u8]) -> bool {
        self.generate_candidates(prefix, nonce)
            .iter()
            .any(|c| c.as_slice() == solution)
    }
}

/// Easy regtest-style target
pub const EASY_BITS: u32 = 0x200f0f0f;

/// How the mock node behaves
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub network: NetworkKind,
    /// Version the mock announces
    pub version: i32,
    pub answer_pings: bool,
    /// Pings the mock sends right after the handshake
    pub pings_after_verack: Vec<u64>,
    /// Once handshaken, wait for unread bytes and drop the socket so the
    /// kernel answers with a reset
    pub reset_after_verack: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            network: NetworkKind::Regtest,
            version: 170008,
            answer_pings: true,
            pings_after_verack: Vec::new(),
            reset_after_verack: false,
        }
    }
}

/// Single-connection peer on a local port that speaks just enough protocol
/// to handshake, answer pings and accept or reject blocks.
///
/// Blocks are rejected if they fail the PoW check with [`DigestSolver`] or
/// if any input script starts with the always-failing CLTV prefix.
/// Accepted blocks are announced back with an `inv`.
pub struct MockNode {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<ProtocolMessage>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockNode {
    pub fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let received = Arc::clone(&received);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let (stream, _) = match listener.accept() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                serve(stream, options, received, stop);
            })
        };

        Self {
            addr,
            received,
            stop,
            handle: Some(handle),
        }
    }

    /// Messages received so far
    pub fn received(&self) -> Vec<ProtocolMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.command() == command)
            .count()
    }

    pub fn wait_for(&self, timeout: Duration, mut predicate: impl FnMut(&[ProtocolMessage]) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if predicate(&self.received.lock().unwrap()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        predicate(&self.received.lock().unwrap())
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblock a pending accept
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn is_cltv_failing(block: &Block) -> bool {
    let prefix = [OP_1NEGATE, OP_CHECKLOCKTIMEVERIFY, OP_DROP];
    block
        .transactions
        .iter()
        .flat_map(|tx| tx.vin.iter())
        .any(|input| input.script_sig.starts_with(&prefix))
}

/// Block until the kernel holds bytes we have not read
fn wait_for_unread(stream: &TcpStream, stop: &AtomicBool) {
    let mut probe = [0u8; 1];
    while !stop.load(Ordering::SeqCst) {
        match stream.peek(&mut probe) {
            Ok(_) => return,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(_) => return,
        }
    }
}

fn serve(
    mut stream: TcpStream,
    options: MockOptions,
    received: Arc<Mutex<Vec<ProtocolMessage>>>,
    stop: Arc<AtomicBool>,
) {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let magic = options.network.magic();
    let mut checksum = true;
    let legacy_ping = options.version <= 60000;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let send = |stream: &mut TcpStream, msg: &ProtocolMessage, checksum: bool| {
        let frame = ProtocolParser::serialize_message(magic, msg, checksum);
        let _ = stream.write_all(&frame);
    };

    while !stop.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue
            }
            Err(_) => return,
        }

        loop {
            let parsed = match ProtocolParser::parse_frame(
                magic,
                &buf,
                checksum,
                MAX_PROTOCOL_MESSAGE_LENGTH,
            ) {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(_) => return,
            };
            let (frame, used) = parsed;
            buf.drain(..used);
            let Ok(msg) = ProtocolMessage::decode(&frame.command, &frame.payload, legacy_ping)
            else {
                continue;
            };
            received.lock().unwrap().push(msg.clone());

            match msg {
                ProtocolMessage::Version(_) => {
                    let reply = VersionMessage::new(
                        options.version,
                        1,
                        NetworkAddress::default(),
                        "/MockPastel:1.0/",
                        0,
                    );
                    send(&mut stream, &ProtocolMessage::Version(reply), true);
                    if options.version >= MIN_CHECKSUM_VERSION {
                        send(&mut stream, &ProtocolMessage::Verack, true);
                    } else {
                        checksum = false;
                    }
                }
                ProtocolMessage::Verack => {
                    for nonce in &options.pings_after_verack {
                        send(&mut stream, &ProtocolMessage::Ping(*nonce), checksum);
                    }
                    if options.reset_after_verack {
                        wait_for_unread(&stream, &stop);
                        return;
                    }
                }
                ProtocolMessage::Ping(nonce) if options.answer_pings => {
                    send(&mut stream, &ProtocolMessage::Pong(nonce), checksum);
                }
                ProtocolMessage::Block(block) => {
                    let hash = block.hash();
                    let reply = if is_cltv_failing(&block) || !block.is_valid(&DigestSolver) {
                        ProtocolMessage::Reject(RejectMessage::new(
                            "block",
                            RejectMessage::REJECT_INVALID,
                            "bad-block",
                            hash,
                        ))
                    } else {
                        ProtocolMessage::Inv(vec![InventoryItem::block(hash)])
                    };
                    send(&mut stream, &reply, checksum);
                }
                _ => {}
            }
        }
    }
}
