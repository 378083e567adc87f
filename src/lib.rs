//! Pastel P2P test harness
//!
//! A minimal peer for exercising a Pastel (Zcash-derived) node over its
//! peer-to-peer protocol from test scenarios. It provides:
//!
//! 1. **Wire codec**: compact sizes, bounded reads, hashes
//! 2. **Primitives**: versioned transactions (Sprout, Overwinter, Sapling),
//!    blocks with an injectable proof-of-work solver, scenario builders
//! 3. **Network**: the message catalog and framing, per-connection state,
//!    overridable handlers and a network thread sharing one lock with test
//!    logic
//!
//! ```no_run
//! use std::time::Duration;
//! use pastel_mininode::{HarnessConfig, NetworkManager, RecordingHandler};
//!
//! # fn main() -> anyhow::Result<()> {
//! let net = NetworkManager::new(HarnessConfig::default());
//! let id = net.connect("127.0.0.1:18344".parse()?, RecordingHandler::new());
//! let driver = net.start()?;
//! net.wait_until(Duration::from_secs(10), |m| {
//!     m.peer(id).is_some_and(|p| p.verack_received())
//! });
//! net.disconnect(id)?;
//! driver.join().map_err(|_| anyhow::anyhow!("network thread panicked"))??;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod network;
pub mod primitives;
pub mod utils;
pub mod wire;

pub use config::{HarnessConfig, LoggingConfig};
pub use network::{
    ConnectionId, ConnectionState, DefaultHandler, NetworkError, NetworkManager, NetworkResult,
    NodeHandler, Peer, PeerManager, ProtocolMessage, RecordingHandler,
};
pub use primitives::{Block, BlockHeader, PowSolver, Transaction};
pub use wire::{CodecError, Hash256};
