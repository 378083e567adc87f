//! Connect to a running node, complete the handshake and log its traffic
//!
//! ```text
//! p2p-probe --connect 127.0.0.1:18344 --network regtest --duration-secs 10 --ping
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use pastel_mininode::network::protocol::NetworkKind;
use pastel_mininode::network::{NetworkManager, NodeHandler, Peer, ProtocolMessage};
use pastel_mininode::utils::init_logging_from_config;
use pastel_mininode::HarnessConfig;

#[derive(Parser, Debug)]
#[command(name = "p2p-probe", about = "Handshake with a node and log what it sends")]
struct Args {
    /// Node address (host:port)
    #[arg(long)]
    connect: SocketAddr,

    /// Network magic to use; overrides the config file
    #[arg(long)]
    network: Option<NetworkKind>,

    /// How long to stay connected after the handshake
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Harness config file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send a ping once the handshake completes
    #[arg(long)]
    ping: bool,
}

#[derive(Default)]
struct ProbeHandler {
    counts: BTreeMap<&'static str, usize>,
    ping_sent: Option<(u64, Instant)>,
}

impl NodeHandler for ProbeHandler {
    fn on_message(&mut self, peer: &mut Peer, message: &ProtocolMessage) -> anyhow::Result<()> {
        *self.counts.entry(message.command()).or_default() += 1;
        info!("{} -> {}", peer.addr(), message);
        Ok(())
    }

    fn on_pong(&mut self, _peer: &mut Peer, nonce: u64) -> anyhow::Result<()> {
        if let Some((sent, at)) = self.ping_sent {
            if sent == nonce {
                info!("Ping round trip {:?}", at.elapsed());
            }
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(network) = args.network {
        config.network = network;
    }
    config.validate()?;
    init_logging_from_config(config.logging.as_ref());

    let timeout = config.connect_timeout() * 2;
    let net = NetworkManager::new(config);
    let id = net.connect(args.connect, ProbeHandler::default());
    let driver = net.start()?;

    let ready = net.wait_until(timeout, |m| {
        m.peer(id)
            .is_some_and(|p| p.verack_received() || p.is_closed())
    });
    let connected = net.with_connection(id, |p, _| p.verack_received())?;
    if !ready || !connected {
        net.disconnect(id)?;
        let _ = driver.join();
        anyhow::bail!("handshake with {} did not complete", args.connect);
    }
    info!("Handshake with {} complete", args.connect);

    if args.ping {
        let nonce = rand::random();
        net.with_connection(id, |peer, handler| {
            if peer.send_message(&ProtocolMessage::Ping(nonce)) {
                handler.ping_sent = Some((nonce, Instant::now()));
            }
        })?;
    }

    std::thread::sleep(Duration::from_secs(args.duration_secs));
    net.disconnect(id)?;
    driver
        .join()
        .map_err(|_| anyhow::anyhow!("network thread panicked"))??;

    let counts = net.with_connection(id, |_, handler| handler.counts.clone())?;
    println!("{:<12} {:>8}", "command", "count");
    for (command, count) in counts {
        println!("{:<12} {:>8}", command, count);
    }
    Ok(())
}
