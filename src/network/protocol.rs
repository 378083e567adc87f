//! Pastel P2P protocol messages and framing
//!
//! Every message type encodes and decodes its own body; [`ProtocolMessage`]
//! is the closed catalog and [`ProtocolParser`] turns bodies into frames and
//! back.
//!
//! Frame layout: `magic(4) | command(12, NUL-padded) | length(4, LE) |
//! checksum(4) | body`. Connections that have only negotiated a version below
//! [`MIN_CHECKSUM_VERSION`] use the legacy layout without the checksum field.

use std::borrow::Cow;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use super::error::{NetworkError, NetworkResult};
use super::inventory::InventoryItem;
use crate::primitives::{Block, BlockHeader, Transaction};
use crate::utils::current_timestamp;
use crate::wire::{
    double_sha256, put_compact_size, put_var_bytes, put_vec, put_vec_with, CodecResult,
    Decodable, Encodable, Hash256, WireReader,
};

/// Network magic bytes
pub const MAGIC_MAINNET: [u8; 4] = [0x6b, 0xda, 0xb8, 0xfc];
pub const MAGIC_TESTNET: [u8; 4] = [0x38, 0xb6, 0xfe, 0x64];
pub const MAGIC_REGTEST: [u8; 4] = [0xcd, 0xd8, 0xfa, 0x9e];

/// Protocol versions
pub const MIN_ADDR_FROM_VERSION: i32 = 106;
pub const MIN_CHECKSUM_VERSION: i32 = 209;
pub const BIP0031_VERSION: i32 = 60000;
pub const SPROUT_PROTO_VERSION: i32 = 170002;
pub const OVERWINTER_PROTO_VERSION: i32 = 170003;
pub const SAPLING_PROTO_VERSION: i32 = 170006;
pub const BLOSSOM_PROTO_VERSION: i32 = 170008;

/// A 10300 in a received `version` means 300
const VERSION_10300: i32 = 10300;

/// Default user agent announced in `version`
pub const MY_SUBVERSION: &str = "/rust-mininode-tester:0.1.0/";

/// Frame header sizes
pub const COMMAND_SIZE: usize = 12;
pub const MESSAGE_HEADER_SIZE: usize = 24;
pub const LEGACY_MESSAGE_HEADER_SIZE: usize = 20;

/// Default upper bound on a frame body
pub const MAX_PROTOCOL_MESSAGE_LENGTH: usize = 2 * 1024 * 1024;

/// Commands the catalog can decode
pub const ALLOWED_COMMANDS: &[&str] = &[
    "version",
    "verack",
    "addr",
    "alert",
    "inv",
    "getdata",
    "notfound",
    "getblocks",
    "tx",
    "block",
    "getaddr",
    "ping",
    "pong",
    "headers",
    "getheaders",
    "reject",
    "mempool",
    "filteradd",
    "filterclear",
];

/// Which chain a peer runs; selects the frame magic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Mainnet,
    #[serde(alias = "testnet3")]
    Testnet,
    #[default]
    Regtest,
}

impl NetworkKind {
    pub fn magic(&self) -> [u8; 4] {
        match self {
            NetworkKind::Mainnet => MAGIC_MAINNET,
            NetworkKind::Testnet => MAGIC_TESTNET,
            NetworkKind::Regtest => MAGIC_REGTEST,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Mainnet => "mainnet",
            NetworkKind::Testnet => "testnet",
            NetworkKind::Regtest => "regtest",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkKind::Mainnet),
            "testnet" | "testnet3" | "test" => Ok(NetworkKind::Testnet),
            "regtest" => Ok(NetworkKind::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Network address as carried in `version` and `addr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub services: u64,
    /// IPv4-mapped prefix: ten zero bytes then `ff ff`
    pub reserved: [u8; 12],
    pub ip: Ipv4Addr,
    /// Big-endian on the wire
    pub port: u16,
}

const MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

impl Default for NetworkAddress {
    fn default() -> Self {
        Self {
            services: 1,
            reserved: MAPPED_PREFIX,
            ip: Ipv4Addr::UNSPECIFIED,
            port: 0,
        }
    }
}

impl NetworkAddress {
    /// IPv6 peers without an IPv4 mapping are announced as 0.0.0.0
    pub fn from_socket_addr(addr: SocketAddr, services: u64) -> Self {
        let ip = match addr {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        Self {
            services,
            reserved: MAPPED_PREFIX,
            ip,
            port: addr.port(),
        }
    }
}

impl Encodable for NetworkAddress {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.services);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.ip.octets());
        buf.put_u16(self.port);
    }
}

impl Decodable for NetworkAddress {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            services: reader.read_u64_le()?,
            reserved: reader.read_array()?,
            ip: Ipv4Addr::from(reader.read_array::<4>()?),
            port: reader.read_u16_be()?,
        })
    }
}

/// `version` message.
///
/// Fields after `addr_recv` depend on the announced version: `addr_from`,
/// `nonce` and `user_agent` from 106, `start_height` from 209. Decoded
/// messages leave absent fields as `None`; encoding follows the same gating
/// and fills any missing field with its default. `user_agent` keeps the raw
/// bytes the peer sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetworkAddress,
    pub addr_from: Option<NetworkAddress>,
    pub nonce: Option<u64>,
    pub user_agent: Option<Vec<u8>>,
    pub start_height: Option<i32>,
}

impl VersionMessage {
    /// Outgoing handshake with a fresh random nonce and the current time
    pub fn new(
        version: i32,
        services: u64,
        addr_recv: NetworkAddress,
        user_agent: &str,
        start_height: i32,
    ) -> Self {
        Self {
            version,
            services,
            timestamp: current_timestamp() as i64,
            addr_recv,
            addr_from: Some(NetworkAddress::default()),
            nonce: Some(rand::random()),
            user_agent: Some(user_agent.as_bytes().to_vec()),
            start_height: Some(start_height),
        }
    }

    /// `user_agent` for display; invalid UTF-8 is replaced
    pub fn user_agent_lossy(&self) -> Option<Cow<'_, str>> {
        self.user_agent.as_deref().map(String::from_utf8_lossy)
    }
}

impl Encodable for VersionMessage {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.version);
        buf.put_u64_le(self.services);
        buf.put_i64_le(self.timestamp);
        self.addr_recv.encode(buf);
        if self.version >= MIN_ADDR_FROM_VERSION {
            self.addr_from.unwrap_or_default().encode(buf);
            buf.put_u64_le(self.nonce.unwrap_or(0));
            put_var_bytes(buf, self.user_agent.as_deref().unwrap_or_default());
            if self.version >= MIN_CHECKSUM_VERSION {
                buf.put_i32_le(self.start_height.unwrap_or(-1));
            }
        }
    }
}

impl Decodable for VersionMessage {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let mut version = reader.read_i32_le()?;
        if version == VERSION_10300 {
            version = 300;
        }
        let mut msg = Self {
            version,
            services: reader.read_u64_le()?,
            timestamp: reader.read_i64_le()?,
            addr_recv: NetworkAddress::decode(reader)?,
            addr_from: None,
            nonce: None,
            user_agent: None,
            start_height: None,
        };
        if version >= MIN_ADDR_FROM_VERSION {
            msg.addr_from = Some(NetworkAddress::decode(reader)?);
            msg.nonce = Some(reader.read_u64_le()?);
            msg.user_agent = Some(reader.read_var_bytes()?);
            if version >= MIN_CHECKSUM_VERSION {
                msg.start_height = Some(reader.read_i32_le()?);
            }
        }
        Ok(msg)
    }
}

/// Alert payload as signed by the alert key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedAlert {
    pub version: i32,
    pub relay_until: i64,
    pub expiration: i64,
    pub id: i32,
    pub cancel: i32,
    pub set_cancel: Vec<i32>,
    pub min_ver: i32,
    pub max_ver: i32,
    pub set_sub_ver: Vec<Vec<u8>>,
    pub priority: i32,
    pub comment: Vec<u8>,
    pub status_bar: Vec<u8>,
    pub reserved: Vec<u8>,
}

impl Default for UnsignedAlert {
    fn default() -> Self {
        Self {
            version: 1,
            relay_until: 0,
            expiration: 0,
            id: 0,
            cancel: 0,
            set_cancel: Vec::new(),
            min_ver: 0,
            max_ver: 0,
            set_sub_ver: Vec::new(),
            priority: 0,
            comment: Vec::new(),
            status_bar: Vec::new(),
            reserved: Vec::new(),
        }
    }
}

impl Encodable for UnsignedAlert {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.version);
        buf.put_i64_le(self.relay_until);
        buf.put_i64_le(self.expiration);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.cancel);
        put_vec_with(buf, &self.set_cancel, |b, v| b.put_i32_le(*v));
        buf.put_i32_le(self.min_ver);
        buf.put_i32_le(self.max_ver);
        put_vec_with(buf, &self.set_sub_ver, |b, s| put_var_bytes(b, s));
        buf.put_i32_le(self.priority);
        put_var_bytes(buf, &self.comment);
        put_var_bytes(buf, &self.status_bar);
        put_var_bytes(buf, &self.reserved);
    }
}

impl Decodable for UnsignedAlert {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            version: reader.read_i32_le()?,
            relay_until: reader.read_i64_le()?,
            expiration: reader.read_i64_le()?,
            id: reader.read_i32_le()?,
            cancel: reader.read_i32_le()?,
            set_cancel: reader.read_vec_with(4, |r| r.read_i32_le())?,
            min_ver: reader.read_i32_le()?,
            max_ver: reader.read_i32_le()?,
            set_sub_ver: reader.read_vec_with(1, |r| r.read_var_bytes())?,
            priority: reader.read_i32_le()?,
            comment: reader.read_var_bytes()?,
            status_bar: reader.read_var_bytes()?,
            reserved: reader.read_var_bytes()?,
        })
    }
}

/// `alert`: opaque serialized [`UnsignedAlert`] plus its signature
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlertMessage {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl AlertMessage {
    pub fn new(alert: &UnsignedAlert, signature: Vec<u8>) -> Self {
        Self {
            payload: alert.to_bytes(),
            signature,
        }
    }

    /// Decode the payload
    pub fn unsigned(&self) -> CodecResult<UnsignedAlert> {
        UnsignedAlert::from_wire(&self.payload)
    }
}

/// Locator for `getblocks` / `getheaders`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocator {
    pub version: i32,
    pub have: Vec<Hash256>,
}

impl Default for BlockLocator {
    fn default() -> Self {
        Self {
            version: BLOSSOM_PROTO_VERSION,
            have: Vec::new(),
        }
    }
}

impl Encodable for BlockLocator {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.version);
        put_vec(buf, &self.have);
    }
}

impl Decodable for BlockLocator {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            version: reader.read_i32_le()?,
            have: reader.read_vec()?,
        })
    }
}

/// Body shared by `getblocks` and `getheaders`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocatorMessage {
    pub locator: BlockLocator,
    pub hash_stop: Hash256,
}

impl Encodable for LocatorMessage {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.locator.encode(buf);
        self.hash_stop.encode(buf);
    }
}

impl Decodable for LocatorMessage {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            locator: BlockLocator::decode(reader)?,
            hash_stop: reader.read_hash()?,
        })
    }
}

/// `reject`; the hash trailer exists only for rejected `block` and `tx`.
///
/// `message` and `reason` hold the peer's bytes unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RejectMessage {
    pub message: Vec<u8>,
    pub code: u8,
    pub reason: Vec<u8>,
    pub data: Hash256,
}

impl RejectMessage {
    pub const REJECT_MALFORMED: u8 = 0x01;
    pub const REJECT_INVALID: u8 = 0x10;
    pub const REJECT_OBSOLETE: u8 = 0x11;
    pub const REJECT_DUPLICATE: u8 = 0x12;
    pub const REJECT_NONSTANDARD: u8 = 0x40;

    pub fn new(message: &str, code: u8, reason: &str, data: Hash256) -> Self {
        Self {
            message: message.as_bytes().to_vec(),
            code,
            reason: reason.as_bytes().to_vec(),
            data,
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self.message.as_slice(), b"block" | b"tx")
    }

    pub fn message_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    pub fn reason_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.reason)
    }
}

impl Encodable for RejectMessage {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_var_bytes(buf, &self.message);
        buf.put_u8(self.code);
        put_var_bytes(buf, &self.reason);
        if self.has_data() {
            self.data.encode(buf);
        }
    }
}

impl Decodable for RejectMessage {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let mut msg = Self {
            message: reader.read_var_bytes()?,
            code: reader.read_u8()?,
            reason: reader.read_var_bytes()?,
            data: Hash256::ZERO,
        };
        if msg.has_data() {
            msg.data = reader.read_hash()?;
        }
        Ok(msg)
    }
}

/// Smallest encoding of a block inside `headers`: header with an empty
/// solution plus the transaction count
const MIN_HEADERS_ENTRY_SIZE: usize = 108 + 32 + 1 + 1;

/// The message catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    Version(VersionMessage),
    Verack,
    Addr(Vec<NetworkAddress>),
    Alert(AlertMessage),
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),
    NotFound(Vec<InventoryItem>),
    GetBlocks(LocatorMessage),
    GetHeaders(LocatorMessage),
    Tx(Transaction),
    Block(Block),
    GetAddr,
    /// BIP31 ping with nonce
    Ping(u64),
    /// Pre-BIP31 ping with an empty body
    PingLegacy,
    Pong(u64),
    /// Carried on the wire as blocks with no transactions
    Headers(Vec<BlockHeader>),
    Reject(RejectMessage),
    Mempool,
    /// Element to add to the peer's bloom filter
    FilterAdd(Vec<u8>),
    FilterClear,
}

impl ProtocolMessage {
    /// Command name used for framing and dispatch
    pub fn command(&self) -> &'static str {
        match self {
            ProtocolMessage::Version(_) => "version",
            ProtocolMessage::Verack => "verack",
            ProtocolMessage::Addr(_) => "addr",
            ProtocolMessage::Alert(_) => "alert",
            ProtocolMessage::Inv(_) => "inv",
            ProtocolMessage::GetData(_) => "getdata",
            ProtocolMessage::NotFound(_) => "notfound",
            ProtocolMessage::GetBlocks(_) => "getblocks",
            ProtocolMessage::GetHeaders(_) => "getheaders",
            ProtocolMessage::Tx(_) => "tx",
            ProtocolMessage::Block(_) => "block",
            ProtocolMessage::GetAddr => "getaddr",
            ProtocolMessage::Ping(_) | ProtocolMessage::PingLegacy => "ping",
            ProtocolMessage::Pong(_) => "pong",
            ProtocolMessage::Headers(_) => "headers",
            ProtocolMessage::Reject(_) => "reject",
            ProtocolMessage::Mempool => "mempool",
            ProtocolMessage::FilterAdd(_) => "filteradd",
            ProtocolMessage::FilterClear => "filterclear",
        }
    }

    /// Encoded message body, without the frame header
    pub fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ProtocolMessage::Version(msg) => msg.encode(&mut buf),
            ProtocolMessage::Verack
            | ProtocolMessage::GetAddr
            | ProtocolMessage::PingLegacy
            | ProtocolMessage::Mempool
            | ProtocolMessage::FilterClear => {}
            ProtocolMessage::Addr(addrs) => put_vec(&mut buf, addrs),
            ProtocolMessage::Alert(alert) => {
                put_var_bytes(&mut buf, &alert.payload);
                put_var_bytes(&mut buf, &alert.signature);
            }
            ProtocolMessage::Inv(items)
            | ProtocolMessage::GetData(items)
            | ProtocolMessage::NotFound(items) => put_vec(&mut buf, items),
            ProtocolMessage::GetBlocks(msg) | ProtocolMessage::GetHeaders(msg) => {
                msg.encode(&mut buf)
            }
            ProtocolMessage::Tx(tx) => tx.encode(&mut buf),
            ProtocolMessage::Block(block) => block.encode(&mut buf),
            ProtocolMessage::Ping(nonce) | ProtocolMessage::Pong(nonce) => {
                buf.put_u64_le(*nonce)
            }
            ProtocolMessage::Headers(headers) => {
                put_vec_with(&mut buf, headers, |b, header| {
                    header.encode(b);
                    put_compact_size(b, 0);
                });
            }
            ProtocolMessage::Reject(msg) => msg.encode(&mut buf),
            ProtocolMessage::FilterAdd(data) => put_var_bytes(&mut buf, data),
        }
        buf
    }

    /// Decode a body for `command`.
    ///
    /// `legacy_ping` selects the empty pre-BIP31 `ping` body. Bytes after the
    /// decoded fields are ignored, since newer peers append fields older
    /// decoders do not know.
    pub fn decode(command: &str, payload: &[u8], legacy_ping: bool) -> NetworkResult<Self> {
        let mut r = WireReader::new(payload);
        let msg = match command {
            "version" => ProtocolMessage::Version(VersionMessage::decode(&mut r)?),
            "verack" => ProtocolMessage::Verack,
            "addr" => ProtocolMessage::Addr(r.read_vec()?),
            "alert" => ProtocolMessage::Alert(AlertMessage {
                payload: r.read_var_bytes()?,
                signature: r.read_var_bytes()?,
            }),
            "inv" => ProtocolMessage::Inv(r.read_vec()?),
            "getdata" => ProtocolMessage::GetData(r.read_vec()?),
            "notfound" => ProtocolMessage::NotFound(r.read_vec()?),
            "getblocks" => ProtocolMessage::GetBlocks(LocatorMessage::decode(&mut r)?),
            "getheaders" => ProtocolMessage::GetHeaders(LocatorMessage::decode(&mut r)?),
            "tx" => ProtocolMessage::Tx(Transaction::decode(&mut r)?),
            "block" => ProtocolMessage::Block(Block::decode(&mut r)?),
            "getaddr" => ProtocolMessage::GetAddr,
            "ping" if legacy_ping => ProtocolMessage::PingLegacy,
            "ping" => ProtocolMessage::Ping(r.read_u64_le()?),
            "pong" => ProtocolMessage::Pong(r.read_u64_le()?),
            "headers" => ProtocolMessage::Headers(
                r.read_vec_with(MIN_HEADERS_ENTRY_SIZE, |r| Block::decode(r).map(|b| b.header))?,
            ),
            "reject" => ProtocolMessage::Reject(RejectMessage::decode(&mut r)?),
            "mempool" => ProtocolMessage::Mempool,
            "filteradd" => ProtocolMessage::FilterAdd(r.read_var_bytes()?),
            "filterclear" => ProtocolMessage::FilterClear,
            other => return Err(NetworkError::UnknownCommand(other.to_string())),
        };
        Ok(msg)
    }
}

impl fmt::Display for ProtocolMessage {
    /// Short one-line summary for logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMessage::Version(v) => write!(
                f,
                "version(version={} services={} user_agent={:?} start_height={:?})",
                v.version,
                v.services,
                v.user_agent_lossy(),
                v.start_height
            ),
            ProtocolMessage::Addr(a) => write!(f, "addr({} entries)", a.len()),
            ProtocolMessage::Inv(i) => write!(f, "inv({} items)", i.len()),
            ProtocolMessage::GetData(i) => write!(f, "getdata({} items)", i.len()),
            ProtocolMessage::NotFound(i) => write!(f, "notfound({} items)", i.len()),
            ProtocolMessage::Tx(tx) => write!(f, "tx({})", tx.txid()),
            ProtocolMessage::Block(b) => {
                write!(f, "block({}, {} txs)", b.hash(), b.transactions.len())
            }
            ProtocolMessage::Headers(h) => write!(f, "headers({} entries)", h.len()),
            ProtocolMessage::Ping(n) => write!(f, "ping(nonce={:#018x})", n),
            ProtocolMessage::Pong(n) => write!(f, "pong(nonce={:#018x})", n),
            ProtocolMessage::Reject(r) => {
                write!(
                f,
                "reject({} code={:#04x} reason={})",
                r.message_lossy(),
                r.code,
                r.reason_lossy()
            )
            }
            ProtocolMessage::FilterAdd(d) => write!(f, "filteradd({} bytes)", d.len()),
            other => f.write_str(other.command()),
        }
    }
}

/// A complete frame split into command and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: String,
    pub payload: Vec<u8>,
}

/// Frame encoder and parser
pub struct ProtocolParser;

impl ProtocolParser {
    /// Frame `message` for the given magic.
    ///
    /// `with_checksum` is false only while the negotiated send version is
    /// below [`MIN_CHECKSUM_VERSION`].
    pub fn serialize_message(magic: [u8; 4], message: &ProtocolMessage, with_checksum: bool) -> Vec<u8> {
        let payload = message.encode_body();
        let command = message.command();
        let mut frame = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());

        frame.extend_from_slice(&magic);

        let mut command_bytes = [0u8; COMMAND_SIZE];
        command_bytes[..command.len()].copy_from_slice(command.as_bytes());
        frame.extend_from_slice(&command_bytes);

        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        if with_checksum {
            frame.extend_from_slice(&Self::calculate_checksum(&payload));
        }
        frame.extend_from_slice(&payload);
        frame
    }

    /// Try to split one frame off the front of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, or the frame and the
    /// number of bytes it occupied. Bad magic, a bad checksum or a body over
    /// `max_length` is a [`NetworkError::ProtocolViolation`].
    pub fn parse_frame(
        magic: [u8; 4],
        data: &[u8],
        with_checksum: bool,
        max_length: usize,
    ) -> NetworkResult<Option<(RawFrame, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }
        if data[..4] != magic {
            return Err(NetworkError::ProtocolViolation(format!(
                "bad magic {}, expected {}",
                hex::encode(&data[..4]),
                hex::encode(magic)
            )));
        }

        let header_size = if with_checksum {
            MESSAGE_HEADER_SIZE
        } else {
            LEGACY_MESSAGE_HEADER_SIZE
        };
        if data.len() < header_size {
            return Ok(None);
        }

        let command = Self::parse_command(&data[4..4 + COMMAND_SIZE]);
        let payload_length = u32::from_le_bytes([data[16], data[17], data[18], data[19]]) as usize;
        if payload_length > max_length {
            return Err(NetworkError::ProtocolViolation(format!(
                "'{}' body of {} bytes exceeds limit {}",
                command, payload_length, max_length
            )));
        }

        let total = header_size + payload_length;
        if data.len() < total {
            return Ok(None);
        }
        let payload = &data[header_size..total];

        if with_checksum {
            let expected = Self::calculate_checksum(payload);
            if data[20..24] != expected {
                return Err(NetworkError::ProtocolViolation(format!(
                    "bad checksum for '{}': got {}, expected {}",
                    command,
                    hex::encode(&data[20..24]),
                    hex::encode(expected)
                )));
            }
        }

        Ok(Some((
            RawFrame {
                command,
                payload: payload.to_vec(),
            },
            total,
        )))
    }

    /// Command name up to the first NUL
    fn parse_command(raw: &[u8]) -> String {
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// First four bytes of the body's double SHA256
    pub fn calculate_checksum(payload: &[u8]) -> [u8; 4] {
        let hash = double_sha256(payload);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash[..4]);
        checksum
    }
}
