//! Versioned transactions
//!
//! The leading 4-byte header holds the overwintered flag (high bit) and the
//! version (low 31 bits). Overwintered transactions carry a version-group id
//! next, and the (flag, version, group) triple decides which optional sections
//! follow:
//!
//! | Section | Present when |
//! |---|---|
//! | expiry height | Overwinter v3 or Sapling v4 |
//! | value balance, spends, outputs | Sapling v4 |
//! | join-splits | version >= 2 |
//! | join-split pubkey + signature | at least one join-split |
//! | binding signature | Sapling v4 with a spend or an output |

use std::ops::{Deref, DerefMut};

use bytes::BufMut;

use super::shielded::{JoinSplitDescription, OutputDescription, SpendDescription, SIGNATURE_SIZE};
use super::HashCache;
use crate::wire::{
    put_var_bytes, put_vec, CodecError, CodecResult, Decodable, Encodable, Hash256, WireReader,
};

pub const SPROUT_VERSION_GROUP_ID: u32 = 0x0000_0000;
pub const OVERWINTER_VERSION_GROUP_ID: u32 = 0x03C4_8270;
pub const SAPLING_VERSION_GROUP_ID: u32 = 0x892F_2085;

pub const OVERWINTER_TX_VERSION: u32 = 3;
pub const SAPLING_TX_VERSION: u32 = 4;

const OVERWINTERED_FLAG: u32 = 1 << 31;

/// Base units per coin
pub const COIN: i64 = 100_000;
/// Upper bound on a single output value
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub n: u32,
}

impl OutPoint {
    pub fn new(hash: Hash256, n: u32) -> Self {
        Self { hash, n }
    }

    /// The prevout of a coinbase input
    pub fn null() -> Self {
        Self {
            hash: Hash256::ZERO,
            n: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.n == u32::MAX
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        Self::new(Hash256::ZERO, 0)
    }
}

impl Encodable for OutPoint {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.hash.encode(buf);
        buf.put_u32_le(self.n);
    }
}

impl Decodable for OutPoint {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            hash: reader.read_hash()?,
            n: reader.read_u32_le()?,
        })
    }
}

/// Transparent input
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Vec<u8>, sequence: u32) -> Self {
        Self {
            prevout,
            script_sig,
            sequence,
        }
    }
}

impl Encodable for TxIn {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.prevout.encode(buf);
        put_var_bytes(buf, &self.script_sig);
        buf.put_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            prevout: OutPoint::decode(reader)?,
            script_sig: reader.read_var_bytes()?,
            sequence: reader.read_u32_le()?,
        })
    }
}

/// Transparent output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOut {
    /// Signed so that deliberately negative values survive a round trip
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: i64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl Encodable for TxOut {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64_le(self.value);
        put_var_bytes(buf, &self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            value: reader.read_i64_le()?,
            script_pubkey: reader.read_var_bytes()?,
        })
    }
}

/// Plain transaction fields
///
/// Optional signature fields are `None` when the section is absent on the
/// wire. When a section is required but the field is `None`, it is encoded
/// as zeroes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionData {
    pub overwintered: bool,
    /// Low 31 bits of the header
    pub version: u32,
    /// Zero unless overwintered
    pub version_group_id: u32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry_height: u32,
    pub value_balance: i64,
    pub shielded_spends: Vec<SpendDescription>,
    pub shielded_outputs: Vec<OutputDescription>,
    pub join_splits: Vec<JoinSplitDescription>,
    pub join_split_pubkey: Option<Hash256>,
    pub join_split_sig: Option<[u8; SIGNATURE_SIZE]>,
    pub binding_sig: Option<[u8; SIGNATURE_SIZE]>,
}

impl Default for TransactionData {
    /// An empty Overwinter v3 transaction
    fn default() -> Self {
        Self {
            overwintered: true,
            version: OVERWINTER_TX_VERSION,
            version_group_id: OVERWINTER_VERSION_GROUP_ID,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
            expiry_height: 0,
            value_balance: 0,
            shielded_spends: Vec::new(),
            shielded_outputs: Vec::new(),
            join_splits: Vec::new(),
            join_split_pubkey: None,
            join_split_sig: None,
            binding_sig: None,
        }
    }
}

impl TransactionData {
    /// An empty Sapling v4 transaction
    pub fn sapling() -> Self {
        Self {
            version: SAPLING_TX_VERSION,
            version_group_id: SAPLING_VERSION_GROUP_ID,
            ..Default::default()
        }
    }

    pub fn is_overwinter_v3(&self) -> bool {
        self.overwintered
            && self.version_group_id == OVERWINTER_VERSION_GROUP_ID
            && self.version == OVERWINTER_TX_VERSION
    }

    pub fn is_sapling_v4(&self) -> bool {
        self.overwintered
            && self.version_group_id == SAPLING_VERSION_GROUP_ID
            && self.version == SAPLING_TX_VERSION
    }

    fn has_expiry(&self) -> bool {
        self.is_overwinter_v3() || self.is_sapling_v4()
    }

    fn has_join_splits(&self) -> bool {
        self.version >= 2
    }

    fn has_binding_sig(&self) -> bool {
        self.is_sapling_v4()
            && !(self.shielded_spends.is_empty() && self.shielded_outputs.is_empty())
    }

    fn header(&self) -> u32 {
        let flag = if self.overwintered { OVERWINTERED_FLAG } else { 0 };
        flag | (self.version & !OVERWINTERED_FLAG)
    }
}

impl Encodable for TransactionData {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.header());
        if self.overwintered {
            buf.put_u32_le(self.version_group_id);
        }
        put_vec(buf, &self.vin);
        put_vec(buf, &self.vout);
        buf.put_u32_le(self.lock_time);
        if self.has_expiry() {
            buf.put_u32_le(self.expiry_height);
        }
        if self.is_sapling_v4() {
            buf.put_i64_le(self.value_balance);
            put_vec(buf, &self.shielded_spends);
            put_vec(buf, &self.shielded_outputs);
        }
        if self.has_join_splits() {
            put_vec(buf, &self.join_splits);
            if !self.join_splits.is_empty() {
                self.join_split_pubkey.unwrap_or_default().encode(buf);
                buf.put_slice(&self.join_split_sig.unwrap_or([0u8; SIGNATURE_SIZE]));
            }
        }
        if self.has_binding_sig() {
            buf.put_slice(&self.binding_sig.unwrap_or([0u8; SIGNATURE_SIZE]));
        }
    }
}

impl Decodable for TransactionData {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let header = reader.read_u32_le()?;
        let overwintered = header & OVERWINTERED_FLAG != 0;
        let mut tx = TransactionData {
            overwintered,
            version: header & !OVERWINTERED_FLAG,
            version_group_id: if overwintered { reader.read_u32_le()? } else { 0 },
            ..Default::default()
        };

        tx.vin = reader.read_vec()?;
        tx.vout = reader.read_vec()?;
        tx.lock_time = reader.read_u32_le()?;
        if tx.has_expiry() {
            tx.expiry_height = reader.read_u32_le()?;
        }
        if tx.is_sapling_v4() {
            tx.value_balance = reader.read_i64_le()?;
            tx.shielded_spends = reader.read_vec()?;
            tx.shielded_outputs = reader.read_vec()?;
        }
        if tx.has_join_splits() {
            tx.join_splits = reader.read_vec()?;
            if !tx.join_splits.is_empty() {
                tx.join_split_pubkey = Some(reader.read_hash()?);
                tx.join_split_sig = Some(reader.read_array()?);
            }
        }
        if tx.has_binding_sig() {
            tx.binding_sig = Some(reader.read_array()?);
        }
        Ok(tx)
    }
}

/// A transaction with a lazily cached identity hash.
///
/// Fields are reached through `Deref`/`DerefMut`; any mutable access drops the
/// cached hash so the next [`Transaction::txid`] call re-serializes. Cloning
/// produces an independent value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    data: TransactionData,
    txid: HashCache,
}

impl Transaction {
    pub fn new(data: TransactionData) -> Self {
        Self {
            data,
            txid: HashCache::default(),
        }
    }

    pub fn data(&self) -> &TransactionData {
        &self.data
    }

    pub fn into_data(self) -> TransactionData {
        self.data
    }

    /// Identity hash: double-SHA256 of the full serialization, wire order
    pub fn txid(&self) -> Hash256 {
        self.txid.get_or_compute(|| Hash256::hash(&self.data.to_bytes()))
    }

    /// Drop the cached identity hash and compute it again
    pub fn rehash(&mut self) -> Hash256 {
        self.txid.clear();
        self.txid()
    }

    /// Conventional display form of the identity hash.
    ///
    /// Serializes the transaction again instead of reusing the cached digest;
    /// the two must agree, and a mismatch means the cache went stale.
    pub fn display_hash(&self) -> String {
        let cached = self.txid();
        let fresh = Hash256::hash(&self.data.to_bytes());
        debug_assert_eq!(cached, fresh, "stale transaction hash cache");
        fresh.to_display_hex()
    }

    /// Basic well-formedness: every output value within `[0, MAX_MONEY]`
    pub fn is_valid(&self) -> bool {
        self.data
            .vout
            .iter()
            .all(|out| (0..=MAX_MONEY).contains(&out.value))
    }

    /// Decode a raw transaction as returned by `getrawtransaction`
    pub fn from_hex(s: &str) -> CodecResult<Self> {
        let raw = hex::decode(s.trim())
            .map_err(|e| CodecError::InvalidValue(format!("transaction hex: {}", e)))?;
        Self::from_wire_exact(&raw)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    #[cfg(test)]
    pub(crate) fn hash_is_cached(&self) -> bool {
        self.txid.is_computed()
    }
}

impl From<TransactionData> for Transaction {
    fn from(data: TransactionData) -> Self {
        Self::new(data)
    }
}

impl Deref for Transaction {
    type Target = TransactionData;

    fn deref(&self) -> &TransactionData {
        &self.data
    }
}

impl DerefMut for Transaction {
    fn deref_mut(&mut self) -> &mut TransactionData {
        self.txid.clear();
        &mut self.data
    }
}

impl Encodable for Transaction {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.data.encode(buf);
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self::new(TransactionData::decode(reader)?))
    }
}
