//! Block headers and blocks
//!
//! A block is a header plus its ordered transactions. The header identity hash
//! covers the whole serialized header; the PoW collaborator only ever sees the
//! fixed 108-byte prefix that precedes the nonce.

use bytes::BufMut;
use tracing::debug;

use super::pow::PowSolver;
use super::transaction::Transaction;
use crate::wire::{put_var_bytes, put_vec, CodecResult, Decodable, Encodable, Hash256, WireReader};

/// version(4) + prev(32) + merkle(32) + final sapling root(32) + time(4) + bits(4)
pub const BLOCK_HEADER_POW_PREFIX_LEN: usize = 108;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    /// Commitment to the block's transactions
    pub merkle_root: Hash256,
    pub final_sapling_root: Hash256,
    pub time: u32,
    /// Compact difficulty target
    pub bits: u32,
    pub nonce: Hash256,
    pub solution: Vec<u8>,
}

impl BlockHeader {
    fn encode_prefix<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.version);
        self.prev_block.encode(buf);
        self.merkle_root.encode(buf);
        self.final_sapling_root.encode(buf);
        buf.put_u32_le(self.time);
        buf.put_u32_le(self.bits);
    }

    /// The bytes the PoW collaborator hashes ahead of the nonce
    pub fn pow_prefix(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_HEADER_POW_PREFIX_LEN);
        self.encode_prefix(&mut out);
        out
    }

    /// Identity hash over the full serialized header.
    ///
    /// Headers are small, so this is recomputed on every call.
    pub fn hash(&self) -> Hash256 {
        Hash256::hash(&self.to_bytes())
    }

    /// Expanded difficulty target
    pub fn target(&self) -> Hash256 {
        Hash256::from_compact(self.bits)
    }

    /// Whether the identity hash is at or below the target
    pub fn meets_target(&self) -> bool {
        self.hash() <= self.target()
    }
}

impl Encodable for BlockHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.encode_prefix(buf);
        self.nonce.encode(buf);
        put_var_bytes(buf, &self.solution);
    }
}

impl Decodable for BlockHeader {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            version: reader.read_i32_le()?,
            prev_block: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            final_sapling_root: reader.read_hash()?,
            time: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_hash()?,
            solution: reader.read_var_bytes()?,
        })
    }
}

/// Merkle root over identity hashes, duplicating the last hash on odd levels.
///
/// An empty list yields the zero hash.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    let mut level: Vec<Hash256> = hashes.to_vec();
    if level.is_empty() {
        return Hash256::ZERO;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut joined = [0u8; 64];
                joined[..32].copy_from_slice(left.as_bytes());
                joined[32..].copy_from_slice(right.as_bytes());
                Hash256::hash(&joined)
            })
            .collect();
    }
    level[0]
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Merkle root of the current transaction list
    pub fn calc_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        merkle_root(&txids)
    }

    /// Recompute the header's commitment root from the transactions
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.calc_merkle_root();
    }

    /// Full validity: PoW proof, hash under target, well-formed transactions
    /// and a matching commitment root
    pub fn is_valid<S: PowSolver>(&self, solver: &S) -> bool {
        let prefix = self.header.pow_prefix();
        if !solver.verify(&prefix, &self.header.nonce, &self.header.solution) {
            return false;
        }
        if !self.header.meets_target() {
            return false;
        }
        if !self.transactions.iter().all(Transaction::is_valid) {
            return false;
        }
        self.calc_merkle_root() == self.header.merkle_root
    }

    /// Search nonces from zero until a candidate solution puts the header
    /// hash at or below the target, then return that hash.
    ///
    /// Runs until it succeeds. Call it from test logic, never from the
    /// network thread.
    pub fn solve<S: PowSolver>(&mut self, solver: &S) -> Hash256 {
        let target = self.header.target();
        let prefix = self.header.pow_prefix();
        self.header.nonce = Hash256::ZERO;
        let mut attempts: u64 = 0;
        loop {
            for solution in solver.generate_candidates(&prefix, &self.header.nonce) {
                self.header.solution = solution;
                let hash = self.header.hash();
                attempts += 1;
                if hash <= target {
                    debug!("Solved block {} after {} candidates", hash, attempts);
                    return hash;
                }
            }
            self.header.nonce.increment();
        }
    }
}

impl Encodable for Block {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.encode(buf);
        put_vec(buf, &self.transactions);
    }
}

impl Decodable for Block {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            header: BlockHeader::decode(reader)?,
            transactions: reader.read_vec()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::transaction::{OutPoint, TransactionData, TxIn, TxOut};
    use crate::wire::double_sha256;

    /// Candidate = sha256d(prefix || nonce); verification recomputes it
    struct DigestSolver;

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

    fn tx_with_lock_time(lock_time: u32) -> Transaction {
        Transaction::new(TransactionData {
            vin: vec![TxIn::new(OutPoint::null(), vec![0x51], u32::MAX)],
            vout: vec![TxOut::new(1000, vec![0x51])],
            lock_time,
            ..Default::default()
        })
    }

    fn pair_hash(a: &Hash256, b: &Hash256) -> Hash256 {
        let mut joined = a.as_bytes().to_vec();
        joined.extend_from_slice(b.as_bytes());
        Hash256::hash(&joined)
    }

    #[test]
    fn test_pow_prefix_length() {
        let header = BlockHeader {
            solution: vec![1, 2, 3],
            ..Default::default()
        };
        assert_eq!(header.pow_prefix().len(), BLOCK_HEADER_POW_PREFIX_LEN);
        assert_eq!(&header.to_bytes()[..108], header.pow_prefix().as_slice());
        // prefix + nonce + compact size + solution
        assert_eq!(header.to_bytes().len(), 108 + 32 + 1 + 3);
    }

    #[test]
    fn test_merkle_root_single_transaction() {
        let tx = tx_with_lock_time(1);
        let block = Block::new(BlockHeader::default(), vec![tx.clone()]);
        assert_eq!(block.calc_merkle_root(), tx.txid());
    }

    #[test]
    fn test_merkle_root_odd_count_duplicates_last() {
        let txs: Vec<Transaction> = (1..=3).map(tx_with_lock_time).collect();
        let a = txs[0].txid();
        let b = txs[1].txid();
        let c = txs[2].txid();
        let expected = pair_hash(&pair_hash(&a, &b), &pair_hash(&c, &c));

        let block = Block::new(BlockHeader::default(), txs);
        assert_eq!(block.calc_merkle_root(), expected);
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn test_solve_then_valid() {
        let mut block = Block::new(
            BlockHeader {
                version: 4,
                time: 1_600_000_000,
                bits: 0x200f_0f0f,
                ..Default::default()
            },
            vec![tx_with_lock_time(0)],
        );
        block.update_merkle_root();
        let hash = block.solve(&DigestSolver);
        assert_eq!(hash, block.hash());
        assert!(hash <= block.header.target());
        assert!(block.is_valid(&DigestSolver));

        // Any change after solving breaks validity
        let mut tampered = block.clone();
        tampered.transactions[0].lock_time = 5;
        assert!(!tampered.is_valid(&DigestSolver));

        let mut wrong_solution = block.clone();
        wrong_solution.header.solution[0] ^= 0xff;
        assert!(!wrong_solution.is_valid(&DigestSolver));
    }

    #[test]
    fn test_invalid_output_value_fails_validity() {
        let mut bad = tx_with_lock_time(0);
        bad.vout[0].value = -1;
        let mut block = Block::new(
            BlockHeader {
                bits: 0x207f_ffff,
                ..Default::default()
            },
            vec![bad],
        );
        block.update_merkle_root();
        block.solve(&DigestSolver);
        assert!(!block.is_valid(&DigestSolver));
    }

    #[test]
    fn test_block_round_trip() {
        let mut block = Block::new(
            BlockHeader {
                version: 4,
                prev_block: Hash256::from_low_u64(77),
                time: 12345,
                bits: 0x200f_0f0f,
                solution: vec![9; 20],
                ..Default::default()
            },
            (0..3).map(tx_with_lock_time).collect(),
        );
        block.update_merkle_root();
        let bytes = block.to_bytes();
        let decoded = Block::from_wire_exact(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }
}
