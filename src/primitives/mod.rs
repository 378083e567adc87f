//! Transaction and block model
//!
//! Versioned transactions, shielded descriptions, block headers and blocks,
//! plus the helpers scenarios use to build them.

pub mod block;
pub mod blocktools;
pub mod pow;
pub mod script;
pub mod shielded;
pub mod transaction;

use std::sync::OnceLock;

use crate::wire::Hash256;

pub use block::{Block, BlockHeader, BLOCK_HEADER_POW_PREFIX_LEN};
pub use blocktools::{create_block, create_coinbase, create_transaction};
pub use pow::PowSolver;
pub use script::Script;
pub use shielded::{
    G1Point, G2Point, JoinSplitDescription, OutputDescription, SpendDescription, ZcProof,
};
pub use transaction::{OutPoint, Transaction, TransactionData, TxIn, TxOut};

/// Lazily computed identity hash.
///
/// Owners clear it whenever the hashed value may have changed. It never takes
/// part in equality: two values with the same fields are equal whether or not
/// either has computed its hash yet.
#[derive(Debug, Clone, Default)]
pub(crate) struct HashCache(OnceLock<Hash256>);

impl HashCache {
    pub(crate) fn get_or_compute(&self, f: impl FnOnce() -> Hash256) -> Hash256 {
        *self.0.get_or_init(f)
    }

    pub(crate) fn clear(&mut self) {
        self.0 = OnceLock::new();
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.0.get().is_some()
    }
}

impl PartialEq for HashCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for HashCache {}
