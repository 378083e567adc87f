//! Helpers for building blocks and transactions in test scenarios

use super::block::{Block, BlockHeader};
use super::script::{Script, OP_0};
use super::transaction::{OutPoint, Transaction, TransactionData, TxIn, TxOut};
use crate::wire::Hash256;

/// Header version used for blocks built by the harness
pub const BLOCK_VERSION: i32 = 4;

/// Coinbase transaction for a block at `height`.
///
/// The input spends the null prevout with script `<height> OP_0`.
pub fn create_coinbase(height: u32, value: i64, script_pubkey: Vec<u8>) -> Transaction {
    let script_sig = Script::new()
        .push_int(i64::from(height))
        .push_opcode(OP_0)
        .into_bytes();
    Transaction::new(TransactionData {
        vin: vec![TxIn::new(OutPoint::null(), script_sig, u32::MAX)],
        vout: vec![TxOut::new(value, script_pubkey)],
        ..Default::default()
    })
}

/// Block on top of `prev_block` holding only `coinbase`, with its commitment
/// root filled in and a zero nonce. Append transactions and call
/// [`Block::update_merkle_root`] before solving.
pub fn create_block(
    prev_block: Hash256,
    coinbase: Transaction,
    time: u32,
    bits: u32,
    final_sapling_root: Hash256,
) -> Block {
    let mut block = Block::new(
        BlockHeader {
            version: BLOCK_VERSION,
            prev_block,
            final_sapling_root,
            time,
            bits,
            ..Default::default()
        },
        vec![coinbase],
    );
    block.update_merkle_root();
    block
}

/// Transaction spending output `n` of `prev_tx` into a single output
pub fn create_transaction(
    prev_tx: &Transaction,
    n: u32,
    script_sig: Vec<u8>,
    value: i64,
    script_pubkey: Vec<u8>,
) -> Transaction {
    Transaction::new(TransactionData {
        vin: vec![TxIn::new(
            OutPoint::new(prev_tx.txid(), n),
            script_sig,
            u32::MAX,
        )],
        vout: vec![TxOut::new(value, script_pubkey)],
        ..Default::default()
    })
}
