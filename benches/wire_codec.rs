use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pastel_mininode::network::protocol::{
    NetworkKind, ProtocolMessage, ProtocolParser, MAX_PROTOCOL_MESSAGE_LENGTH,
};
use pastel_mininode::primitives::script::OP_TRUE;
use pastel_mininode::primitives::shielded::{OutputDescription, SpendDescription};
use pastel_mininode::primitives::transaction::{TransactionData, COIN};
use pastel_mininode::primitives::{create_block, create_coinbase, create_transaction, Block, Transaction};
use pastel_mininode::wire::{Decodable, Encodable, Hash256};

fn sapling_transaction() -> Transaction {
    Transaction::new(TransactionData {
        value_balance: -COIN,
        shielded_spends: vec![SpendDescription::default(); 2],
        shielded_outputs: vec![OutputDescription::default(); 2],
        binding_sig: Some([7u8; 64]),
        ..TransactionData::sapling()
    })
}

fn test_block(tx_count: usize) -> Block {
    let coinbase = create_coinbase(100, 10 * COIN, vec![OP_TRUE]);
    let mut block = create_block(Hash256::from_low_u64(1), coinbase.clone(), 1_600_000_000, 0x200f0f0f, Hash256::ZERO);
    for i in 0..tx_count {
        block
            .transactions
            .push(create_transaction(&coinbase, 0, vec![OP_TRUE], i as i64, vec![OP_TRUE]));
    }
    block.update_merkle_root();
    block
}

fn benchmark_transaction_codec(c: &mut Criterion) {
    let tx = sapling_transaction();
    let bytes = tx.to_bytes();

    c.bench_function("sapling_tx_encode", |b| b.iter(|| black_box(&tx).to_bytes()));
    c.bench_function("sapling_tx_decode", |b| {
        b.iter(|| Transaction::from_wire_exact(black_box(&bytes)))
    });
    c.bench_function("sapling_tx_txid_uncached", |b| {
        b.iter(|| black_box(tx.clone()).rehash())
    });
}

fn benchmark_block_codec(c: &mut Criterion) {
    let block = test_block(500);
    let bytes = block.to_bytes();

    c.bench_function("block_500_decode", |b| {
        b.iter(|| Block::from_wire_exact(black_box(&bytes)))
    });
    c.bench_function("block_500_merkle_root", |b| {
        b.iter(|| black_box(&block).calc_merkle_root())
    });
}

fn benchmark_framing(c: &mut Criterion) {
    let magic = NetworkKind::Regtest.magic();
    let message = ProtocolMessage::Block(test_block(100));
    let frame = ProtocolParser::serialize_message(magic, &message, true);

    c.bench_function("frame_block_100_serialize", |b| {
        b.iter(|| ProtocolParser::serialize_message(magic, black_box(&message), true))
    });
    c.bench_function("frame_block_100_parse_and_decode", |b| {
        b.iter(|| {
            let (raw, _) = ProtocolParser::parse_frame(magic, black_box(&frame), true, MAX_PROTOCOL_MESSAGE_LENGTH)
                .ok()
                .flatten()?;
            ProtocolMessage::decode(&raw.command, &raw.payload, false).ok()
        })
    });
}

criterion_group!(
    benches,
    benchmark_transaction_codec,
    benchmark_block_codec,
    benchmark_framing
);
criterion_main!(benches);
