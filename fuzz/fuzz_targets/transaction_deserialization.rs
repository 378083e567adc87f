#![no_main]
use libfuzzer_sys::fuzz_target;
use pastel_mininode::primitives::{Block, Transaction};
use pastel_mininode::wire::{Decodable, Encodable};

fuzz_target!(|data: &[u8]| {
    // Re-encoding normalises compact sizes, so compare after a second decode
    if let Ok(tx) = Transaction::from_wire_exact(data) {
        let encoded = tx.to_bytes();
        assert_eq!(Transaction::from_wire_exact(&encoded).ok(), Some(tx));
    }

    if let Ok(block) = Block::from_wire(data) {
        let _ = block.calc_merkle_root();
        let _ = block.hash();
    }
});
