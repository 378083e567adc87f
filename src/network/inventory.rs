//! Inventory vectors
//!
//! Items announced in `inv`, requested in `getdata` and refused in `notfound`,
//! plus a small tracker of what a peer has announced.

use std::collections::HashMap;

use bytes::BufMut;
use tracing::debug;

use crate::wire::{CodecResult, Decodable, Encodable, Hash256, WireReader};

/// Inventory types
pub const MSG_ERROR: u32 = 0;
pub const MSG_TX: u32 = 1;
pub const MSG_BLOCK: u32 = 2;

/// One inventory entry: a type tag and the object's identity hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InventoryItem {
    pub inv_type: u32,
    pub hash: Hash256,
}

impl InventoryItem {
    pub fn new(inv_type: u32, hash: Hash256) -> Self {
        Self { inv_type, hash }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self::new(MSG_TX, hash)
    }

    pub fn block(hash: Hash256) -> Self {
        Self::new(MSG_BLOCK, hash)
    }

    /// Anything but the error type is worth a `getdata`
    pub fn is_requestable(&self) -> bool {
        self.inv_type != MSG_ERROR
    }

    pub fn type_name(&self) -> &'static str {
        match self.inv_type {
            MSG_ERROR => "Error",
            MSG_TX => "TX",
            MSG_BLOCK => "Block",
            _ => "Unknown",
        }
    }
}

impl Encodable for InventoryItem {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.inv_type);
        self.hash.encode(buf);
    }
}

impl Decodable for InventoryItem {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            inv_type: reader.read_u32_le()?,
            hash: reader.read_hash()?,
        })
    }
}

/// Items from `items` that should be requested
pub fn requestable(items: &[InventoryItem]) -> Vec<InventoryItem> {
    items.iter().filter(|i| i.is_requestable()).copied().collect()
}

/// Remembers every item a peer has announced.
///
/// Entries are kept until [`InventoryTracker::clear`] or
/// [`InventoryTracker::forget`]; long scenarios should prune what they have
/// already checked.
#[derive(Debug, Default, Clone)]
pub struct InventoryTracker {
    announced: HashMap<Hash256, u32>,
}

impl InventoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, items: &[InventoryItem]) {
        for item in items {
            debug!("Peer announced {} {}", item.type_name(), item.hash);
            self.announced.insert(item.hash, item.inv_type);
        }
    }

    pub fn has_announced(&self, hash: &Hash256) -> bool {
        self.announced.contains_key(hash)
    }

    /// Announced type for `hash`, if any
    pub fn announced_type(&self, hash: &Hash256) -> Option<u32> {
        self.announced.get(hash).copied()
    }

    pub fn len(&self) -> usize {
        self.announced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.announced.is_empty()
    }

    /// Drop one entry, returning its announced type
    pub fn forget(&mut self, hash: &Hash256) -> Option<u32> {
        self.announced.remove(hash)
    }

    pub fn clear(&mut self) {
        self.announced.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let item = InventoryItem::block(Hash256::from_low_u64(0xabcd));
        let bytes = item.to_bytes();
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..6], &[0xcd, 0xab]);
        assert_eq!(InventoryItem::from_wire_exact(&bytes).unwrap(), item);
    }

    #[test]
    fn test_requestable_skips_error_type() {
        let items = vec![
            InventoryItem::new(MSG_ERROR, Hash256::from_low_u64(1)),
            InventoryItem::tx(Hash256::from_low_u64(2)),
            InventoryItem::new(7, Hash256::from_low_u64(3)),
        ];
        let wanted = requestable(&items);
        assert_eq!(wanted.len(), 2);
        assert!(wanted.iter().all(|i| i.inv_type != MSG_ERROR));
    }

    #[test]
    fn test_tracker() {
        let mut tracker = InventoryTracker::new();
        let hash = Hash256::from_low_u64(5);
        assert!(!tracker.has_announced(&hash));
        tracker.record(&[InventoryItem::block(hash)]);
        assert!(tracker.has_announced(&hash));
        assert_eq!(tracker.announced_type(&hash), Some(MSG_BLOCK));
        assert_eq!(tracker.len(), 1);

        let other = Hash256::from_low_u64(6);
        tracker.record(&[InventoryItem::tx(other)]);
        assert_eq!(tracker.forget(&hash), Some(MSG_BLOCK));
        assert!(!tracker.has_announced(&hash));
        assert_eq!(tracker.forget(&hash), None);
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
