//! 256-bit hashes and the double-SHA256 hash collaborator
//!
//! A [`Hash256`] is stored in wire order: the 32 bytes exactly as they appear
//! in a serialized message, which is the little-endian form of a 256-bit
//! integer. The conventional display form is the same bytes reversed, so
//! `Display`/`FromStr` reverse and `Ord` compares from the most significant
//! byte (index 31) down.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use super::codec::CodecError;

/// Double SHA256, used for transaction/block identity hashes and frame checksums
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    result
}

/// A 256-bit value in wire byte order
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Double-SHA256 of `data`, kept in wire order
    pub fn hash(data: &[u8]) -> Self {
        Self(double_sha256(data))
    }

    /// A value whose low 64 bits are `value`
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Add one, wrapping at 2^256
    pub fn increment(&mut self) {
        for byte in self.0.iter_mut() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
    }

    /// Expand a compact difficulty encoding into the full 256-bit target.
    ///
    /// The top byte is a byte length, the low 24 bits the mantissa. Bits shifted
    /// past 256 are dropped.
    pub fn from_compact(bits: u32) -> Self {
        let size = (bits >> 24) as usize;
        let mantissa = bits & 0x00ff_ffff;
        let mut bytes = [0u8; 32];

        if size <= 3 {
            let value = mantissa >> (8 * (3 - size));
            bytes[..4].copy_from_slice(&value.to_le_bytes());
        } else {
            let offset = size - 3;
            for (i, b) in mantissa.to_le_bytes()[..3].iter().enumerate() {
                if let Some(slot) = bytes.get_mut(offset + i) {
                    *slot = *b;
                }
            }
        }
        Self(bytes)
    }

    /// Hex of the display (byte-reversed) form
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_display_hex())
    }
}

impl FromStr for Hash256 {
    type Err = CodecError;

    /// Parse the conventional display form (64 hex digits, most significant first)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s.trim())
            .map_err(|e| CodecError::InvalidValue(format!("hash hex: {}", e)))?;
        let mut bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            CodecError::InvalidValue(format!("hash must be 32 bytes, got {}", v.len()))
        })?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}
