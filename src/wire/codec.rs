//! Primitive wire encoding
//!
//! Compact-size integers, little-endian fixed-width integers, length-prefixed
//! byte strings and length-prefixed sequences of codec-aware items.
//!
//! Decoding goes through [`WireReader`], which bounds-checks every read against
//! the supplied slice and reports [`CodecError::TruncatedInput`] instead of
//! reading past the end.

use bytes::BufMut;
use thiserror::Error;

use super::hash::Hash256;

/// Decode-time failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a declared length was satisfied
    #[error("truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    /// A field held a value the format does not allow
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Bytes left over after a value that must consume the whole input
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Result type for decoding
pub type CodecResult<T> = Result<T, CodecError>;

/// A value with a canonical wire encoding
pub trait Encodable {
    /// Append the wire encoding of `self` to `buf`
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Encode into a fresh byte vector
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// A value that can be read back from its wire encoding
pub trait Decodable: Sized {
    /// Read one value from the reader, advancing it
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self>;

    /// Decode from the start of `data`, ignoring anything after the value
    fn from_wire(data: &[u8]) -> CodecResult<Self> {
        let mut reader = WireReader::new(data);
        Self::decode(&mut reader)
    }

    /// Decode from `data`, requiring the value to consume every byte
    fn from_wire_exact(data: &[u8]) -> CodecResult<Self> {
        let mut reader = WireReader::new(data);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Bounds-checked cursor over a byte slice
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail with [`CodecError::TrailingBytes`] unless everything was consumed
    pub fn finish(&self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CodecError::TruncatedInput {
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read a fixed-size byte array
    pub fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16_be(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> CodecResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> CodecResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> CodecResult<Hash256> {
        Ok(Hash256::from_bytes(self.read_array()?))
    }

    /// Read a compact-size unsigned integer.
    ///
    /// Non-minimal encodings are accepted; the harness has to be able to read
    /// whatever a peer (or a deliberately broken fixture) sends.
    pub fn read_compact_size(&mut self) -> CodecResult<u64> {
        let tag = self.read_u8()?;
        Ok(match tag {
            0..=252 => tag as u64,
            253 => self.read_u16_le()? as u64,
            254 => self.read_u32_le()? as u64,
            255 => self.read_u64_le()?,
        })
    }

    /// Read a compact-size length and check it against the remaining input.
    ///
    /// `min_item_size` is the smallest encoding of one element, so a declared
    /// count that could never fit fails before any allocation.
    fn read_length(&mut self, min_item_size: usize) -> CodecResult<usize> {
        let declared = self.read_compact_size()?;
        let needed = declared.saturating_mul(min_item_size.max(1) as u64);
        if needed > self.remaining() as u64 {
            return Err(CodecError::TruncatedInput {
                needed: usize::try_from(needed).unwrap_or(usize::MAX),
                available: self.remaining(),
            });
        }
        Ok(declared as usize)
    }

    /// Read a compact-size-prefixed byte string
    pub fn read_var_bytes(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_length(1)?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Read a compact-size-prefixed sequence of codec-aware items
    pub fn read_vec<T: Decodable>(&mut self) -> CodecResult<Vec<T>> {
        let len = self.read_length(1)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Read a compact-size-prefixed sequence using a custom element reader
    pub fn read_vec_with<T, F>(&mut self, min_item_size: usize, mut f: F) -> CodecResult<Vec<T>>
    where
        F: FnMut(&mut Self) -> CodecResult<T>,
    {
        let len = self.read_length(min_item_size)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(f(self)?);
        }
        Ok(items)
    }
}

/// Number of bytes a compact-size encoding of `n` occupies
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=252 => 1,
        253..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Write `n` as a compact-size integer using the smallest tag that fits
pub fn put_compact_size<B: BufMut>(buf: &mut B, n: u64) {
    match n {
        0..=252 => buf.put_u8(n as u8),
        253..=0xFFFF => {
            buf.put_u8(253);
            buf.put_u16_le(n as u16);
        }
        0x1_0000..=0xFFFF_FFFF => {
            buf.put_u8(254);
            buf.put_u32_le(n as u32);
        }
        _ => {
            buf.put_u8(255);
            buf.put_u64_le(n);
        }
    }
}

/// Write a compact-size-prefixed byte string
pub fn put_var_bytes<B: BufMut>(buf: &mut B, data: &[u8]) {
    put_compact_size(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Write a compact-size-prefixed sequence of codec-aware items
pub fn put_vec<B: BufMut, T: Encodable>(buf: &mut B, items: &[T]) {
    put_compact_size(buf, items.len() as u64);
    for item in items {
        item.encode(buf);
    }
}

/// Write a compact-size-prefixed sequence using a custom element writer
pub fn put_vec_with<B: BufMut, T, F>(buf: &mut B, items: &[T], mut f: F)
where
    F: FnMut(&mut B, &T),
{
    put_compact_size(buf, items.len() as u64);
    for item in items {
        f(buf, item);
    }
}

impl Encodable for Hash256 {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.as_bytes());
    }
}

impl Decodable for Hash256 {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        reader.read_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_compact(n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        put_compact_size(&mut out, n);
        out
    }

    #[test]
    fn test_compact_size_boundaries() {
        let cases: &[(u64, usize, Option<u8>)] = &[
            (0, 1, None),
            (252, 1, None),
            (253, 3, Some(253)),
            (65535, 3, Some(253)),
            (65536, 5, Some(254)),
            (4294967295, 5, Some(254)),
            (4294967296, 9, Some(255)),
        ];

        for &(value, width, tag) in cases {
            let encoded = encode_compact(value);
            assert_eq!(encoded.len(), width, "width for {}", value);
            assert_eq!(compact_size_len(value), width);
            if let Some(tag) = tag {
                assert_eq!(encoded[0], tag, "tag for {}", value);
            } else {
                assert_eq!(encoded[0] as u64, value);
            }
            let mut reader = WireReader::new(&encoded);
            assert_eq!(reader.read_compact_size().unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_truncated_compact_size() {
        let mut reader = WireReader::new(&[253, 0x01]);
        assert_eq!(
            reader.read_compact_size(),
            Err(CodecError::TruncatedInput {
                needed: 2,
                available: 1
            })
        );
    }

    #[test]
    fn test_var_bytes_declared_length_exceeds_input() {
        // Declares 10 bytes, carries 3
        let data = [10u8, 1, 2, 3];
        let mut reader = WireReader::new(&data);
        let err = reader.read_var_bytes().unwrap_err();
        assert!(matches!(err, CodecError::TruncatedInput { needed: 10, available: 3 }));
    }

    #[test]
    fn test_huge_sequence_count_fails_without_allocating() {
        let mut data = Vec::new();
        put_compact_size(&mut data, u64::MAX);
        let mut reader = WireReader::new(&data);
        let err = reader.read_vec::<Hash256>().unwrap_err();
        assert!(matches!(err, CodecError::TruncatedInput { .. }));
    }

    #[test]
    fn test_hash_sequence() {
        let hashes = vec![Hash256::from_bytes([1u8; 32]), Hash256::from_bytes([2u8; 32])];
        let mut out = Vec::new();
        put_vec(&mut out, &hashes);
        assert_eq!(out.len(), 1 + 64);

        let decoded: Vec<Hash256> = WireReader::new(&out).read_vec().unwrap();
        assert_eq!(decoded, hashes);
    }

    #[test]
    fn test_exact_decode_rejects_trailing_bytes() {
        let mut data = Hash256::from_bytes([7u8; 32]).to_bytes();
        data.push(0);
        assert_eq!(Hash256::from_wire_exact(&data), Err(CodecError::TrailingBytes(1)));
        assert!(Hash256::from_wire(&data).is_ok());
    }

    #[test]
    fn test_non_minimal_compact_size_is_accepted() {
        let data = [253u8, 5, 0];
        assert_eq!(WireReader::new(&data).read_compact_size().unwrap(), 5);
    }

    proptest! {
        #[test]
        fn prop_compact_size_round_trip(value in any::<u64>()) {
            let encoded = encode_compact(value);
            prop_assert_eq!(encoded.len(), compact_size_len(value));
            let mut reader = WireReader::new(&encoded);
            prop_assert_eq!(reader.read_compact_size().unwrap(), value);
            prop_assert!(reader.is_empty());
        }

        #[test]
        fn prop_reader_never_reads_past_end(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut reader = WireReader::new(&data);
            // Any outcome is fine as long as it is not a panic
            let _ = reader.read_var_bytes();
            prop_assert!(reader.position() <= data.len());
        }
    }
}
