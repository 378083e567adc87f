//! Wire codec layer
//!
//! Everything that touches raw bytes sits on top of this module.

pub mod codec;
pub mod hash;

pub use codec::{
    compact_size_len, put_compact_size, put_var_bytes, put_vec, put_vec_with, CodecError,
    CodecResult, Decodable, Encodable, WireReader,
};
pub use hash::{double_sha256, Hash256};
