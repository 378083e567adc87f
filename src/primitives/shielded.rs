//! Shielded-pool records carried inside transactions
//!
//! The harness never interprets proofs or ciphertexts; every field is an
//! opaque fixed-size blob whose width is a protocol constant.

use bytes::BufMut;

use crate::wire::{CodecError, CodecResult, Decodable, Encodable, Hash256, WireReader};

/// Sapling note ciphertext size
pub const ENC_CIPHERTEXT_SIZE: usize = 580;
/// Sapling outgoing ciphertext size
pub const OUT_CIPHERTEXT_SIZE: usize = 80;
/// Groth16 proof size
pub const GROTH_PROOF_SIZE: usize = 192;
/// Spend authorization / binding signature size
pub const SIGNATURE_SIZE: usize = 64;

/// Sprout join-split arity
pub const ZC_NUM_JS_INPUTS: usize = 2;
pub const ZC_NUM_JS_OUTPUTS: usize = 2;
/// Sprout note ciphertext: leading byte, value, rho, r, memo, auth tag
pub const ZC_NOTECIPHERTEXT_SIZE: usize = 1 + 8 + 32 + 32 + 512 + 16;

/// Leading-byte masks for compressed curve points in a PHGR13 proof
pub const G1_PREFIX_MASK: u8 = 0x02;
pub const G2_PREFIX_MASK: u8 = 0x0a;

/// Sapling shielded spend
///
/// Size\[bytes\]: 384
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendDescription {
    /// Value commitment, 32 bytes
    pub cv: Hash256,
    /// Note commitment tree root, 32 bytes
    pub anchor: Hash256,
    pub nullifier: Hash256,
    /// Randomized verification key, 32 bytes
    pub rk: Hash256,
    pub zkproof: [u8; GROTH_PROOF_SIZE],
    pub spend_auth_sig: [u8; SIGNATURE_SIZE],
}

impl Default for SpendDescription {
    fn default() -> Self {
        Self {
            cv: Hash256::ZERO,
            anchor: Hash256::ZERO,
            nullifier: Hash256::ZERO,
            rk: Hash256::ZERO,
            zkproof: [0u8; GROTH_PROOF_SIZE],
            spend_auth_sig: [0u8; SIGNATURE_SIZE],
        }
    }
}

impl Encodable for SpendDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.cv.encode(buf);
        self.anchor.encode(buf);
        self.nullifier.encode(buf);
        self.rk.encode(buf);
        buf.put_slice(&self.zkproof);
        buf.put_slice(&self.spend_auth_sig);
    }
}

impl Decodable for SpendDescription {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            cv: reader.read_hash()?,
            anchor: reader.read_hash()?,
            nullifier: reader.read_hash()?,
            rk: reader.read_hash()?,
            zkproof: reader.read_array()?,
            spend_auth_sig: reader.read_array()?,
        })
    }
}

/// Sapling shielded output
///
/// Size\[bytes\]: 948
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescription {
    pub cv: Hash256,
    /// Note commitment u-coordinate
    pub cmu: Hash256,
    pub ephemeral_key: Hash256,
    pub enc_ciphertext: [u8; ENC_CIPHERTEXT_SIZE],
    pub out_ciphertext: [u8; OUT_CIPHERTEXT_SIZE],
    pub zkproof: [u8; GROTH_PROOF_SIZE],
}

impl Default for OutputDescription {
    fn default() -> Self {
        Self {
            cv: Hash256::ZERO,
            cmu: Hash256::ZERO,
            ephemeral_key: Hash256::ZERO,
            enc_ciphertext: [0u8; ENC_CIPHERTEXT_SIZE],
            out_ciphertext: [0u8; OUT_CIPHERTEXT_SIZE],
            zkproof: [0u8; GROTH_PROOF_SIZE],
        }
    }
}

impl Encodable for OutputDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.cv.encode(buf);
        self.cmu.encode(buf);
        self.ephemeral_key.encode(buf);
        buf.put_slice(&self.enc_ciphertext);
        buf.put_slice(&self.out_ciphertext);
        buf.put_slice(&self.zkproof);
    }
}

impl Decodable for OutputDescription {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            cv: reader.read_hash()?,
            cmu: reader.read_hash()?,
            ephemeral_key: reader.read_hash()?,
            enc_ciphertext: reader.read_array()?,
            out_ciphertext: reader.read_array()?,
            zkproof: reader.read_array()?,
        })
    }
}

/// Compressed G1 point: one prefix byte plus the 32-byte x coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct G1Point {
    pub y_lsb: bool,
    pub x: [u8; 32],
}

/// Compressed G2 point: one prefix byte plus the 64-byte x coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct G2Point {
    pub y_gt: bool,
    pub x: [u8; 64],
}

impl Default for G2Point {
    fn default() -> Self {
        Self {
            y_gt: false,
            x: [0u8; 64],
        }
    }
}

fn read_point_prefix(reader: &mut WireReader<'_>, mask: u8) -> CodecResult<bool> {
    let lead = reader.read_u8()?;
    if lead & !1 != mask {
        return Err(CodecError::InvalidValue(format!(
            "curve point prefix {:#04x}, expected {:#04x} or {:#04x}",
            lead,
            mask,
            mask | 1
        )));
    }
    Ok(lead & 1 == 1)
}

impl Encodable for G1Point {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(G1_PREFIX_MASK | self.y_lsb as u8);
        buf.put_slice(&self.x);
    }
}

impl Decodable for G1Point {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let y_lsb = read_point_prefix(reader, G1_PREFIX_MASK)?;
        Ok(Self {
            y_lsb,
            x: reader.read_array()?,
        })
    }
}

impl Encodable for G2Point {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(G2_PREFIX_MASK | self.y_gt as u8);
        buf.put_slice(&self.x);
    }
}

impl Decodable for G2Point {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let y_gt = read_point_prefix(reader, G2_PREFIX_MASK)?;
        Ok(Self {
            y_gt,
            x: reader.read_array()?,
        })
    }
}

/// PHGR13 proof attached to a Sprout join-split
///
/// Size\[bytes\]: 296
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZcProof {
    pub g_a: G1Point,
    pub g_a_prime: G1Point,
    pub g_b: G2Point,
    pub g_b_prime: G1Point,
    pub g_c: G1Point,
    pub g_c_prime: G1Point,
    pub g_k: G1Point,
    pub g_h: G1Point,
}

impl Encodable for ZcProof {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.g_a.encode(buf);
        self.g_a_prime.encode(buf);
        self.g_b.encode(buf);
        self.g_b_prime.encode(buf);
        self.g_c.encode(buf);
        self.g_c_prime.encode(buf);
        self.g_k.encode(buf);
        self.g_h.encode(buf);
    }
}

impl Decodable for ZcProof {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            g_a: G1Point::decode(reader)?,
            g_a_prime: G1Point::decode(reader)?,
            g_b: G2Point::decode(reader)?,
            g_b_prime: G1Point::decode(reader)?,
            g_c: G1Point::decode(reader)?,
            g_c_prime: G1Point::decode(reader)?,
            g_k: G1Point::decode(reader)?,
            g_h: G1Point::decode(reader)?,
        })
    }
}

/// Sprout join-split description
///
/// Size\[bytes\]: 1802
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSplitDescription {
    pub vpub_old: i64,
    pub vpub_new: i64,
    pub anchor: Hash256,
    pub nullifiers: [Hash256; ZC_NUM_JS_INPUTS],
    pub commitments: [Hash256; ZC_NUM_JS_OUTPUTS],
    pub onetime_pubkey: Hash256,
    pub random_seed: Hash256,
    pub macs: [Hash256; ZC_NUM_JS_INPUTS],
    pub proof: ZcProof,
    pub ciphertexts: [[u8; ZC_NOTECIPHERTEXT_SIZE]; ZC_NUM_JS_OUTPUTS],
}

impl Default for JoinSplitDescription {
    fn default() -> Self {
        Self {
            vpub_old: 0,
            vpub_new: 0,
            anchor: Hash256::ZERO,
            nullifiers: [Hash256::ZERO; ZC_NUM_JS_INPUTS],
            commitments: [Hash256::ZERO; ZC_NUM_JS_OUTPUTS],
            onetime_pubkey: Hash256::ZERO,
            random_seed: Hash256::ZERO,
            macs: [Hash256::ZERO; ZC_NUM_JS_INPUTS],
            proof: ZcProof::default(),
            ciphertexts: [[0u8; ZC_NOTECIPHERTEXT_SIZE]; ZC_NUM_JS_OUTPUTS],
        }
    }
}

fn read_hashes<const N: usize>(reader: &mut WireReader<'_>) -> CodecResult<[Hash256; N]> {
    let mut out = [Hash256::ZERO; N];
    for slot in out.iter_mut() {
        *slot = reader.read_hash()?;
    }
    Ok(out)
}

impl Encodable for JoinSplitDescription {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64_le(self.vpub_old);
        buf.put_i64_le(self.vpub_new);
        self.anchor.encode(buf);
        for h in self.nullifiers.iter().chain(&self.commitments) {
            h.encode(buf);
        }
        self.onetime_pubkey.encode(buf);
        self.random_seed.encode(buf);
        for h in &self.macs {
            h.encode(buf);
        }
        self.proof.encode(buf);
        for c in &self.ciphertexts {
            buf.put_slice(c);
        }
    }
}

impl Decodable for JoinSplitDescription {
    fn decode(reader: &mut WireReader<'_>) -> CodecResult<Self> {
        let vpub_old = reader.read_i64_le()?;
        let vpub_new = reader.read_i64_le()?;
        let anchor = reader.read_hash()?;
        let nullifiers = read_hashes(reader)?;
        let commitments = read_hashes(reader)?;
        let onetime_pubkey = reader.read_hash()?;
        let random_seed = reader.read_hash()?;
        let macs = read_hashes(reader)?;
        let proof = ZcProof::decode(reader)?;
        let mut ciphertexts = [[0u8; ZC_NOTECIPHERTEXT_SIZE]; ZC_NUM_JS_OUTPUTS];
        for c in ciphertexts.iter_mut() {
            *c = reader.read_array()?;
        }
        Ok(Self {
            vpub_old,
            vpub_new,
            anchor,
            nullifiers,
            commitments,
            onetime_pubkey,
            random_seed,
            macs,
            proof,
            ciphertexts,
        })
    }
}
