//! Proof-of-work collaborator
//!
//! The harness does not implement the PoW algorithm. Callers supply a solver
//! that produces and checks solution blobs for a 108-byte header prefix and a
//! 256-bit nonce; [`Block::solve`](super::Block::solve) drives it.

use crate::wire::Hash256;

/// Opaque candidate generation and verification for header solutions
pub trait PowSolver {
    /// All candidate solutions for this prefix and nonce, possibly none
    fn generate_candidates(&self, header_prefix: &[u8], nonce: &Hash256) -> Vec<Vec<u8>>;

    /// Whether `solution` is a valid proof for this prefix and nonce
    fn verify(&self, header_prefix: &[u8], nonce: &Hash256, solution: &[u8]) -> bool;
}

impl<T: PowSolver + ?Sized> PowSolver for &T {
    fn generate_candidates(&self, header_prefix: &[u8], nonce: &Hash256) -> Vec<Vec<u8>> {
        (**self).generate_candidates(header_prefix, nonce)
    }

    fn verify(&self, header_prefix: &[u8], nonce: &Hash256, solution: &[u8]) -> bool {
        (**self).verify(header_prefix, nonce, solution)
    }
}
