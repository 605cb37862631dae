//! Hash primitives: legacy Keccak and the per-version proof-of-work hash.

use primitive_types::H256;
use sha3::{Digest, Keccak256, Keccak512};

use crate::argon2id::{self, Params};
use crate::fork::HeaderVersion;

/// Argon2id parameters of [`HeaderVersion::Argon2idA`].
pub const ARGON2ID_A: Params = Params::new(1, 1, 1);
/// Argon2id parameters of [`HeaderVersion::Argon2idB`].
pub const ARGON2ID_B: Params = Params::new(16, 1, 1);
/// Argon2id parameters of [`HeaderVersion::Argon2idC`].
pub const ARGON2ID_C: Params = Params::new(32, 1, 1);

/// Legacy Keccak-256 (pre-NIST padding).
pub fn keccak256(data: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(&Keccak256::digest(data.as_ref()))
}

/// Legacy Keccak-512 (pre-NIST padding).
pub fn keccak512(data: impl AsRef<[u8]>) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Keccak512::digest(data.as_ref()));
    out
}

/// Hash `data` with the algorithm of `version`.
///
/// Argon2id versions use `data` as the password with an empty salt. The
/// Keccak version is plain Keccak-256; its proof-of-work path goes through
/// hashimoto instead, which needs an epoch dataset.
pub fn version_hash(version: HeaderVersion, data: &[u8]) -> [u8; 32] {
    match version {
        HeaderVersion::Keccak => keccak256(data).0,
        HeaderVersion::Argon2idA => argon2id::argon2id(data, &[], ARGON2ID_A),
        HeaderVersion::Argon2idB => argon2id::argon2id(data, &[], ARGON2ID_B),
        HeaderVersion::Argon2idC => argon2id::argon2id(data, &[], ARGON2ID_C),
    }
}

/// Build the 40-byte proof-of-work seed: `hash ‖ LE64(nonce)`.
pub fn pow_seed(hash_no_nonce: &H256, nonce: u64) -> [u8; 40] {
    let mut seed = [0u8; 40];
    seed[..32].copy_from_slice(hash_no_nonce.as_bytes());
    seed[32..].copy_from_slice(&nonce.to_le_bytes());
    seed
}
