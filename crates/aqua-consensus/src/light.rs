//! Lightweight seal check for argon2id headers.
//!
//! Unlike [`PowCodec`](crate::pow::PowCodec) it never touches an epoch cache,
//! so it only understands versions 2 and up, and it trusts the caller to have
//! validated the difficulty against the chain already.

use aqua_core::error::ConsensusError;
use aqua_core::types::Header;
use primitive_types::H256;

use crate::pow::{argon2id_pow, meets_target, target};

/// Stateless verifier for trusted fast-path validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightVerifier;

impl LightVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, header: &Header) -> Result<(), ConsensusError> {
        let version = match header.version {
            Some(v) if v.as_u8() >= 2 => v,
            _ => return Err(ConsensusError::NoVersion),
        };
        let Some(target) = target(header.difficulty) else {
            return Err(ConsensusError::DifficultyZero);
        };
        // The mix digest is not covered by hash_no_nonce.
        if header.mix_digest != H256::zero() {
            return Err(ConsensusError::MixDigestNonZero);
        }
        let (_, result) = argon2id_pow(version, &header.hash_no_nonce(), header.nonce);
        if !meets_target(&result, &target) {
            return Err(ConsensusError::InvalidPoW);
        }
        Ok(())
    }

    pub fn is_valid(&self, header: &Header) -> bool {
        self.verify(header).is_ok()
    }
}
