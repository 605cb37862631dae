//! Proof-of-work codec: per-version hashing and seal verification.
//!
//! Version 1 headers are sealed with hashimoto over a per-epoch dataset and
//! verified against the much smaller per-epoch cache. Versions 2 to 4 hash
//! the 40-byte seed `hash_no_nonce ‖ LE64(nonce)` with Argon2id and carry an
//! all-zero mix digest.

use std::sync::Arc;
use std::time::Duration;

use aqua_core::crypto::{pow_seed, version_hash};
use aqua_core::error::ConsensusError;
use aqua_core::fork::HeaderVersion;
use aqua_core::types::Header;
use primitive_types::{H256, U256};
use tracing::{debug, error};

use crate::config::{AquahashConfig, PowMode};
use crate::ethash::{self, EPOCH_LENGTH, MAX_EPOCH, TEST_DATASET_SIZE};
use crate::store::{EpochKind, EpochStore};

/// Checks the proof-of-work seal of a single header.
pub trait SealVerifier: Send + Sync {
    fn verify_seal(&self, header: &Header) -> Result<(), ConsensusError>;
}

/// Largest result a header of `difficulty` may hash to: `⌊2^256 / difficulty⌋`.
///
/// Difficulty one accepts every result. Zero difficulty has no target.
pub fn target(difficulty: U256) -> Option<U256> {
    if difficulty.is_zero() {
        return None;
    }
    if difficulty == U256::one() {
        return Some(U256::MAX);
    }
    let quotient = U256::MAX / difficulty;
    // 2^256 is a multiple of the difficulty exactly when MAX leaves d - 1.
    if U256::MAX % difficulty == difficulty - 1 {
        Some(quotient + 1)
    } else {
        Some(quotient)
    }
}

/// Whether `result` meets `target`.
pub fn meets_target(result: &H256, target: &U256) -> bool {
    U256::from_big_endian(result.as_bytes()) <= *target
}

/// `(mix_digest, result)` of an Argon2id version for `(hash, nonce)`.
pub fn argon2id_pow(version: HeaderVersion, hash: &H256, nonce: u64) -> (H256, H256) {
    let result = version_hash(version, &pow_seed(hash, nonce));
    (H256::zero(), H256(result))
}

/// Real proof-of-work verification backed by epoch caches and datasets.
pub struct PowCodec {
    caches: EpochStore,
    datasets: EpochStore,
    test: bool,
}

impl PowCodec {
    pub fn new(config: &AquahashConfig) -> Self {
        let test = config.pow_mode == PowMode::Test;
        Self {
            caches: EpochStore::new(
                EpochKind::Cache,
                config.caches_in_mem,
                config.cache_spill_dir(),
                config.caches_on_disk,
                test,
                true,
            ),
            datasets: EpochStore::new(
                EpochKind::Dataset,
                config.datasets_in_mem,
                config.dataset_spill_dir(),
                config.datasets_on_disk,
                test,
                false,
            ),
            test,
        }
    }

    /// Whether tiny test caches and datasets are in use.
    pub fn is_test(&self) -> bool {
        self.test
    }

    fn dataset_size(&self, number: u64) -> u64 {
        if self.test {
            TEST_DATASET_SIZE
        } else {
            ethash::dataset_size(number)
        }
    }

    /// Verification cache of the epoch containing `number`.
    pub fn cache(&self, number: u64) -> Arc<Vec<u32>> {
        self.caches.get(ethash::epoch(number))
    }

    /// Mining dataset of the epoch containing `number`.
    pub fn dataset(&self, number: u64) -> Arc<Vec<u32>> {
        self.datasets.get(ethash::epoch(number))
    }

    /// Recompute `(mix_digest, result)` of `header` without a dataset.
    pub fn compute(
        &self,
        version: HeaderVersion,
        number: u64,
        hash: &H256,
        nonce: u64,
    ) -> (H256, H256) {
        match version {
            HeaderVersion::Keccak => {
                let cache = self.cache(number);
                ethash::hashimoto_light(self.dataset_size(number), &cache, hash, nonce)
            }
            HeaderVersion::Argon2idA | HeaderVersion::Argon2idB | HeaderVersion::Argon2idC => {
                argon2id_pow(version, hash, nonce)
            }
        }
    }

    /// A miner for blocks at `number` sealed with `version`.
    ///
    /// Version 1 miners hold the full epoch dataset.
    pub fn miner(&self, version: HeaderVersion, number: u64) -> Result<Miner, ConsensusError> {
        match version {
            HeaderVersion::Keccak => {
                if ethash::epoch(number) >= MAX_EPOCH {
                    return Err(ConsensusError::UnsupportedVersion(version));
                }
                Ok(Miner::Hashimoto {
                    dataset: self.dataset(number),
                })
            }
            HeaderVersion::Argon2idA | HeaderVersion::Argon2idB | HeaderVersion::Argon2idC => {
                Ok(Miner::Argon2id(version))
            }
        }
    }
}

impl SealVerifier for PowCodec {
    fn verify_seal(&self, header: &Header) -> Result<(), ConsensusError> {
        let number = header.number;
        let epoch = number / EPOCH_LENGTH;
        if epoch >= MAX_EPOCH {
            return Err(ConsensusError::NonceOutOfRange {
                epoch,
                max: MAX_EPOCH,
            });
        }
        let Some(target) = target(header.difficulty) else {
            return Err(ConsensusError::DifficultyZero);
        };
        let Some(version) = header.version else {
            return Err(ConsensusError::MissingVersion(number));
        };

        let (digest, result) = self.compute(version, number, &header.hash_no_nonce(), header.nonce);
        if digest != header.mix_digest {
            debug!(number, have = ?header.mix_digest, want = ?digest, "Mix digest mismatch");
            return Err(ConsensusError::InvalidMixDigest);
        }
        if !meets_target(&result, &target) {
            error!(number, %target, result = ?result, "Seal does not meet difficulty");
            return Err(ConsensusError::InvalidPoW);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PowCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowCodec")
            .field("caches", &self.caches)
            .field("datasets", &self.datasets)
            .field("test", &self.test)
            .finish()
    }
}

/// Seal verification of the fake modes: accepts everything after an optional
/// delay except the configured failing block number.
#[derive(Debug, Clone, Default)]
pub struct FakeSeal {
    pub fail: Option<u64>,
    pub delay: Duration,
}

impl SealVerifier for FakeSeal {
    fn verify_seal(&self, header: &Header) -> Result<(), ConsensusError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail == Some(header.number) {
            return Err(ConsensusError::InvalidPoW);
        }
        Ok(())
    }
}

/// Per-block hashing state of a sealing worker.
#[derive(Clone)]
pub enum Miner {
    Hashimoto { dataset: Arc<Vec<u32>> },
    Argon2id(HeaderVersion),
}

impl Miner {
    /// `(mix_digest, result)` for `nonce`.
    pub fn compute(&self, hash: &H256, nonce: u64) -> (H256, H256) {
        match self {
            Miner::Hashimoto { dataset } => ethash::hashimoto_full(dataset, hash, nonce),
            Miner::Argon2id(version) => argon2id_pow(*version, hash, nonce),
        }
    }
}

impl std::fmt::Debug for Miner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Miner::Hashimoto { dataset } => f
                .debug_struct("Hashimoto")
                .field("words", &dataset.len())
                .finish(),
            Miner::Argon2id(version) => f.debug_tuple("Argon2id").field(version).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_codec() -> PowCodec {
        PowCodec::new(&AquahashConfig::in_memory(PowMode::Test))
    }

    /// Search nonces from zero until the seal meets `difficulty`.
    fn mine(codec: &PowCodec, header: &Header) -> Header {
        let version = header.version.unwrap();
        let target = target(header.difficulty).unwrap();
        let hash = header.hash_no_nonce();
        for nonce in 0.. {
            let (mix, result) = codec.compute(version, header.number, &hash, nonce);
            if meets_target(&result, &target) {
                return Header {
                    nonce,
                    mix_digest: mix,
                    ..header.clone()
                };
            }
        }
        unreachable!()
    }

    fn header(version: HeaderVersion, difficulty: u64) -> Header {
        Header {
            number: 1,
            difficulty: U256::from(difficulty),
            gas_limit: 5000,
            time: 42,
            version: Some(version),
            ..Header::default()
        }
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    #[test]
    fn target_of_power_of_two_is_exact() {
        assert_eq!(target(U256::from(2u8)), Some(U256::one() << 255));
        assert_eq!(target(U256::from(256u16)), Some(U256::one() << 248));
    }

    #[test]
    fn target_of_other_difficulties_rounds_down() {
        assert_eq!(target(U256::from(3u8)), Some(U256::MAX / 3));
        assert_eq!(target(U256::one()), Some(U256::MAX));
        assert_eq!(target(U256::zero()), None);
    }

    proptest! {
        #[test]
        fn target_times_difficulty_never_exceeds_space(d in 2u64..u64::MAX) {
            let d = U256::from(d);
            let t = target(d).unwrap();
            // t * d <= 2^256 and (t + 1) * d > 2^256
            let (low, overflow) = t.overflowing_mul(d);
            prop_assert!(!overflow || low.is_zero());
            prop_assert!((t + 1).checked_mul(d).is_none());
        }

        #[test]
        fn argon2id_pow_is_deterministic(nonce: u64, seed: [u8; 32]) {
            let hash = H256(seed);
            prop_assert_eq!(
                argon2id_pow(HeaderVersion::Argon2idA, &hash, nonce),
                argon2id_pow(HeaderVersion::Argon2idA, &hash, nonce)
            );
        }
    }

    // ------------------------------------------------------------------
    // Seal verification
    // ------------------------------------------------------------------

    #[test]
    fn mined_argon2id_seal_verifies() {
        let codec = test_codec();
        let sealed = mine(&codec, &header(HeaderVersion::Argon2idA, 64));
        assert_eq!(sealed.mix_digest, H256::zero());
        assert_eq!(codec.verify_seal(&sealed), Ok(()));
    }

    #[test]
    fn mined_hashimoto_seal_verifies() {
        let codec = test_codec();
        let sealed = mine(&codec, &header(HeaderVersion::Keccak, 16));
        assert_ne!(sealed.mix_digest, H256::zero());
        assert_eq!(codec.verify_seal(&sealed), Ok(()));
    }

    #[test]
    fn tampered_mix_digest_is_rejected() {
        let codec = test_codec();
        let mut sealed = mine(&codec, &header(HeaderVersion::Keccak, 16));
        sealed.mix_digest = H256::repeat_byte(1);
        assert_eq!(codec.verify_seal(&sealed), Err(ConsensusError::InvalidMixDigest));

        let mut sealed = mine(&codec, &header(HeaderVersion::Argon2idA, 16));
        sealed.mix_digest = H256::repeat_byte(1);
        assert_eq!(codec.verify_seal(&sealed), Err(ConsensusError::InvalidMixDigest));
    }

    #[test]
    fn impossible_difficulty_is_rejected() {
        let codec = test_codec();
        let h = header(HeaderVersion::Argon2idA, 1);
        let h = Header {
            difficulty: U256::MAX,
            ..h
        };
        assert_eq!(codec.verify_seal(&h), Err(ConsensusError::InvalidPoW));
    }

    #[test]
    fn zero_difficulty_is_rejected() {
        let h = header(HeaderVersion::Argon2idA, 0);
        assert_eq!(test_codec().verify_seal(&h), Err(ConsensusError::DifficultyZero));
    }

    #[test]
    fn missing_version_is_rejected() {
        let h = Header {
            version: None,
            ..header(HeaderVersion::Argon2idA, 1)
        };
        assert_eq!(test_codec().verify_seal(&h), Err(ConsensusError::MissingVersion(1)));
    }

    #[test]
    fn height_beyond_epoch_table_is_rejected() {
        let h = Header {
            number: EPOCH_LENGTH * MAX_EPOCH,
            ..header(HeaderVersion::Argon2idA, 1)
        };
        assert!(matches!(
            test_codec().verify_seal(&h),
            Err(ConsensusError::NonceOutOfRange { epoch: 2048, .. })
        ));
    }

    #[test]
    fn miner_matches_light_computation() {
        let codec = test_codec();
        let hash = H256::repeat_byte(7);
        let miner = codec.miner(HeaderVersion::Keccak, 1).unwrap();
        assert_eq!(miner.compute(&hash, 99), codec.compute(HeaderVersion::Keccak, 1, &hash, 99));
        let miner = codec.miner(HeaderVersion::Argon2idB, 1).unwrap();
        assert_eq!(miner.compute(&hash, 99), codec.compute(HeaderVersion::Argon2idB, 1, &hash, 99));
    }

    #[test]
    fn hashimoto_miner_refuses_heights_past_table() {
        let codec = test_codec();
        assert_eq!(
            codec.miner(HeaderVersion::Keccak, EPOCH_LENGTH * MAX_EPOCH).unwrap_err(),
            ConsensusError::UnsupportedVersion(HeaderVersion::Keccak)
        );
    }

    // ------------------------------------------------------------------
    // Fake verifier
    // ------------------------------------------------------------------

    #[test]
    fn fake_seal_fails_only_configured_number() {
        let fake = FakeSeal {
            fail: Some(1),
            delay: Duration::ZERO,
        };
        let h = header(HeaderVersion::Argon2idA, 0);
        assert_eq!(fake.verify_seal(&h), Err(ConsensusError::InvalidPoW));
        let h = Header { number: 2, ..h };
        assert_eq!(fake.verify_seal(&h), Ok(()));
    }
}
