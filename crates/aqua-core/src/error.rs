//! Error types for the Aquahash consensus engine.
use primitive_types::{H256, U256};
use thiserror::Error;

use crate::fork::HeaderVersion;

/// Every way a header, block, or seal can fail consensus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // Structural
    #[error("extra-data too long: {len} > {max}")] ExtraDataTooLong { len: usize, max: usize },
    #[error("invalid gas limit: have {have}, max {max}")] GasLimitTooHigh { have: u64, max: u64 },
    #[error("invalid gas used: have {used}, gas limit {limit}")] GasUsedExceedsLimit { used: u64, limit: u64 },
    #[error("invalid gas limit: have {have}, want {parent} += {bound}")] InvalidGasLimit { have: u64, parent: u64, bound: u64 },
    #[error("invalid block number: have {have}, want {want}")] InvalidNumber { have: u64, want: u64 },
    #[error("header version not set at height {0}")] MissingVersion(u64),
    #[error("invalid header version: have {have}, want {want}")] InvalidVersion { have: HeaderVersion, want: HeaderVersion },

    // Temporal
    #[error("block in the future: {time} > {limit}")] FutureBlock { time: u64, limit: u64 },
    #[error("timestamp equals or precedes parent")] ZeroBlockTime,

    // Ancestry
    #[error("unknown ancestor {hash:?} at height {number}")] UnknownAncestor { hash: H256, number: u64 },

    // Difficulty and seal
    #[error("invalid difficulty: have {have}, want {want}")] InvalidDifficulty { have: U256, want: U256 },
    #[error("difficulty calculation overflowed")] DifficultyOverflow,
    #[error("invalid mix digest")] InvalidMixDigest,
    #[error("invalid proof-of-work")] InvalidPoW,
    #[error("nonce out of range: epoch {epoch} >= {max}")] NonceOutOfRange { epoch: u64, max: u64 },
    #[error("unsupported header version for sealing: {0}")] UnsupportedVersion(HeaderVersion),

    // Light verifier
    #[error("header has no valid version")] NoVersion,
    #[error("difficulty is zero")] DifficultyZero,
    #[error("mix digest must be zero for argon2id headers")] MixDigestNonZero,

    // Uncles
    #[error("too many uncles: {count} > {max}")] TooManyUncles { count: usize, max: usize },
    #[error("duplicate uncle {0:?}")] DuplicateUncle(H256),
    #[error("uncle {0:?} is ancestor")] UncleIsAncestor(H256),
    #[error("uncle's parent {0:?} is not ancestor")] DanglingUncle(H256),

    // Sealer
    #[error("sealing: {0}")] Sealing(String),
}

impl ConsensusError {
    /// Whether the caller should fetch a missing ancestor and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsensusError::UnknownAncestor { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")] Load(String),
    #[error("invalid config value for {key}: {reason}")] Invalid { key: String, reason: String },
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
