//! Hard-fork schedule, era classification, and header-version selection.
//!
//! Every consensus rule in the engine is keyed by the *era* a block height
//! falls into. A [`ForkSchedule`] maps hard-fork indices to activation
//! heights; heights may be absent (fork not scheduled) or negative (fork
//! disabled, used by test networks). The active era at a height is the
//! highest index whose activation height is at or below that height.
//!
//! Eras and proof-of-work header versions are closed enumerations so that
//! adding a new fork forces every consumer to handle it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAINNET_CHAIN_ID, TEST_CHAIN_ID, TESTNET2_CHAIN_ID, TESTNET_CHAIN_ID};

/// Consensus era: the highest hard fork active at a given height.
///
/// Heights before any scheduled fork belong to [`Era::Hf0`], which made no
/// rule changes of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Era {
    Hf0,
    Hf1,
    Hf2,
    Hf3,
    Hf4,
    Hf5,
    Hf6,
    Hf7,
    Hf8,
    Hf9,
}

impl Era {
    /// All eras in ascending order.
    pub const ALL: [Era; 10] = [
        Era::Hf0,
        Era::Hf1,
        Era::Hf2,
        Era::Hf3,
        Era::Hf4,
        Era::Hf5,
        Era::Hf6,
        Era::Hf7,
        Era::Hf8,
        Era::Hf9,
    ];

    /// The hard-fork index this era starts at.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Map a hard-fork index to its era. Indices past the newest known fork
    /// have no era.
    pub fn from_index(index: usize) -> Option<Era> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HF{}", self.index())
    }
}

/// Proof-of-work algorithm identifier carried (but never hashed or
/// transmitted) by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HeaderVersion {
    /// Memory-hard hashimoto over a per-epoch dataset.
    Keccak = 1,
    /// Argon2id with 1 KiB of memory.
    Argon2idA = 2,
    /// Argon2id with 16 KiB of memory.
    Argon2idB = 3,
    /// Argon2id with 32 KiB of memory.
    Argon2idC = 4,
}

impl HeaderVersion {
    /// Newest version this engine can hash.
    pub const KNOWN: HeaderVersion = HeaderVersion::Argon2idC;

    /// The version as its wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for HeaderVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Keccak),
            2 => Ok(Self::Argon2idA),
            3 => Ok(Self::Argon2idB),
            4 => Ok(Self::Argon2idC),
            other => Err(other),
        }
    }
}

impl fmt::Display for HeaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Ordered map of hard-fork index to activation height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkSchedule(BTreeMap<usize, i64>);

impl ForkSchedule {
    /// Build a schedule from `(index, height)` pairs.
    pub fn new(forks: impl IntoIterator<Item = (usize, i64)>) -> Self {
        Self(forks.into_iter().collect())
    }

    /// Raw scheduled height for fork `hf`, which may be negative (disabled).
    pub fn get(&self, hf: usize) -> Option<i64> {
        self.0.get(&hf).copied()
    }

    /// Schedule or reschedule fork `hf`.
    pub fn set(&mut self, hf: usize, height: i64) {
        self.0.insert(hf, height);
    }

    /// Whether fork `hf` is scheduled, enabled, and active at `height`.
    pub fn is_active(&self, hf: usize, height: u64) -> bool {
        match self.get(hf) {
            Some(at) if at >= 0 => at as u64 <= height,
            _ => false,
        }
    }

    /// Whether `height` is exactly the activation height of fork `hf`.
    pub fn is_activation(&self, hf: usize, height: u64) -> bool {
        matches!(self.get(hf), Some(at) if at >= 0 && at as u64 == height)
    }

    /// First enabled activation height strictly above `height`.
    pub fn next_after(&self, height: u64) -> Option<u64> {
        self.0
            .values()
            .filter(|&&at| at >= 0 && at as u64 > height)
            .map(|&at| at as u64)
            .min()
    }

    /// Iterate `(index, height)` pairs in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.0.iter().map(|(&k, &v)| (k, v))
    }
}

impl fmt::Display for ForkSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (index, height) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{index}:{height}")?;
            first = false;
        }
        Ok(())
    }
}

/// Chain identity plus its hard-fork schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain id; equality with [`MAINNET_CHAIN_ID`] selects mainnet floors.
    pub chain_id: u64,
    /// Scheduled maintenance hard forks.
    pub hf: ForkSchedule,
}

impl ChainConfig {
    /// The AquaChain main network.
    pub fn mainnet() -> Self {
        Self {
            chain_id: MAINNET_CHAIN_ID,
            hf: ForkSchedule::new([
                (0, 3000),  // no changes
                (1, 3600),  // increase min difficulty to the next multiple of 2048
                (2, 7200),  // simple difficulty algorithm (240 seconds)
                (3, 13026), // increase min difficulty for gpu mining
                (4, 21800), // fix bad genesis alloc
                (5, 22800), // move to argon2id
            ]),
        }
    }

    /// The public test network.
    pub fn testnet() -> Self {
        Self {
            chain_id: TESTNET_CHAIN_ID,
            hf: Self::testnet_schedule(),
        }
    }

    /// The second public test network.
    pub fn testnet2() -> Self {
        Self {
            chain_id: TESTNET2_CHAIN_ID,
            hf: Self::testnet_schedule(),
        }
    }

    /// Configuration used by unit tests: testnet forks under chain id 1.
    pub fn test() -> Self {
        Self {
            chain_id: TEST_CHAIN_ID,
            hf: Self::testnet_schedule(),
        }
    }

    fn testnet_schedule() -> ForkSchedule {
        ForkSchedule::new([(0, 0), (1, -1), (2, 0), (3, -1), (4, 1), (5, 1)])
    }

    /// Whether this is the canonical main network.
    pub fn is_mainnet(&self) -> bool {
        self.chain_id == MAINNET_CHAIN_ID
    }

    /// Whether hard fork `hf` is active at `height`.
    pub fn is_hf(&self, hf: usize, height: u64) -> bool {
        self.hf.is_active(hf, height)
    }

    /// Raw scheduled height of hard fork `hf`.
    pub fn get_hf(&self, hf: usize) -> Option<i64> {
        self.hf.get(hf)
    }

    /// The first scheduled hard fork strictly after `height`.
    pub fn next_hf(&self, height: u64) -> Option<u64> {
        self.hf.next_after(height)
    }

    /// Highest era whose fork is active at `height`.
    pub fn active_era(&self, height: u64) -> Era {
        Era::ALL
            .iter()
            .rev()
            .copied()
            .find(|era| self.is_hf(era.index(), height))
            .unwrap_or(Era::Hf0)
    }

    /// Whether `height` is exactly where `era` activates.
    pub fn is_activation(&self, era: Era, height: u64) -> bool {
        self.hf.is_activation(era.index(), height)
    }

    /// Proof-of-work algorithm a block at `height` must be sealed with.
    ///
    /// The genesis block always uses [`HeaderVersion::Keccak`], even on
    /// networks that schedule the argon2id fork at height zero.
    pub fn header_version(&self, height: u64) -> HeaderVersion {
        match self.active_era(height) {
            Era::Hf9 => HeaderVersion::Argon2idC,
            Era::Hf8 => HeaderVersion::Argon2idB,
            Era::Hf5 | Era::Hf6 | Era::Hf7 if height != 0 => HeaderVersion::Argon2idA,
            Era::Hf5 | Era::Hf6 | Era::Hf7 => HeaderVersion::Keccak,
            Era::Hf0 | Era::Hf1 | Era::Hf2 | Era::Hf3 | Era::Hf4 => HeaderVersion::Keccak,
        }
    }
}

impl fmt::Display for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ChainID: {}, Engine: aquahash, HF-Ready: {}}}",
            self.chain_id, self.hf
        )
    }
}
