//! Uncle validation.
//!
//! An uncle must be a recent sibling of an ancestor: its parent has to be
//! one of the last [`UNCLE_GENERATIONS`] ancestors (but not the block's own
//! parent), it must not itself be an ancestor, and it may be rewarded only
//! once across that window. A handful of historical mainnet blocks break the
//! duplicate and dangling rules; they are listed in the tables below and
//! accepted by exact match.

use std::collections::{HashMap, HashSet};

use aqua_core::constants::{MAX_UNCLES, MAX_UNCLES_HF5, UNCLE_GENERATIONS};
use aqua_core::error::ConsensusError;
use aqua_core::traits::ChainReader;
use aqua_core::types::{Block, Header};
use primitive_types::H256;
use tracing::debug;

use crate::verifier::HeaderValidator;

/// Duplicate uncles are only forgiven while the ancestor walk ends at or
/// below this height.
pub const DUPLICATE_UNCLE_CUTOFF: u64 = 15_000;

const fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => panic!("invalid hex digit"),
    }
}

const fn h256(hex: &str) -> H256 {
    let bytes = hex.as_bytes();
    assert!(bytes.len() == 64);
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = (nibble(bytes[2 * i]) << 4) | nibble(bytes[2 * i + 1]);
        i += 1;
    }
    H256(out)
}

/// Blocks allowed to re-reward an uncle: `(block hash, uncle number)`.
pub const DUPLICATE_UNCLE_ALLOWLIST: [(H256, u64); 3] = [
    (h256("bac2283407b519ffbb8c47772d1b7cf740646dddf69744ff44219cb868b00548"), 13_313),
    (h256("a955c8499ce9c4fb00700a8d97db8600dc50c8a81275627a18e30cfb82c19ac2"), 13_315),
    (h256("7da0315b99e059f17b18bfd7f07c57b8e3be3aac261dbf470fb2d6cb0acb9899"), 13_998),
];

/// How a dangling-uncle exception is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingKey {
    /// By the hash of the uncle's parent.
    Parent(H256),
    /// By the uncle's own hash.
    Uncle(H256),
}

/// Uncles allowed to dangle: `(key, uncle number)`.
pub const DANGLING_UNCLE_ALLOWLIST: [(DanglingKey, u64); 5] = [
    (DanglingKey::Parent(h256("6b818656fb5059ab4dd070e2c2822a7774065090e74ff31515764212c88e2923")), 14_003),
    (DanglingKey::Parent(h256("0afd1b00b8e1a49652beeb860e3b58dacc865dd3e3d9d303374ed3ffdfef8eea")), 14_001),
    (DanglingKey::Uncle(h256("ed6dae6d2d4f599d78429e127e8a654fe96c30f4b6c9bacb01cfa45d8a57b45e")), 14_004),
    (DanglingKey::Uncle(h256("13cb01d5d3566d076b5e128e5733f17968f95329fb1777ff38db53abdcca3e4c")), 14_008),
    (DanglingKey::Uncle(h256("822735d89d8493434d3ec1f504c9f103d7bb4761cd358370b00dd234621cf1b9")), 14_009),
];

/// Whether `block` may include the already-rewarded uncle numbered `uncle`.
pub fn is_allowed_duplicate(block: &H256, uncle: u64) -> bool {
    DUPLICATE_UNCLE_ALLOWLIST
        .iter()
        .any(|(hash, number)| hash == block && *number == uncle)
}

/// Whether an uncle with this hash, parent, and number may dangle.
pub fn is_allowed_dangling(uncle_hash: &H256, parent_hash: &H256, number: u64) -> bool {
    DANGLING_UNCLE_ALLOWLIST.iter().any(|(key, n)| {
        *n == number
            && match key {
                DanglingKey::Parent(hash) => hash == parent_hash,
                DanglingKey::Uncle(hash) => hash == uncle_hash,
            }
    })
}

/// Verify the uncles of `block`.
pub fn verify_uncles(
    validator: &HeaderValidator,
    chain: &dyn ChainReader,
    block: &Block,
) -> Result<(), ConsensusError> {
    let config = chain.config();
    let count = block.uncles.len();
    if count > MAX_UNCLES {
        return Err(ConsensusError::TooManyUncles {
            count,
            max: MAX_UNCLES,
        });
    }
    if count > MAX_UNCLES_HF5 && config.is_hf(5, block.number()) {
        return Err(ConsensusError::TooManyUncles {
            count,
            max: MAX_UNCLES_HF5,
        });
    }

    // Gather the recent ancestors and every uncle they already rewarded.
    let mut uncles = HashSet::new();
    let mut ancestors: HashMap<H256, Header> = HashMap::new();
    let mut number = block.number().wrapping_sub(1);
    let mut parent = block.parent_hash();
    for _ in 0..UNCLE_GENERATIONS {
        let Some(ancestor) = chain.get_block(&parent, number) else {
            break;
        };
        let header = ancestor.header.with_version(config.header_version(number));
        for uncle in &ancestor.uncles {
            uncles.insert(uncle.with_version(config.header_version(uncle.number)).hash());
        }
        parent = header.parent_hash;
        ancestors.insert(header.hash(), header);
        number = number.wrapping_sub(1);
    }

    if block.version().is_none() {
        return Err(ConsensusError::MissingVersion(block.number()));
    }
    let block_hash = block.hash();
    ancestors.insert(block_hash, block.header.clone());
    uncles.insert(block_hash);

    for uncle in &block.uncles {
        let uncle = uncle.with_version(config.header_version(uncle.number));
        let hash = uncle.hash();

        if !uncles.insert(hash)
            && !(number <= DUPLICATE_UNCLE_CUTOFF && is_allowed_duplicate(&block_hash, uncle.number))
        {
            return Err(ConsensusError::DuplicateUncle(hash));
        }
        if ancestors.contains_key(&hash) {
            return Err(ConsensusError::UncleIsAncestor(hash));
        }

        let parent = match ancestors.get(&uncle.parent_hash) {
            Some(parent) if uncle.parent_hash != block.parent_hash() => parent,
            _ => {
                if is_allowed_dangling(&hash, &uncle.parent_hash, uncle.number) {
                    debug!(uncle = uncle.number, number, "Accepting historical dangling uncle");
                    return Ok(());
                }
                return Err(ConsensusError::DanglingUncle(uncle.parent_hash));
            }
        };
        let grandparent = ancestors
            .get(&parent.parent_hash)
            .cloned()
            .or_else(|| chain.get_header(&parent.parent_hash, parent.number.wrapping_sub(1)));
        validator.verify(config, &uncle, parent, grandparent.as_ref(), true, true)?;
    }
    Ok(())
}
