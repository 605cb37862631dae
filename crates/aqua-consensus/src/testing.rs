//! In-memory chain and state for tests.
//!
//! Available under `#[cfg(test)]` and the `testing` feature.

use std::collections::HashMap;

use aqua_core::error::ConsensusError;
use aqua_core::fork::ChainConfig;
use aqua_core::traits::{ChainReader, StateDb};
use aqua_core::types::{Address, Block, Header, calc_uncle_hash};
use parking_lot::RwLock;
use primitive_types::{H256, U256};

use crate::difficulty::calc_difficulty;

/// Gas limit of generated genesis blocks.
pub const GENESIS_GAS_LIMIT: u64 = 4_712_388;

/// A [`ChainReader`] over maps of headers and blocks.
///
/// Every inserted block is stored by its versioned hash. The canonical chain
/// is the sequence of blocks inserted with [`MemoryChain::insert_canonical`].
pub struct MemoryChain {
    config: ChainConfig,
    headers: RwLock<HashMap<(H256, u64), Header>>,
    blocks: RwLock<HashMap<(H256, u64), Block>>,
    canonical: RwLock<Vec<Header>>,
}

impl MemoryChain {
    /// A chain holding only `genesis`.
    pub fn new(config: ChainConfig, genesis: Block) -> Self {
        let chain = Self {
            config,
            headers: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
            canonical: RwLock::new(Vec::new()),
        };
        chain.insert_canonical(genesis);
        chain
    }

    /// A chain with a default genesis block of `difficulty`.
    pub fn with_genesis(config: ChainConfig, difficulty: U256) -> Self {
        let genesis = genesis_block(&config, difficulty);
        Self::new(config, genesis)
    }

    /// Store `block` without changing the canonical chain.
    pub fn insert(&self, mut block: Block) -> H256 {
        let number = block.number();
        let version = self.config.header_version(number);
        let hash = block.header.set_version(version);
        self.headers.write().insert((hash, number), block.header.clone());
        self.blocks.write().insert((hash, number), block);
        hash
    }

    /// Store `block` and make it the new head.
    pub fn insert_canonical(&self, block: Block) -> H256 {
        let number = block.number();
        let hash = self.insert(block);
        let header = self.headers.read().get(&(hash, number)).cloned();
        if let Some(header) = header {
            let mut canonical = self.canonical.write();
            canonical.truncate(number as usize);
            canonical.push(header);
        }
        hash
    }

    /// Current head.
    pub fn head(&self) -> Header {
        self.canonical.read().last().cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.canonical.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.read().is_empty()
    }
}

impl ChainReader for MemoryChain {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn current_header(&self) -> Option<Header> {
        self.canonical.read().last().cloned()
    }

    fn get_header(&self, hash: &H256, number: u64) -> Option<Header> {
        self.headers.read().get(&(*hash, number)).cloned()
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.canonical.read().get(number as usize).cloned()
    }

    fn get_block(&self, hash: &H256, number: u64) -> Option<Block> {
        self.blocks.read().get(&(*hash, number)).cloned()
    }
}

/// Account balances keyed by address; the root hashes the sorted balances.
#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    pub balances: HashMap<Address, U256>,
}

impl MemoryState {
    pub fn balance(&self, address: &Address) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }
}

impl StateDb for MemoryState {
    fn add_balance(&mut self, address: &Address, amount: U256) {
        let balance = self.balances.entry(*address).or_default();
        *balance = balance.saturating_add(amount);
    }

    fn intermediate_root(&mut self) -> H256 {
        let mut entries: Vec<_> = self.balances.iter().collect();
        entries.sort_by_key(|(address, _)| **address);
        let mut buf = Vec::with_capacity(entries.len() * 52);
        for (address, balance) in entries {
            buf.extend_from_slice(address.as_bytes());
            let mut word = [0u8; 32];
            balance.to_big_endian(&mut word);
            buf.extend_from_slice(&word);
        }
        aqua_core::crypto::keccak256(buf)
    }
}

/// Genesis block of `config` with the given difficulty.
pub fn genesis_block(config: &ChainConfig, difficulty: U256) -> Block {
    let header = Header {
        difficulty,
        gas_limit: GENESIS_GAS_LIMIT,
        extra: b"aquahash test genesis".to_vec(),
        version: Some(config.header_version(0)),
        ..Header::default()
    };
    Block::new(header, Vec::new(), Vec::new(), Vec::new())
}

/// Unsealed, uncle-less child of `parent` mined `delay` seconds later, with
/// the difficulty and version the chain requires.
pub fn child_header(
    config: &ChainConfig,
    parent: &Header,
    grandparent: Option<&Header>,
    delay: u64,
) -> Result<Header, ConsensusError> {
    let number = parent.number + 1;
    let time = parent.time + delay;
    let mut parent = parent.clone();
    let parent_hash = parent.set_version(config.header_version(parent.number));
    Ok(Header {
        parent_hash,
        uncle_hash: calc_uncle_hash(&[]),
        difficulty: calc_difficulty(config, time, &parent, grandparent)?,
        number,
        gas_limit: parent.gas_limit,
        time,
        version: Some(config.header_version(number)),
        ..Header::default()
    })
}

/// `count` unsealed headers extending the head of `chain`, `delay` seconds apart.
pub fn extend(chain: &MemoryChain, count: usize, delay: u64) -> Result<Vec<Header>, ConsensusError> {
    let head = chain.head();
    let mut grandparent = chain.get_header(&head.parent_hash, head.number.wrapping_sub(1));
    let mut parent = head;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let header = child_header(&chain.config, &parent, grandparent.as_ref(), delay)?;
        grandparent = Some(parent);
        parent = header.clone();
        out.push(header);
    }
    Ok(out)
}
