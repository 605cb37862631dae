//! Shared helpers for the integration tests.

use std::sync::Arc;

use aqua_consensus::Aquahash;
use aqua_consensus::testing::{MemoryChain, MemoryState, child_header};
use aqua_core::constants::TEST_CHAIN_ID;
use aqua_core::error::ConsensusError;
use aqua_core::fork::{ChainConfig, ForkSchedule};
use aqua_core::traits::{AbortSignal, ChainReader, Engine};
use aqua_core::types::{Address, Block, Header, Transaction};
use primitive_types::U256;

/// Genesis difficulty of test chains; also the testnet Argon2id floor.
pub const GENESIS_DIFFICULTY: u64 = 4096;

/// Seconds between consecutive test blocks.
pub const BLOCK_DELAY: u64 = 30;

/// Fixed "now" far past every test block, for engines with a pinned clock.
pub const NOW: u64 = 1_700_000_000;

/// Simple coinbase from a seed byte.
pub fn miner(seed: u8) -> Address {
    Address::repeat_byte(seed)
}

/// Test chain holding only genesis, on the testnet fork schedule.
pub fn test_chain() -> Arc<MemoryChain> {
    Arc::new(MemoryChain::with_genesis(
        ChainConfig::test(),
        U256::from(GENESIS_DIFFICULTY),
    ))
}

/// Schedule walking through every Argon2id version within six blocks:
/// HF5 at 1, HF8 at 3, HF9 at 5.
pub fn all_eras_config() -> ChainConfig {
    ChainConfig {
        chain_id: TEST_CHAIN_ID,
        hf: ForkSchedule::new([(0, 0), (2, 0), (4, 1), (5, 1), (8, 3), (9, 5)]),
    }
}

/// Full engine with tiny caches, two mining threads, and a pinned clock.
pub fn tester() -> Arc<Aquahash> {
    let engine = Aquahash::new_tester().with_clock(|| NOW);
    engine.set_threads(2);
    Arc::new(engine)
}

/// Prepare, finalize, and seal a child of `parent`.
///
/// The block is not inserted into `chain`.
pub fn mine_block(
    chain: &MemoryChain,
    engine: &dyn Engine,
    parent: &Header,
    coinbase: Address,
    uncles: Vec<Header>,
) -> Result<Block, ConsensusError> {
    let grandparent = chain.get_header(&parent.parent_hash, parent.number.wrapping_sub(1));
    let mut header = Header {
        coinbase,
        ..child_header(chain.config(), parent, grandparent.as_ref(), BLOCK_DELAY)?
    };
    engine.prepare(chain, &mut header)?;

    let mut state = MemoryState::default();
    let txs = vec![Transaction(parent.number.to_be_bytes().to_vec())];
    let block = engine.finalize(chain, header, &mut state, txs, uncles, Vec::new())?;
    engine
        .seal(chain, block, &AbortSignal::new())?
        .ok_or_else(|| ConsensusError::Sealing("aborted".to_string()))
}

/// Mine `count` blocks on top of the head of `chain`, inserting each as the
/// new head. Coinbases cycle through seeds `1..`.
pub fn mine_chain(
    chain: &MemoryChain,
    engine: &dyn Engine,
    count: usize,
) -> Result<Vec<Block>, ConsensusError> {
    let mut blocks = Vec::with_capacity(count);
    for i in 0..count {
        let head = chain.head();
        let block = mine_block(chain, engine, &head, miner(i as u8 + 1), Vec::new())?;
        chain.insert_canonical(block.clone());
        blocks.push(block);
    }
    Ok(blocks)
}

/// Headers of `blocks`, in order.
pub fn headers(blocks: &[Block]) -> Vec<Header> {
    blocks.iter().map(|b| b.header.clone()).collect()
}
