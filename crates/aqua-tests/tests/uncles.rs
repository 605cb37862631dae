//! Uncle inclusion over real sealed blocks: validation and rewards.

use aqua_consensus::reward::{miner_reward, uncle_reward};
use aqua_consensus::testing::MemoryState;
use aqua_core::constants::BLOCK_REWARD;
use aqua_core::error::ConsensusError;
use aqua_core::traits::{ChainReader, Engine, StateDb};
use aqua_core::types::Header;
use aqua_tests::helpers::*;
use primitive_types::{H256, U256};

/// Canonical genesis -> 1, with a sealed sibling of block 1 stored off-chain.
fn forked_chain() -> (
    std::sync::Arc<aqua_consensus::testing::MemoryChain>,
    std::sync::Arc<aqua_consensus::Aquahash>,
    Header,
) {
    let chain = test_chain();
    let engine = tester();
    let genesis = chain.head();
    let sibling = mine_block(&chain, engine.as_ref(), &genesis, miner(0xee), Vec::new()).unwrap();
    chain.insert(sibling.clone());
    mine_chain(&chain, engine.as_ref(), 1).unwrap();
    (chain, engine, sibling.header)
}

#[test]
fn sibling_is_a_valid_uncle() {
    let (chain, engine, sibling) = forked_chain();
    let head = chain.head();
    let block = mine_block(&chain, engine.as_ref(), &head, miner(2), vec![sibling]).unwrap();
    assert_eq!(block.uncles.len(), 1);
    assert_eq!(engine.verify_uncles(chain.as_ref(), &block), Ok(()));
    assert_eq!(engine.verify_header(chain.as_ref(), &block.header, true), Ok(()));
}

#[test]
fn one_uncle_after_hf5() {
    let (chain, engine, sibling) = forked_chain();
    let head = chain.head();
    let block = mine_block(&chain, engine.as_ref(), &head, miner(2), vec![sibling.clone(), sibling])
        .unwrap();
    assert_eq!(
        engine.verify_uncles(chain.as_ref(), &block),
        Err(ConsensusError::TooManyUncles { count: 2, max: 1 })
    );
}

#[test]
fn ancestor_cannot_be_uncle() {
    let (chain, engine, _sibling) = forked_chain();
    let head = chain.head();
    let block = mine_block(&chain, engine.as_ref(), &head, miner(2), vec![head.clone()]).unwrap();
    assert_eq!(
        engine.verify_uncles(chain.as_ref(), &block),
        Err(ConsensusError::UncleIsAncestor(head.hash()))
    );
}

#[test]
fn uncle_with_unknown_parent_dangles() {
    let (chain, engine, mut sibling) = forked_chain();
    sibling.parent_hash = H256::repeat_byte(0x42);
    let head = chain.head();
    let block = mine_block(&chain, engine.as_ref(), &head, miner(2), vec![sibling]).unwrap();
    assert_eq!(
        engine.verify_uncles(chain.as_ref(), &block),
        Err(ConsensusError::DanglingUncle(H256::repeat_byte(0x42)))
    );
}

#[test]
fn uncle_included_twice_is_duplicate() {
    let (chain, engine, sibling) = forked_chain();
    let head = chain.head();
    let block = mine_block(&chain, engine.as_ref(), &head, miner(2), vec![sibling.clone()]).unwrap();
    chain.insert_canonical(block.clone());

    let head = chain.head();
    let again = mine_block(&chain, engine.as_ref(), &head, miner(3), vec![block.uncles[0].clone()])
        .unwrap();
    assert_eq!(
        engine.verify_uncles(chain.as_ref(), &again),
        Err(ConsensusError::DuplicateUncle(block.uncles[0].hash()))
    );
}

#[test]
fn finalize_pays_uncle_and_nephew() {
    let (chain, engine, sibling) = forked_chain();
    let head = chain.head();
    let header = Header {
        number: head.number + 1,
        coinbase: miner(2),
        ..Header::default()
    };
    let mut state = MemoryState::default();
    let block = engine
        .finalize(chain.as_ref(), header, &mut state, Vec::new(), vec![sibling], Vec::new())
        .unwrap();

    assert_eq!(state.balance(&miner(2)), miner_reward(1));
    assert_eq!(state.balance(&miner(2)), BLOCK_REWARD + BLOCK_REWARD / 32);
    assert_eq!(state.balance(&miner(0xee)), uncle_reward(2, 1));
    assert_eq!(state.balance(&miner(0xee)), BLOCK_REWARD * U256::from(7) / 8);
    assert_eq!(block.header.state_root, state.intermediate_root());
}

#[test]
fn uncle_is_looked_up_by_versioned_hash() {
    let (chain, _engine, sibling) = forked_chain();
    let stored = chain.get_header(&sibling.hash(), 1).unwrap();
    assert_eq!(stored.hash(), sibling.hash());
}
