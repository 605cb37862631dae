//! Block and uncle rewards, and block finalization.
//!
//! Every block below [`MAX_MONEY`] pays a fixed [`BLOCK_REWARD`] to its
//! coinbase. Each included uncle pays its own coinbase a share that shrinks
//! with its distance from the including block, and adds `R / 32` to the
//! including miner:
//!
//! - uncle: `(uncle.number + 8 - number) * R / 8`
//! - miner: `R + uncles * R / 32`
//!
//! From height [`MAX_MONEY`] on, blocks are fee-only and nothing is credited.

use aqua_core::constants::{BLOCK_REWARD, MAX_MONEY};
use aqua_core::fork::ChainConfig;
use aqua_core::traits::StateDb;
use aqua_core::types::{Block, Header, Receipt, Transaction};
use primitive_types::U256;

/// Whether a block at `number` still mints new coins.
pub fn is_rewarding(number: u64) -> bool {
    number < MAX_MONEY
}

/// Reward of an uncle numbered `uncle` included at `number`.
pub fn uncle_reward(number: u64, uncle: u64) -> U256 {
    let distance_share = (uncle + 8).saturating_sub(number);
    U256::from(distance_share) * BLOCK_REWARD / 8
}

/// Reward of the including miner for `uncles` uncles.
pub fn miner_reward(uncles: usize) -> U256 {
    BLOCK_REWARD + U256::from(uncles) * (BLOCK_REWARD / 32)
}

/// Credit the block and uncle rewards of `header` to `state`.
pub fn accumulate_rewards(state: &mut dyn StateDb, header: &Header, uncles: &[Header]) {
    if !is_rewarding(header.number) {
        return;
    }
    for uncle in uncles {
        state.add_balance(&uncle.coinbase, uncle_reward(header.number, uncle.number));
    }
    state.add_balance(&header.coinbase, miner_reward(uncles.len()));
}

/// Set versions, credit rewards, commit the state root, and assemble the block.
pub fn finalize(
    config: &ChainConfig,
    mut header: Header,
    state: &mut dyn StateDb,
    txs: Vec<Transaction>,
    mut uncles: Vec<Header>,
    receipts: Vec<Receipt>,
) -> Block {
    if header.version.is_none() {
        header.version = Some(config.header_version(header.number));
    }
    // Uncles carry the including block's version.
    for uncle in &mut uncles {
        uncle.version = header.version;
    }
    accumulate_rewards(state, &header, &uncles);
    header.state_root = state.intermediate_root();
    Block::new(header, txs, uncles, receipts)
}
