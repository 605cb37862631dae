//! Protocol constants. Monetary values are in wei (1 AQUA = 10^18 wei).

use primitive_types::U256;

/// Chain id of the canonical main network. Selects the mainnet difficulty floors.
pub const MAINNET_CHAIN_ID: u64 = 61_717_561;
/// Chain id of the public test network.
pub const TESTNET_CHAIN_ID: u64 = 617_175_610;
/// Chain id of the second public test network.
pub const TESTNET2_CHAIN_ID: u64 = 617_175_611;
/// Chain id used by unit-test chain configurations.
pub const TEST_CHAIN_ID: u64 = 1;

// ---------------------------------------------------------------------------
// Header validation
// ---------------------------------------------------------------------------

/// Maximum size of a header's extra-data section, in bytes.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// Seconds a block timestamp may lead the local clock before it is a future block.
pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 15;

/// Bound divisor of the gas limit, used in update calculations.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Minimum the gas limit may ever be.
pub const MIN_GAS_LIMIT: u64 = 5000;

/// Maximum gas limit (2^63 - 1).
pub const MAX_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

/// Bound divisor of the difficulty before hard fork 5.
pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;

/// Bound divisor of the difficulty from hard fork 5 onward.
pub const DIFFICULTY_BOUND_DIVISOR_HF5: u64 = 512;

/// Block-time decision boundary for eras 0 and 1, in seconds.
pub const DURATION_LIMIT: u64 = 10;

/// Block-time decision boundary from hard fork 2 onward (240 second blocks).
pub const DURATION_LIMIT_HF2: u64 = 240;

/// Length of one exponential-difficulty period, in blocks.
pub const EXP_DIFF_PERIOD: u64 = 100_000;

/// Grandparent difficulty below which the era-9 rule uses the coarse divisor.
pub const GRANDPARENT_DIFFICULTY_THRESHOLD: u64 = 10_000;

/// Divisor applied to the parent at the era-9 activation block on mainnet.
pub const JUMP_DIFFICULTY_HF9: u64 = 2;

/// Minimum difficulty from genesis until hard fork 1.
pub const MINIMUM_DIFFICULTY_GENESIS: U256 = U256([99_999_999, 0, 0, 0]);

/// Minimum difficulty from hard fork 1: the next multiple of 2048.
pub const MINIMUM_DIFFICULTY_HF1: U256 = U256([100_001_792, 0, 0, 0]);

/// Minimum difficulty from hard fork 3, raised in anticipation of GPU mining.
pub const MINIMUM_DIFFICULTY_HF3: U256 = U256([4_096_000_000, 0, 0, 0]);

/// Mainnet difficulty reset at hard fork 5 and floor afterwards.
pub const MINIMUM_DIFFICULTY_HF5: U256 = U256([46_039_386, 0, 0, 0]);

/// Test-network difficulty reset and floor from hard fork 5.
pub const MINIMUM_DIFFICULTY_HF5_TESTNET: U256 = U256([4096, 0, 0, 0]);

/// Mainnet difficulty reset at hard fork 8 and floor afterwards.
pub const MINIMUM_DIFFICULTY_HF8: U256 = U256([46_039_386, 0, 0, 0]);

/// Test-network difficulty reset and floor from hard fork 8.
pub const MINIMUM_DIFFICULTY_HF8_TESTNET: U256 = U256([4096, 0, 0, 0]);

// ---------------------------------------------------------------------------
// Rewards
// ---------------------------------------------------------------------------

/// Block reward in wei for successfully mining a block.
pub const BLOCK_REWARD: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

/// Height from which blocks earn fees only.
pub const MAX_MONEY: u64 = 42_000_000;

/// Maximum number of uncles allowed in a single block.
pub const MAX_UNCLES: usize = 2;

/// Maximum number of uncles allowed in a single block from hard fork 5.
pub const MAX_UNCLES_HF5: usize = 1;

/// Number of ancestor generations searched for uncle candidates.
pub const UNCLE_GENERATIONS: usize = 7;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hf1_floor_is_next_multiple_of_bound_divisor() {
        let genesis = MINIMUM_DIFFICULTY_GENESIS.low_u64();
        let hf1 = MINIMUM_DIFFICULTY_HF1.low_u64();
        assert_eq!(hf1 % DIFFICULTY_BOUND_DIVISOR, 0);
        assert!(hf1 > genesis);
        assert!(hf1 - genesis < DIFFICULTY_BOUND_DIVISOR);
    }

    #[test]
    fn block_reward_is_one_coin() {
        assert_eq!(BLOCK_REWARD, U256::exp10(18));
    }

    #[test]
    fn gas_cap_is_max_i64() {
        assert_eq!(MAX_GAS_LIMIT, i64::MAX as u64);
    }
}
