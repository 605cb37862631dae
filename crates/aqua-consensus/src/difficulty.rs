//! Per-era difficulty adjustment.
//!
//! Every era uses the same "step" shape: take `parent / divisor` as the
//! adjustment, add it when the block came faster than the duration limit and
//! subtract it otherwise, then clamp to the era's floor. Eras differ in the
//! divisor, the duration limit, the floor, and a few special cases:
//!
//! - Eras 0 and 1 add the exponential "bomb" term `2^(period - 2)` after
//!   clamping. Era 0 re-clamps afterwards; era 1 does not, which is the
//!   historical behaviour and must stay that way.
//! - At the exact activation height of hard forks 5 and 8 the formula is
//!   skipped and a fixed reset value is returned, absorbing the change of
//!   proof-of-work algorithm.
//! - Era 9 adjusts from the grandparent's difficulty over the
//!   parent-to-grandparent block time.
//!
//! All arithmetic is on 256-bit unsigned integers. Additions that would
//! exceed 256 bits are reported as [`ConsensusError::DifficultyOverflow`];
//! subtractions saturate and are then clamped to the floor.

use aqua_core::constants::{
    DIFFICULTY_BOUND_DIVISOR, DIFFICULTY_BOUND_DIVISOR_HF5, DURATION_LIMIT, DURATION_LIMIT_HF2,
    EXP_DIFF_PERIOD, GRANDPARENT_DIFFICULTY_THRESHOLD, JUMP_DIFFICULTY_HF9,
    MINIMUM_DIFFICULTY_GENESIS, MINIMUM_DIFFICULTY_HF1, MINIMUM_DIFFICULTY_HF3,
    MINIMUM_DIFFICULTY_HF5, MINIMUM_DIFFICULTY_HF5_TESTNET, MINIMUM_DIFFICULTY_HF8,
    MINIMUM_DIFFICULTY_HF8_TESTNET,
};
use aqua_core::error::ConsensusError;
use aqua_core::fork::{ChainConfig, Era};
use aqua_core::types::Header;
use primitive_types::U256;
use tracing::{debug, info};

/// Difficulty required of the block following `parent` with timestamp `time`.
///
/// `grandparent` is only consulted once hard fork 9 is active; a missing
/// grandparent there is an ancestry error the caller may retry.
pub fn calc_difficulty(
    config: &ChainConfig,
    time: u64,
    parent: &Header,
    grandparent: Option<&Header>,
) -> Result<U256, ConsensusError> {
    let next = parent.number.saturating_add(1);
    let mainnet = config.is_mainnet();
    let era = config.active_era(next);
    let activation = config.is_activation(era, next);
    if activation {
        info!(hf = era.index(), number = next, "Activating hard fork");
    }

    let diff = match era {
        Era::Hf9 if activation => {
            if mainnet {
                parent.difficulty - parent.difficulty / JUMP_DIFFICULTY_HF9
            } else {
                MINIMUM_DIFFICULTY_HF8_TESTNET
            }
        }
        Era::Hf9 => grandparent_step(parent, grandparent, hf8_floor(mainnet))?,
        Era::Hf8 if activation => hf8_floor(mainnet),
        Era::Hf8 => step(
            time,
            parent,
            DIFFICULTY_BOUND_DIVISOR_HF5,
            DURATION_LIMIT_HF2,
            hf8_floor(mainnet),
        )?,
        Era::Hf5 if activation => hf5_floor(mainnet),
        Era::Hf5 | Era::Hf6 | Era::Hf7 => step(
            time,
            parent,
            DIFFICULTY_BOUND_DIVISOR_HF5,
            DURATION_LIMIT_HF2,
            hf5_floor(mainnet),
        )?,
        Era::Hf3 | Era::Hf4 => step(
            time,
            parent,
            DIFFICULTY_BOUND_DIVISOR,
            DURATION_LIMIT_HF2,
            MINIMUM_DIFFICULTY_HF3,
        )?,
        Era::Hf2 => step(
            time,
            parent,
            DIFFICULTY_BOUND_DIVISOR,
            DURATION_LIMIT_HF2,
            MINIMUM_DIFFICULTY_HF1,
        )?,
        Era::Hf1 => {
            let diff = step(
                time,
                parent,
                DIFFICULTY_BOUND_DIVISOR,
                DURATION_LIMIT,
                MINIMUM_DIFFICULTY_HF1,
            )?;
            // No clamp after the bomb term in this era.
            with_bomb(diff, next)?
        }
        Era::Hf0 => {
            let diff = step(
                time,
                parent,
                DIFFICULTY_BOUND_DIVISOR,
                DURATION_LIMIT,
                MINIMUM_DIFFICULTY_GENESIS,
            )?;
            with_bomb(diff, next)?.max(MINIMUM_DIFFICULTY_GENESIS)
        }
    };

    debug!(
        number = next,
        %era,
        parent_diff = %parent.difficulty,
        diff = %diff,
        "Calculated difficulty"
    );
    Ok(diff)
}

/// Floor and reset value of eras 5 to 7.
pub fn hf5_floor(mainnet: bool) -> U256 {
    if mainnet {
        MINIMUM_DIFFICULTY_HF5
    } else {
        MINIMUM_DIFFICULTY_HF5_TESTNET
    }
}

/// Floor and reset value of eras 8 and 9.
pub fn hf8_floor(mainnet: bool) -> U256 {
    if mainnet {
        MINIMUM_DIFFICULTY_HF8
    } else {
        MINIMUM_DIFFICULTY_HF8_TESTNET
    }
}

fn step(
    time: u64,
    parent: &Header,
    divisor: u64,
    duration_limit: u64,
    floor: U256,
) -> Result<U256, ConsensusError> {
    let adjust = parent.difficulty / divisor;
    let elapsed = time.saturating_sub(parent.time);
    let diff = if elapsed < duration_limit {
        parent
            .difficulty
            .checked_add(adjust)
            .ok_or(ConsensusError::DifficultyOverflow)?
    } else {
        parent.difficulty.saturating_sub(adjust)
    };
    Ok(diff.max(floor))
}

fn grandparent_step(
    parent: &Header,
    grandparent: Option<&Header>,
    floor: U256,
) -> Result<U256, ConsensusError> {
    let grandparent = grandparent.ok_or(ConsensusError::UnknownAncestor {
        hash: parent.parent_hash,
        number: parent.number.saturating_sub(1),
    })?;
    let divisor = if grandparent.difficulty >= U256::from(GRANDPARENT_DIFFICULTY_THRESHOLD) {
        DIFFICULTY_BOUND_DIVISOR_HF5
    } else {
        DIFFICULTY_BOUND_DIVISOR
    };
    let adjust = grandparent.difficulty / divisor;
    let elapsed = parent.time.saturating_sub(grandparent.time);
    let diff = if elapsed < DURATION_LIMIT_HF2 {
        grandparent
            .difficulty
            .checked_add(adjust)
            .ok_or(ConsensusError::DifficultyOverflow)?
    } else {
        grandparent.difficulty.saturating_sub(adjust)
    };
    Ok(diff.max(floor))
}

/// Add `2^(period - 2)` once `next / EXP_DIFF_PERIOD` exceeds one.
fn with_bomb(diff: U256, next: u64) -> Result<U256, ConsensusError> {
    let period = next / EXP_DIFF_PERIOD;
    if period <= 1 {
        return Ok(diff);
    }
    let exp = period - 2;
    if exp >= 256 {
        return Err(ConsensusError::DifficultyOverflow);
    }
    diff.checked_add(U256::one() << exp as usize)
        .ok_or(ConsensusError::DifficultyOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqua_core::fork::ForkSchedule;
    use proptest::prelude::*;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn config(chain_id: u64, forks: &[(usize, i64)]) -> ChainConfig {
        ChainConfig {
            chain_id,
            hf: ForkSchedule::new(forks.iter().copied()),
        }
    }

    fn vector_config() -> ChainConfig {
        config(1, &[(0, 0), (1, 1), (2, 2)])
    }

    fn parent(number: u64, difficulty: u64, time: u64) -> Header {
        Header {
            number,
            difficulty: U256::from(difficulty),
            time,
            ..Header::default()
        }
    }

    fn diff(cfg: &ChainConfig, number: u64, parent_diff: u64, delta: u64) -> U256 {
        let p = parent(number, parent_diff, 1_000);
        calc_difficulty(cfg, 1_000 + delta, &p, None).unwrap()
    }

    // ------------------------------------------------------------------
    // Historical vectors
    // ------------------------------------------------------------------

    #[test]
    fn era0_clamps_to_genesis_floor() {
        let cfg = config(1, &[(1, 10), (2, 20)]);
        assert_eq!(diff(&cfg, 4, 99_999_999, 79), U256::from(99_999_999u64));
    }

    #[test]
    fn era0_fast_block_increases() {
        let cfg = config(1, &[(1, 10), (2, 20)]);
        assert_eq!(diff(&cfg, 4, 99_999_999, 5), U256::from(99_999_999u64 + 48_828));
    }

    #[test]
    fn era1_clamps_to_hf1_floor() {
        assert_eq!(diff(&vector_config(), 0, 100_001_792, 79), U256::from(100_001_792u64));
    }

    #[test]
    fn era2_vectors() {
        let cfg = vector_config();
        assert_eq!(diff(&cfg, 1, 100_001_792, 79), U256::from(100_050_621u64));
        for delta in [99, 22, 49, 199, 234, 235, 236, 237] {
            assert_eq!(diff(&cfg, 2, 100_050_621, delta), U256::from(100_099_473u64), "delta {delta}");
        }
        for delta in [244, 254, 319, 399] {
            assert_eq!(diff(&cfg, 2, 100_050_621, delta), U256::from(100_001_792u64), "delta {delta}");
        }
        for delta in [339, 340, 400, 499] {
            assert_eq!(diff(&cfg, 2, 1_000_506_210, delta), U256::from(1_000_017_682u64), "delta {delta}");
        }
    }

    #[test]
    fn era2_boundary_is_exclusive() {
        let cfg = vector_config();
        assert_eq!(diff(&cfg, 2, 100_050_621, 239), U256::from(100_099_473u64));
        assert_eq!(diff(&cfg, 2, 100_050_621, 240), U256::from(100_001_792u64));
    }

    #[test]
    fn era3_uses_gpu_floor() {
        let cfg = config(1, &[(2, 0), (3, 0)]);
        assert_eq!(diff(&cfg, 10, 100_001_792, 300), MINIMUM_DIFFICULTY_HF3);
    }

    // ------------------------------------------------------------------
    // Exponential term
    // ------------------------------------------------------------------

    #[test]
    fn era0_bomb_adds_power_of_two() {
        let cfg = config(1, &[]);
        // next = 300_000 => period 3 => +2
        assert_eq!(diff(&cfg, 299_999, 99_999_999, 79), U256::from(99_999_999u64 + 2));
    }

    #[test]
    fn era1_bomb_is_added_after_clamp() {
        let cfg = config(1, &[(1, 0)]);
        // next = 400_000 => period 4 => +4
        assert_eq!(diff(&cfg, 399_999, 100_001_792, 79), U256::from(100_001_792u64 + 4));
    }

    #[test]
    fn bomb_past_256_bits_overflows() {
        let cfg = config(1, &[]);
        let p = parent(26_000_000, 99_999_999, 0);
        assert_eq!(calc_difficulty(&cfg, 100, &p, None), Err(ConsensusError::DifficultyOverflow));
    }

    // ------------------------------------------------------------------
    // Activation resets
    // ------------------------------------------------------------------

    #[test]
    fn hf5_activation_resets() {
        let main = ChainConfig::mainnet();
        assert_eq!(diff(&main, 22_799, 9_999_999_999, 10), MINIMUM_DIFFICULTY_HF5);
        let test = ChainConfig::test();
        assert_eq!(diff(&test, 0, 9_999_999_999, 10), MINIMUM_DIFFICULTY_HF5_TESTNET);
    }

    #[test]
    fn hf5_formula_resumes_next_block() {
        let main = ChainConfig::mainnet();
        let p = 46_039_386u64;
        assert_eq!(diff(&main, 22_800, p, 10), U256::from(p + p / 512));
        assert_eq!(diff(&main, 22_800, p, 500), MINIMUM_DIFFICULTY_HF5);
    }

    #[test]
    fn hf8_activation_resets() {
        let cfg = config(1, &[(5, 0), (8, 100)]);
        assert_eq!(diff(&cfg, 99, 123_456_789, 10), MINIMUM_DIFFICULTY_HF8_TESTNET);
        assert_eq!(diff(&cfg, 100, 4_100, 500), MINIMUM_DIFFICULTY_HF8_TESTNET);
        assert_eq!(diff(&cfg, 100, 1_024_000, 10), U256::from(1_024_000u64 + 2000));
    }

    #[test]
    fn hf9_activation_jumps_on_mainnet_only() {
        let mut main = ChainConfig::mainnet();
        main.hf.set(9, 500_000);
        assert_eq!(diff(&main, 499_999, 1_000_001, 10), U256::from(1_000_001u64 - 500_000));
        let cfg = config(1, &[(5, 0), (9, 50)]);
        assert_eq!(diff(&cfg, 49, 1_000_001, 10), MINIMUM_DIFFICULTY_HF8_TESTNET);
    }

    // ------------------------------------------------------------------
    // Grandparent rule
    // ------------------------------------------------------------------

    #[test]
    fn hf9_uses_grandparent_window() {
        let cfg = config(1, &[(9, 0)]);
        let gp = parent(8, 1_024_000, 1_000);
        let mut p = parent(9, 1, 1_100);
        // Parent difficulty and the candidate time are ignored.
        assert_eq!(calc_difficulty(&cfg, 99_999, &p, Some(&gp)).unwrap(), U256::from(1_026_000u64));
        p.time = 1_300;
        assert_eq!(calc_difficulty(&cfg, 0, &p, Some(&gp)).unwrap(), U256::from(1_022_000u64));
    }

    #[test]
    fn hf9_small_grandparent_uses_coarse_divisor() {
        let cfg = config(1, &[(9, 0)]);
        let gp = parent(8, 8_192, 1_000);
        let p = parent(9, 1, 1_010);
        assert_eq!(calc_difficulty(&cfg, 0, &p, Some(&gp)).unwrap(), U256::from(8_196u64));
    }

    #[test]
    fn hf9_missing_grandparent_is_retryable() {
        let cfg = config(1, &[(9, 0)]);
        let err = calc_difficulty(&cfg, 0, &parent(9, 1, 0), None).unwrap_err();
        assert!(err.is_retryable());
    }

    // ------------------------------------------------------------------
    // Property tests
    // ------------------------------------------------------------------

    proptest! {
        #[test]
        fn activation_ignores_parent(d in 1u64..u64::MAX, delta in 0u64..10_000) {
            let cfg = ChainConfig::mainnet();
            prop_assert_eq!(diff(&cfg, 22_799, d, delta), MINIMUM_DIFFICULTY_HF5);
        }

        #[test]
        fn never_below_era_floor(d in 1u64..u64::MAX, delta in 0u64..10_000, number in 7_200u64..100_000) {
            let cfg = ChainConfig::mainnet();
            let floor = match cfg.active_era(number + 1) {
                Era::Hf2 => MINIMUM_DIFFICULTY_HF1,
                Era::Hf3 | Era::Hf4 => MINIMUM_DIFFICULTY_HF3,
                _ => MINIMUM_DIFFICULTY_HF5,
            };
            prop_assert!(diff(&cfg, number, d, delta) >= floor);
        }
    }
}
