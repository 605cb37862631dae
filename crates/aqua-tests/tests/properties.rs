//! Property tests over whole chains built with the faker engine.

use std::sync::Arc;

use aqua_consensus::Aquahash;
use aqua_consensus::difficulty::hf5_floor;
use aqua_consensus::pow::target;
use aqua_consensus::remote::remote_target;
use aqua_consensus::testing::{MemoryChain, MemoryState, child_header, genesis_block};
use aqua_core::fork::ChainConfig;
use aqua_core::traits::{ChainReader, Engine};
use aqua_tests::helpers::*;
use primitive_types::U256;
use proptest::prelude::*;

/// Build a faker chain whose block `i` comes `delays[i]` seconds after its parent.
fn chain_with_delays(engine: &Aquahash, delays: &[u64]) -> Arc<MemoryChain> {
    let chain = test_chain();
    for (i, delay) in delays.iter().enumerate() {
        let head = chain.head();
        let grandparent = chain.get_header(&head.parent_hash, head.number.wrapping_sub(1));
        let header = child_header(chain.config(), &head, grandparent.as_ref(), *delay).unwrap();
        let header = aqua_core::types::Header {
            coinbase: miner(i as u8),
            ..header
        };
        let mut state = MemoryState::default();
        let block = engine
            .finalize(chain.as_ref(), header, &mut state, Vec::new(), Vec::new(), Vec::new())
            .unwrap();
        let sealed = engine
            .seal(chain.as_ref(), block, &aqua_core::traits::AbortSignal::new())
            .unwrap()
            .unwrap();
        chain.insert_canonical(sealed);
    }
    chain
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_honest_chain_verifies(delays in prop::collection::vec(1u64..600, 1..24)) {
        let engine = Aquahash::new_faker().with_clock(|| NOW);
        let chain = chain_with_delays(&engine, &delays);
        let blocks: Vec<_> = (1..=delays.len() as u64)
            .map(|n| chain.get_header_by_number(n).unwrap())
            .collect();

        let config = ChainConfig::test();
        let importer: Arc<dyn ChainReader> = Arc::new(MemoryChain::new(
            config.clone(),
            genesis_block(&config, U256::from(GENESIS_DIFFICULTY)),
        ));
        let (_abort, results) = engine.verify_headers(importer, blocks.clone(), Vec::new());
        prop_assert_eq!(results.iter().filter(|r| r.is_ok()).count(), blocks.len());

        for header in &blocks {
            prop_assert!(header.difficulty >= hf5_floor(false));
        }
    }

    #[test]
    fn slow_blocks_never_raise_difficulty(delays in prop::collection::vec(240u64..10_000, 2..16)) {
        let engine = Aquahash::new_faker().with_clock(|| NOW);
        let chain = chain_with_delays(&engine, &delays);
        for n in 2..=delays.len() as u64 {
            let parent = chain.get_header_by_number(n - 1).unwrap();
            let header = chain.get_header_by_number(n).unwrap();
            prop_assert!(header.difficulty <= parent.difficulty);
        }
    }

    #[test]
    fn served_target_never_exceeds_exact_target(d in 2u64..u64::MAX) {
        let d = U256::from(d);
        let served = remote_target(d).unwrap();
        let exact = target(d).unwrap();
        prop_assert!(served <= exact);
        prop_assert!(exact - served <= U256::one());
    }
}
