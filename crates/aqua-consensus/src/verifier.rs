//! Header validation, single and batched.
//!
//! A header is checked in a fixed order and the first failure wins:
//!
//! 1. extra-data length
//! 2. timestamp not too far in the future (blocks only)
//! 3. timestamp strictly after the parent's
//! 4. difficulty equals [`calc_difficulty`]
//! 5. gas limit cap and gas used
//! 6. gas limit within the parent's bound
//! 7. number is the parent's plus one
//! 8. version matches the height
//! 9. proof-of-work seal (when requested)
//!
//! Headers already stored in the chain are accepted without any checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use aqua_core::constants::{
    ALLOWED_FUTURE_BLOCK_TIME, GAS_LIMIT_BOUND_DIVISOR, MAX_GAS_LIMIT, MAXIMUM_EXTRA_DATA_SIZE,
    MIN_GAS_LIMIT,
};
use aqua_core::error::ConsensusError;
use aqua_core::fork::ChainConfig;
use aqua_core::traits::{AbortSignal, ChainReader};
use aqua_core::types::Header;
use primitive_types::H256;
use tracing::{debug, trace};

use crate::difficulty::calc_difficulty;
use crate::pow::SealVerifier;

/// Wall clock in Unix seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runs the per-header consensus checks.
#[derive(Clone)]
pub struct HeaderValidator {
    seal: Arc<dyn SealVerifier>,
    clock: Clock,
}

impl std::fmt::Debug for HeaderValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderValidator").finish_non_exhaustive()
    }
}

impl HeaderValidator {
    /// Validator using the system clock.
    pub fn new(seal: Arc<dyn SealVerifier>) -> Self {
        Self {
            seal,
            clock: Arc::new(system_clock),
        }
    }

    /// Replace the clock used for the future-block check.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn seal_verifier(&self) -> &Arc<dyn SealVerifier> {
        &self.seal
    }

    /// Check `header` against already-resolved ancestors.
    pub fn verify(
        &self,
        config: &ChainConfig,
        header: &Header,
        parent: &Header,
        grandparent: Option<&Header>,
        uncle: bool,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        if header.extra.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(ConsensusError::ExtraDataTooLong {
                len: header.extra.len(),
                max: MAXIMUM_EXTRA_DATA_SIZE,
            });
        }
        // Uncle timestamps are bounded by the u64 type alone.
        if !uncle {
            let limit = (self.clock)().saturating_add(ALLOWED_FUTURE_BLOCK_TIME);
            if header.time > limit {
                return Err(ConsensusError::FutureBlock {
                    time: header.time,
                    limit,
                });
            }
        }
        if header.time <= parent.time {
            return Err(ConsensusError::ZeroBlockTime);
        }

        let want = calc_difficulty(config, header.time, parent, grandparent)?;
        if want != header.difficulty {
            return Err(ConsensusError::InvalidDifficulty {
                have: header.difficulty,
                want,
            });
        }

        if header.gas_limit > MAX_GAS_LIMIT {
            return Err(ConsensusError::GasLimitTooHigh {
                have: header.gas_limit,
                max: MAX_GAS_LIMIT,
            });
        }
        if header.gas_used > header.gas_limit {
            return Err(ConsensusError::GasUsedExceedsLimit {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }
        let diff = parent.gas_limit.abs_diff(header.gas_limit);
        let bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
        if diff >= bound || header.gas_limit < MIN_GAS_LIMIT {
            return Err(ConsensusError::InvalidGasLimit {
                have: header.gas_limit,
                parent: parent.gas_limit,
                bound,
            });
        }

        let number = parent.number.wrapping_add(1);
        if header.number != number {
            return Err(ConsensusError::InvalidNumber {
                have: header.number,
                want: number,
            });
        }

        let want = config.header_version(header.number);
        match header.version {
            None => return Err(ConsensusError::MissingVersion(header.number)),
            Some(have) if have != want => return Err(ConsensusError::InvalidVersion { have, want }),
            Some(_) => {}
        }

        if seal {
            self.seal.verify_seal(header)?;
        }
        Ok(())
    }

    /// Verify one header, resolving its ancestors from `chain`.
    pub fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        self.verify_in_batch(chain, std::slice::from_ref(header), 0, seal)
    }

    /// Verify `headers[index]`, taking ancestors from the batch when they
    /// directly precede it and from `chain` otherwise.
    fn verify_in_batch(
        &self,
        chain: &dyn ChainReader,
        headers: &[Header],
        index: usize,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        let header = &headers[index];
        let number = header.number;
        if chain.get_header(&header.hash(), number).is_some() {
            trace!(number, "Header already known");
            return Ok(());
        }

        let parent_number = number.wrapping_sub(1);
        let parent = ancestor(chain, headers, index.checked_sub(1), &header.parent_hash, parent_number)
            .ok_or(ConsensusError::UnknownAncestor {
                hash: header.parent_hash,
                number: parent_number,
            })?;

        let gp_number = parent.number.wrapping_sub(1);
        let grandparent = ancestor(chain, headers, index.checked_sub(2), &parent.parent_hash, gp_number);
        if grandparent.is_none() && number > 3 {
            return Err(ConsensusError::UnknownAncestor {
                hash: parent.parent_hash,
                number: gp_number,
            });
        }

        self.verify(chain.config(), header, &parent, grandparent.as_ref(), false, seal)
            .inspect_err(|e| debug!(number, error = %e, "Header rejected"))
    }

    /// Verify `headers` on a pool of worker threads.
    ///
    /// Results are delivered in input order regardless of which worker
    /// finishes first. A missing entry in `seals` means the seal is checked.
    pub fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> (AbortSignal, Receiver<Result<(), ConsensusError>>) {
        let abort = AbortSignal::new();
        let (out_tx, out_rx) = mpsc::channel();
        let total = headers.len();
        if total == 0 {
            return (abort, out_rx);
        }

        let workers = num_cpus::get().clamp(1, total);
        let headers = Arc::new(headers);
        let seals = Arc::new(seals);
        let next = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..workers {
            let validator = self.clone();
            let chain = Arc::clone(&chain);
            let headers = Arc::clone(&headers);
            let seals = Arc::clone(&seals);
            let next = Arc::clone(&next);
            let abort = abort.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                while !abort.is_aborted() {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= headers.len() {
                        break;
                    }
                    let seal = seals.get(index).copied().unwrap_or(true);
                    let result = validator.verify_in_batch(chain.as_ref(), &headers, index, seal);
                    if done_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);

        let sequencer_abort = abort.clone();
        thread::spawn(move || {
            let mut pending: Vec<Option<Result<(), ConsensusError>>> = vec![None; total];
            let mut out = 0;
            for (index, result) in done_rx {
                if sequencer_abort.is_aborted() {
                    return;
                }
                pending[index] = Some(result);
                while let Some(result) = pending.get_mut(out).and_then(Option::take) {
                    if out_tx.send(result).is_err() {
                        return;
                    }
                    out += 1;
                }
                if out == total {
                    return;
                }
            }
        });

        (abort, out_rx)
    }
}

/// Header `(hash, number)`, preferring `headers[at]` when it matches.
fn ancestor(
    chain: &dyn ChainReader,
    headers: &[Header],
    at: Option<usize>,
    hash: &H256,
    number: u64,
) -> Option<Header> {
    if let Some(candidate) = at.and_then(|i| headers.get(i)) {
        if candidate.number == number && candidate.hash() == *hash {
            return Some(candidate.clone());
        }
    }
    chain.get_header(hash, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::FakeSeal;
    use crate::testing::{MemoryChain, child_header, extend};
    use aqua_core::fork::HeaderVersion;
    use parking_lot::Mutex;
    use primitive_types::U256;
    use std::collections::HashSet;
    use std::time::Duration;

    const NOW: u64 = 1_600_000_000;

    fn validator() -> HeaderValidator {
        HeaderValidator::new(Arc::new(FakeSeal::default())).with_clock(|| NOW)
    }

    fn chain() -> MemoryChain {
        MemoryChain::with_genesis(ChainConfig::test(), U256::from(4096u32))
    }

    fn next(chain: &MemoryChain) -> Header {
        extend(chain, 1, 60).unwrap().remove(0)
    }

    /// Fake seal that sleeps for chosen block numbers and records order.
    struct SlowSeal {
        slow: HashSet<u64>,
        finished: Mutex<Vec<u64>>,
    }

    impl SealVerifier for SlowSeal {
        fn verify_seal(&self, header: &Header) -> Result<(), ConsensusError> {
            if self.slow.contains(&header.number) {
                std::thread::sleep(Duration::from_millis(50));
            }
            self.finished.lock().push(header.number);
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Single header checks
    // ------------------------------------------------------------------

    #[test]
    fn valid_child_passes() {
        let chain = chain();
        let header = next(&chain);
        assert_eq!(validator().verify_header(&chain, &header, true), Ok(()));
    }

    #[test]
    fn extra_data_too_long() {
        let chain = chain();
        let mut header = next(&chain);
        header.extra = vec![0; MAXIMUM_EXTRA_DATA_SIZE + 1];
        assert_eq!(
            validator().verify_header(&chain, &header, false),
            Err(ConsensusError::ExtraDataTooLong { len: 33, max: 32 })
        );
    }

    #[test]
    fn future_block_rejected_but_not_for_uncles() {
        let chain = chain();
        let genesis = chain.head();
        let header = next(&chain);
        let v = HeaderValidator::new(Arc::new(FakeSeal::default())).with_clock(|| 0);
        assert_eq!(
            v.verify(chain.config(), &header, &genesis, None, false, false),
            Err(ConsensusError::FutureBlock { time: 60, limit: 15 })
        );
        assert_eq!(v.verify(chain.config(), &header, &genesis, None, true, false), Ok(()));
    }

    #[test]
    fn timestamp_must_advance() {
        let chain = chain();
        let mut header = next(&chain);
        header.time = 0;
        assert_eq!(
            validator().verify_header(&chain, &header, false),
            Err(ConsensusError::ZeroBlockTime)
        );
    }

    #[test]
    fn wrong_difficulty() {
        let chain = chain();
        let mut header = next(&chain);
        header.difficulty += U256::one();
        assert!(matches!(
            validator().verify_header(&chain, &header, false),
            Err(ConsensusError::InvalidDifficulty { .. })
        ));
    }

    #[test]
    fn gas_checks() {
        let chain = chain();
        let parent = chain.head();
        let base = next(&chain);
        let v = validator();
        let cfg = chain.config();

        let h = Header { gas_limit: MAX_GAS_LIMIT + 1, ..base.clone() };
        assert!(matches!(v.verify(cfg, &h, &parent, None, false, false), Err(ConsensusError::GasLimitTooHigh { .. })));

        let h = Header { gas_used: base.gas_limit + 1, ..base.clone() };
        assert!(matches!(v.verify(cfg, &h, &parent, None, false, false), Err(ConsensusError::GasUsedExceedsLimit { .. })));

        let bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
        let h = Header { gas_limit: parent.gas_limit + bound, ..base.clone() };
        assert_eq!(
            v.verify(cfg, &h, &parent, None, false, false),
            Err(ConsensusError::InvalidGasLimit { have: parent.gas_limit + bound, parent: parent.gas_limit, bound })
        );

        let h = Header { gas_limit: parent.gas_limit + bound - 1, ..base };
        assert_eq!(v.verify(cfg, &h, &parent, None, false, false), Ok(()));
    }

    #[test]
    fn gas_limit_below_minimum() {
        let config = ChainConfig::test();
        let parent = Header { gas_limit: MIN_GAS_LIMIT, version: Some(HeaderVersion::Keccak), ..Header::default() };
        let mut header = child_header(&config, &parent, None, 60).unwrap();
        header.gas_limit = MIN_GAS_LIMIT - 1;
        assert!(matches!(
            validator().verify(&config, &header, &parent, None, false, false),
            Err(ConsensusError::InvalidGasLimit { .. })
        ));
    }

    #[test]
    fn number_must_follow_parent() {
        let chain = chain();
        let parent = chain.head();
        let mut header = next(&chain);
        header.number = 2;
        assert_eq!(
            validator().verify(chain.config(), &header, &parent, None, false, false),
            Err(ConsensusError::InvalidNumber { have: 2, want: 1 })
        );
    }

    #[test]
    fn version_must_match_height() {
        let chain = chain();
        let parent = chain.head();
        let mut header = next(&chain);
        header.version = None;
        assert_eq!(
            validator().verify(chain.config(), &header, &parent, None, false, false),
            Err(ConsensusError::MissingVersion(1))
        );
        header.version = Some(HeaderVersion::Keccak);
        assert_eq!(
            validator().verify(chain.config(), &header, &parent, None, false, false),
            Err(ConsensusError::InvalidVersion { have: HeaderVersion::Keccak, want: HeaderVersion::Argon2idA })
        );
    }

    #[test]
    fn seal_failure_only_when_requested() {
        let chain = chain();
        let header = next(&chain);
        let v = HeaderValidator::new(Arc::new(FakeSeal { fail: Some(1), delay: Duration::ZERO })).with_clock(|| NOW);
        assert_eq!(v.verify_header(&chain, &header, true), Err(ConsensusError::InvalidPoW));
        assert_eq!(v.verify_header(&chain, &header, false), Ok(()));
    }

    // ------------------------------------------------------------------
    // Ancestry
    // ------------------------------------------------------------------

    #[test]
    fn unknown_parent_is_retryable() {
        let chain = chain();
        let mut header = next(&chain);
        header.parent_hash = H256::repeat_byte(9);
        let err = validator().verify_header(&chain, &header, false).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn known_header_short_circuits() {
        let chain = chain();
        let mut header = next(&chain);
        // Invalid on every count, but already stored.
        header.extra = vec![0; 64];
        header.difficulty = U256::zero();
        chain.insert_canonical(aqua_core::types::Block::new(header.clone(), vec![], vec![], vec![]));
        let stored = chain.head();
        assert_eq!(validator().verify_header(&chain, &stored, true), Ok(()));
    }

    #[test]
    fn missing_grandparent_tolerated_only_near_genesis() {
        let chain = chain();
        let headers = extend(&chain, 5, 60).unwrap();
        let v = validator();
        for header in &headers[..3] {
            chain.insert_canonical(aqua_core::types::Block::new(header.clone(), vec![], vec![], vec![]));
        }
        // Header 4 has its parent 3 and grandparent 2 in the chain.
        assert_eq!(v.verify_header(&chain, &headers[3], false), Ok(()));

        // A parent whose own parent is unknown.
        let orphan_chain = MemoryChain::with_genesis(ChainConfig::test(), U256::from(4096u32));
        orphan_chain.insert(aqua_core::types::Block::new(headers[3].clone(), vec![], vec![], vec![]));
        let err = v.verify_header(&orphan_chain, &headers[4], false).unwrap_err();
        assert!(matches!(err, ConsensusError::UnknownAncestor { number: 3, .. }));
    }

    // ------------------------------------------------------------------
    // Batch verification
    // ------------------------------------------------------------------

    #[test]
    fn batch_of_valid_headers_succeeds_in_order() {
        let chain: Arc<dyn ChainReader> = Arc::new(chain());
        let headers = {
            let c = MemoryChain::with_genesis(ChainConfig::test(), U256::from(4096u32));
            extend(&c, 16, 30).unwrap()
        };
        let (_abort, results) = validator().verify_headers(chain, headers, vec![true; 16]);
        let results: Vec<_> = results.iter().collect();
        assert_eq!(results.len(), 16);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn batch_delivers_in_input_order_despite_slow_workers() {
        let mem = chain();
        let headers = extend(&mem, 12, 30).unwrap();
        let slow = Arc::new(SlowSeal {
            slow: [1u64, 2, 5].into_iter().collect(),
            finished: Mutex::new(Vec::new()),
        });
        let v = HeaderValidator::new(slow.clone()).with_clock(|| NOW);

        // Break the last header so its error must appear exactly at the end.
        let mut headers = headers;
        headers[11].extra = vec![0; 40];
        let (_abort, rx) = v.verify_headers(Arc::new(mem), headers, vec![true; 12]);
        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results.len(), 12);
        // Every header but the broken one reached the seal check.
        let finished = slow.finished.lock().clone();
        assert_eq!(finished.len(), 11);
        for (i, r) in results.iter().enumerate() {
            if i == 11 {
                assert!(matches!(r, Err(ConsensusError::ExtraDataTooLong { .. })));
            } else {
                assert_eq!(*r, Ok(()), "header {}", i + 1);
            }
        }
    }

    #[test]
    fn batch_on_unknown_first_parent_reports_ancestry() {
        let headers = {
            let c = MemoryChain::with_genesis(ChainConfig::test(), U256::from(4096u32));
            let first = extend(&c, 3, 30).unwrap();
            first[1..].to_vec()
        };
        let chain: Arc<dyn ChainReader> = Arc::new(chain());
        let (_abort, rx) = validator().verify_headers(chain, headers, vec![]);
        let first = rx.recv().unwrap();
        assert!(matches!(first, Err(ConsensusError::UnknownAncestor { .. })));
    }

    #[test]
    fn empty_batch_closes_immediately() {
        let chain: Arc<dyn ChainReader> = Arc::new(chain());
        let (_abort, rx) = validator().verify_headers(chain, Vec::new(), Vec::new());
        assert!(rx.recv().is_err());
    }

    #[test]
    fn aborted_batch_stops_early() {
        let mem = chain();
        let headers = extend(&mem, 64, 30).unwrap();
        let v = HeaderValidator::new(Arc::new(FakeSeal { fail: None, delay: Duration::from_millis(20) }))
            .with_clock(|| NOW);
        let (abort, rx) = v.verify_headers(Arc::new(mem), headers, vec![true; 64]);
        abort.abort();
        let delivered = rx.iter().count();
        assert!(delivered < 64);
    }
}
