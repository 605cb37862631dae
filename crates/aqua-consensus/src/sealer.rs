//! Local proof-of-work search and hash-rate accounting.
//!
//! [`Sealer::seal`] spawns one worker per configured thread, each scanning
//! nonces upward from its own random starting point. The first worker to
//! find a nonce under the target reports it and every other worker is
//! aborted. Changing the thread count while a search runs aborts it and
//! starts over with the new count.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use aqua_core::error::ConsensusError;
use aqua_core::fork::HeaderVersion;
use aqua_core::traits::AbortSignal;
use aqua_core::types::{Block, Header};
use dashmap::DashMap;
use parking_lot::Mutex;
use primitive_types::{H256, U256};
use tracing::{debug, info, trace, warn};

use crate::pow::{Miner, PowCodec, meets_target, target};

/// Attempts between hash-rate updates of a mining worker.
const MARK_INTERVAL: u64 = 1 << 15;

/// How often the sealer checks for stop requests and thread changes.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// EWMA tick length.
const TICK: Duration = Duration::from_secs(5);

/// Remote hash rates older than this are ignored.
pub const REMOTE_RATE_EXPIRY: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// Hash-rate meter
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct Ewma {
    uncounted: u64,
    rate: f64,
    initialized: bool,
    last_tick: Instant,
}

impl Ewma {
    /// One-minute moving average ticked every five seconds.
    fn alpha() -> f64 {
        1.0 - (-TICK.as_secs_f64() / 60.0).exp()
    }

    fn tick_to(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let ticks = (elapsed.as_secs_f64() / TICK.as_secs_f64()).floor() as u64;
        if ticks == 0 {
            return;
        }
        let alpha = Self::alpha();
        let instant = self.uncounted as f64 / TICK.as_secs_f64();
        self.uncounted = 0;
        if self.initialized {
            self.rate += alpha * (instant - self.rate);
        } else {
            self.rate = instant;
            self.initialized = true;
        }
        // Later ticks saw nothing and only decay the rate.
        self.rate *= (1.0 - alpha).powi((ticks - 1).min(i32::MAX as u64) as i32);
        self.last_tick += TICK * ticks.min(u32::MAX as u64) as u32;
    }
}

/// Hashes per second as a one-minute exponentially weighted moving average.
#[derive(Debug)]
pub struct HashrateMeter {
    total: AtomicU64,
    ewma: Mutex<Ewma>,
}

impl Default for HashrateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl HashrateMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(start: Instant) -> Self {
        Self {
            total: AtomicU64::new(0),
            ewma: Mutex::new(Ewma {
                uncounted: 0,
                rate: 0.0,
                initialized: false,
                last_tick: start,
            }),
        }
    }

    /// Record `n` hashes.
    pub fn mark(&self, n: u64) {
        self.mark_at(n, Instant::now());
    }

    fn mark_at(&self, n: u64, now: Instant) {
        self.total.fetch_add(n, Ordering::Relaxed);
        let mut ewma = self.ewma.lock();
        ewma.tick_to(now);
        ewma.uncounted += n;
    }

    /// Current rate in hashes per second.
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    fn rate_at(&self, now: Instant) -> f64 {
        let mut ewma = self.ewma.lock();
        ewma.tick_to(now);
        ewma.rate
    }

    /// Hashes recorded since creation.
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Advisory hash rates reported by remote miners, keyed by miner id.
#[derive(Debug, Default)]
pub struct RemoteHashrates {
    rates: DashMap<H256, (u64, Instant)>,
}

impl RemoteHashrates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest `rate` of miner `id`.
    pub fn submit(&self, id: H256, rate: u64) {
        self.submit_at(id, rate, Instant::now());
    }

    pub fn submit_at(&self, id: H256, rate: u64, now: Instant) {
        self.rates.insert(id, (rate, now));
    }

    /// Sum of the rates reported within the expiry window.
    pub fn total(&self, now: Instant) -> u64 {
        self.rates
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.value().1) < REMOTE_RATE_EXPIRY)
            .map(|entry| entry.value().0)
            .fold(0u64, u64::saturating_add)
    }

    /// Drop expired entries.
    pub fn prune(&self, now: Instant) {
        self.rates
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < REMOTE_RATE_EXPIRY);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Sealer
// ----------------------------------------------------------------------------

enum Outcome {
    Found(Block),
    Stopped,
    Restart,
    WorkersGone,
}

/// Multi-threaded nonce search with a live-adjustable thread count.
#[derive(Debug)]
pub struct Sealer {
    threads: AtomicI32,
    generation: AtomicU64,
    meter: Arc<HashrateMeter>,
}

impl Sealer {
    /// `threads`: zero uses every core, negative disables local search.
    pub fn new(threads: i32) -> Self {
        Self {
            threads: AtomicI32::new(threads),
            generation: AtomicU64::new(0),
            meter: Arc::new(HashrateMeter::new()),
        }
    }

    pub fn threads(&self) -> i32 {
        self.threads.load(Ordering::Acquire)
    }

    /// Change the thread count; a running search restarts with it.
    pub fn set_threads(&self, threads: i32) {
        self.threads.store(threads, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn meter(&self) -> &Arc<HashrateMeter> {
        &self.meter
    }

    fn worker_count(&self) -> usize {
        match self.threads() {
            0 => num_cpus::get(),
            n if n < 0 => 0,
            n => n as usize,
        }
    }

    /// Search for a seal of `block` with `version`.
    ///
    /// Returns `None` once `stop` is aborted.
    pub fn seal(
        &self,
        codec: &PowCodec,
        version: HeaderVersion,
        block: Block,
        stop: &AbortSignal,
    ) -> Result<Option<Block>, ConsensusError> {
        let Some(target) = target(block.header.difficulty) else {
            return Err(ConsensusError::DifficultyZero);
        };
        let miner = codec.miner(version, block.number())?;
        let mut header = block.header.clone();
        header.version = Some(version);
        let block = Arc::new(block);

        loop {
            let generation = self.generation.load(Ordering::Acquire);
            let threads = self.worker_count();
            let abort = AbortSignal::new();
            let (found_tx, found_rx) = mpsc::channel();

            let handles: Vec<_> = (0..threads)
                .map(|id| {
                    let job = Job {
                        id,
                        miner: miner.clone(),
                        header: header.clone(),
                        block: Arc::clone(&block),
                        target,
                        seed: rand::random::<u64>(),
                        abort: abort.clone(),
                        found: found_tx.clone(),
                        meter: Arc::clone(&self.meter),
                    };
                    thread::spawn(move || job.run())
                })
                .collect();
            drop(found_tx);
            debug!(number = block.number(), threads, %version, "Started sealing");

            let outcome = loop {
                if stop.is_aborted() {
                    break Outcome::Stopped;
                }
                if self.generation.load(Ordering::Acquire) != generation {
                    break Outcome::Restart;
                }
                match found_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(sealed) => break Outcome::Found(sealed),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) if threads > 0 => break Outcome::WorkersGone,
                    // No workers: local mining is disabled, wait for a stop or a thread change.
                    Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
                }
            };

            abort.abort();
            let panicked = join_workers(handles);
            match outcome {
                Outcome::Found(sealed) => {
                    info!(number = sealed.number(), nonce = sealed.header.nonce, "Successfully sealed new block");
                    return Ok(Some(sealed));
                }
                _ if panicked > 0 => {
                    return Err(ConsensusError::Sealing(format!("{panicked} of {threads} workers panicked")));
                }
                Outcome::Stopped | Outcome::WorkersGone => return Ok(None),
                Outcome::Restart => debug!(threads = self.threads(), "Thread count changed, restarting search"),
            }
        }
    }
}

/// Wait for every worker, logging panics. Returns how many panicked.
fn join_workers(handles: Vec<thread::JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for handle in handles {
        if let Err(payload) = handle.join() {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(%reason, "Mining worker panicked");
            panicked += 1;
        }
    }
    panicked
}

/// One worker's share of a search.
struct Job {
    id: usize,
    miner: Miner,
    header: Header,
    block: Arc<Block>,
    target: U256,
    seed: u64,
    abort: AbortSignal,
    found: Sender<Block>,
    meter: Arc<HashrateMeter>,
}

impl Job {
    fn run(self) {
        let hash = self.header.hash_no_nonce();
        let mut nonce = self.seed;
        let mut attempts = 0u64;
        trace!(miner = self.id, seed = self.seed, "Started search for new nonces");

        loop {
            if self.abort.is_aborted() {
                trace!(miner = self.id, attempts = nonce.wrapping_sub(self.seed), "Nonce search aborted");
                self.meter.mark(attempts);
                return;
            }
            attempts += 1;
            if attempts == MARK_INTERVAL {
                self.meter.mark(attempts);
                attempts = 0;
            }

            let (mix_digest, result) = self.miner.compute(&hash, nonce);
            if meets_target(&result, &self.target) {
                let header = Header {
                    nonce,
                    mix_digest,
                    ..self.header.clone()
                };
                if self.found.send(self.block.with_seal(header)).is_ok() {
                    trace!(miner = self.id, attempts = nonce.wrapping_sub(self.seed), nonce, "Nonce found and reported");
                } else {
                    trace!(miner = self.id, nonce, "Nonce found but discarded");
                }
                return;
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}
