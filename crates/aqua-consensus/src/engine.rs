//! The Aquahash engine implementing [`Engine`].
//!
//! Wires the difficulty rules, header and uncle validators, proof-of-work
//! codec, sealer, and finalizer together behind the host-facing trait, and
//! applies the configured [`PowMode`]:
//!
//! - `Normal` and `Test` verify and mine for real (`Test` with tiny caches).
//! - `Fake` accepts every seal except the configured failing block number.
//! - `FullFake` additionally accepts every header and uncle set.
//! - Shared engines reuse another engine's caches, datasets, and sealer.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use aqua_core::error::ConsensusError;
use aqua_core::traits::{AbortSignal, ChainReader, Engine, StateDb};
use aqua_core::types::{Address, Block, Header, Receipt, Transaction};
use primitive_types::{H256, U256};
use tracing::{debug, info, warn};

use crate::config::{AquahashConfig, PowMode};
use crate::pow::{FakeSeal, PowCodec, SealVerifier};
use crate::sealer::{RemoteHashrates, Sealer};
use crate::verifier::HeaderValidator;
use crate::{difficulty, reward, uncles};

/// Proof-of-work consensus engine.
pub struct Aquahash {
    config: AquahashConfig,
    codec: Arc<PowCodec>,
    seal_verifier: Arc<dyn SealVerifier>,
    validator: HeaderValidator,
    sealer: Sealer,
    hashrates: Arc<RemoteHashrates>,
    shared: Option<Arc<Aquahash>>,
}

impl fmt::Debug for Aquahash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aquahash")
            .field("pow_mode", &self.config.pow_mode)
            .field("threads", &self.sealer.threads())
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

impl Aquahash {
    /// Create an engine from `config`.
    ///
    /// `PowMode::Shared` needs an engine to share with; use
    /// [`Aquahash::new_shared`]. Without one it behaves like `Normal`.
    pub fn new(config: AquahashConfig) -> Self {
        if let Some(dir) = config.cache_spill_dir() {
            info!(dir = %dir.display(), count = config.caches_on_disk, "Disk storage enabled for caches");
        }
        if let Some(dir) = config.dataset_spill_dir() {
            info!(dir = %dir.display(), count = config.datasets_on_disk, "Disk storage enabled for datasets");
        }
        if config.pow_mode == PowMode::Shared {
            warn!("Shared proof-of-work mode without a shared engine, verifying locally");
        }

        let codec = Arc::new(PowCodec::new(&config));
        let seal_verifier: Arc<dyn SealVerifier> = match config.pow_mode {
            PowMode::Fake | PowMode::FullFake => Arc::new(FakeSeal {
                fail: config.fake_fail,
                delay: config.fake_delay(),
            }),
            PowMode::Normal | PowMode::Shared | PowMode::Test => codec.clone(),
        };
        Self {
            validator: HeaderValidator::new(Arc::clone(&seal_verifier)),
            sealer: Sealer::new(config.threads),
            hashrates: Arc::new(RemoteHashrates::new()),
            codec,
            seal_verifier,
            shared: None,
            config,
        }
    }

    /// Create an engine delegating seal verification and sealing to `shared`.
    ///
    /// Both engines use the same cache and dataset stores.
    pub fn new_shared(shared: Arc<Aquahash>) -> Self {
        let config = AquahashConfig::in_memory(PowMode::Shared);
        let seal_verifier = Arc::clone(&shared.seal_verifier);
        Self {
            validator: HeaderValidator::new(Arc::clone(&seal_verifier)),
            sealer: Sealer::new(config.threads),
            hashrates: Arc::clone(&shared.hashrates),
            codec: Arc::clone(&shared.codec),
            seal_verifier,
            shared: Some(shared),
            config,
        }
    }

    /// Full engine with tiny caches and datasets, for tests.
    #[cfg(any(test, feature = "testing"))]
    pub fn new_tester() -> Self {
        Self::new(AquahashConfig::in_memory(PowMode::Test))
    }

    /// Engine accepting every seal.
    #[cfg(any(test, feature = "testing"))]
    pub fn new_faker() -> Self {
        Self::new(AquahashConfig::in_memory(PowMode::Fake))
    }

    /// Engine accepting every seal except that of block `fail`.
    #[cfg(any(test, feature = "testing"))]
    pub fn new_fake_failer(fail: u64) -> Self {
        Self::new(AquahashConfig {
            fake_fail: Some(fail),
            ..AquahashConfig::in_memory(PowMode::Fake)
        })
    }

    /// Engine accepting every seal after sleeping `delay`.
    #[cfg(any(test, feature = "testing"))]
    pub fn new_fake_delayer(delay: std::time::Duration) -> Self {
        Self::new(AquahashConfig {
            fake_delay_ms: delay.as_millis() as u64,
            ..AquahashConfig::in_memory(PowMode::Fake)
        })
    }

    /// Engine accepting every header, uncle set, and seal.
    #[cfg(any(test, feature = "testing"))]
    pub fn new_full_faker() -> Self {
        Self::new(AquahashConfig::in_memory(PowMode::FullFake))
    }

    /// Replace the clock used by the future-block check.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.validator = self.validator.with_clock(clock);
        self
    }

    pub fn config(&self) -> &AquahashConfig {
        &self.config
    }

    pub fn pow_mode(&self) -> PowMode {
        self.config.pow_mode
    }

    /// Cache and dataset backed proof-of-work codec.
    pub fn codec(&self) -> &Arc<PowCodec> {
        &self.codec
    }

    /// Mining threads: zero uses every core, negative disables local mining.
    pub fn threads(&self) -> i32 {
        match &self.shared {
            Some(shared) => shared.threads(),
            None => self.sealer.threads(),
        }
    }

    /// Change the mining thread count, restarting a running search.
    pub fn set_threads(&self, threads: i32) {
        match &self.shared {
            Some(shared) => shared.set_threads(threads),
            None => self.sealer.set_threads(threads),
        }
    }

    /// Local hashes per second plus the rates remote miners reported.
    pub fn hashrate(&self) -> f64 {
        let local = match &self.shared {
            Some(shared) => shared.sealer.meter().rate(),
            None => self.sealer.meter().rate(),
        };
        local + self.hashrates.total(std::time::Instant::now()) as f64
    }

    /// Rates reported by remote miners.
    pub fn remote_hashrates(&self) -> &Arc<RemoteHashrates> {
        &self.hashrates
    }

    /// Record an advisory remote hash rate.
    pub fn submit_hashrate(&self, id: H256, rate: u64) {
        self.hashrates.submit(id, rate);
    }

    fn is_full_fake(&self) -> bool {
        self.config.pow_mode == PowMode::FullFake
    }

    fn is_fake(&self) -> bool {
        matches!(self.config.pow_mode, PowMode::Fake | PowMode::FullFake)
    }
}

impl Engine for Aquahash {
    fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        if self.is_full_fake() {
            return Ok(());
        }
        self.validator.verify_header(chain, header, seal)
    }

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> (AbortSignal, Receiver<Result<(), ConsensusError>>) {
        if self.is_full_fake() {
            let (tx, rx) = mpsc::channel();
            for _ in &headers {
                let _ = tx.send(Ok(()));
            }
            return (AbortSignal::new(), rx);
        }
        self.validator.verify_headers(chain, headers, seals)
    }

    fn verify_uncles(&self, chain: &dyn ChainReader, block: &Block) -> Result<(), ConsensusError> {
        if self.is_full_fake() {
            return Ok(());
        }
        uncles::verify_uncles(&self.validator, chain, block)
    }

    fn verify_seal(&self, _chain: &dyn ChainReader, header: &Header) -> Result<(), ConsensusError> {
        self.seal_verifier.verify_seal(header)
    }

    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), ConsensusError> {
        let number = header.number;
        let parent = chain
            .get_header(&header.parent_hash, number.wrapping_sub(1))
            .ok_or(ConsensusError::UnknownAncestor {
                hash: header.parent_hash,
                number: number.wrapping_sub(1),
            })?;
        let grandparent = chain.get_header(&parent.parent_hash, number.wrapping_sub(2));
        if grandparent.is_none() && number > 2 {
            return Err(ConsensusError::UnknownAncestor {
                hash: parent.parent_hash,
                number: number.wrapping_sub(2),
            });
        }
        if header.version.is_none() {
            header.version = Some(chain.config().header_version(number));
        }
        header.difficulty =
            difficulty::calc_difficulty(chain.config(), header.time, &parent, grandparent.as_ref())?;
        Ok(())
    }

    fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        state: &mut dyn StateDb,
        txs: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: Vec<Receipt>,
    ) -> Result<Block, ConsensusError> {
        Ok(reward::finalize(chain.config(), header, state, txs, uncles, receipts))
    }

    fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        time: u64,
        parent: &Header,
        grandparent: Option<&Header>,
    ) -> Result<U256, ConsensusError> {
        difficulty::calc_difficulty(chain.config(), time, parent, grandparent)
    }

    fn seal(
        &self,
        chain: &dyn ChainReader,
        block: Block,
        stop: &AbortSignal,
    ) -> Result<Option<Block>, ConsensusError> {
        let version = chain.config().header_version(block.number());
        if self.is_fake() {
            let header = Header {
                nonce: 0,
                mix_digest: H256::zero(),
                version: Some(version),
                ..block.header.clone()
            };
            return Ok(Some(block.with_seal(header)));
        }
        if let Some(shared) = &self.shared {
            debug!(number = block.number(), %version, "Delegating work");
            return shared.seal(chain, block, stop);
        }
        self.sealer.seal(&self.codec, version, block, stop)
    }
}
