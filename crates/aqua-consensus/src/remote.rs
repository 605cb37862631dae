//! Work protocol for external miners.
//!
//! The [`RemoteAgent`] serves the current block as a `[hash, indicator,
//! target]` triple, accepts solutions for any work it served in the last
//! [`WORK_EXPIRY`], and forwards accepted blocks on its result channel.
//! Full blocks mined from a template can be submitted directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use aqua_core::fork::HeaderVersion;
use aqua_core::traits::{ChainReader, Engine};
use aqua_core::types::{Address, Block, Header};
use parking_lot::Mutex;
use primitive_types::{H256, U256};
use tracing::{debug, info, warn};

use crate::ethash;
use crate::sealer::RemoteHashrates;

/// Served work is forgotten after seven 12-second blocks.
pub const WORK_EXPIRY: Duration = Duration::from_secs(7 * 12);

/// Target served to remote miners: `((1 << 255) / difficulty) << 1`.
///
/// `None` for zero difficulty. Difficulty one wraps to zero.
pub fn remote_target(difficulty: U256) -> Option<U256> {
    if difficulty.is_zero() {
        return None;
    }
    Some(((U256::one() << 255) / difficulty) << 1)
}

/// Second element of the work triple: the epoch seed for hashimoto headers,
/// the version number for Argon2id ones.
pub fn algorithm_indicator(version: HeaderVersion, number: u64) -> H256 {
    match version {
        HeaderVersion::Keccak => ethash::seed_hash(number),
        v => H256::from_low_u64_be(u64::from(v.as_u8())),
    }
}

fn hex32(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

struct PendingWork {
    block: Block,
    served_at: Instant,
}

#[derive(Default)]
struct WorkState {
    current: Option<Block>,
    pending: HashMap<H256, PendingWork>,
}

/// Serves work to external miners and validates their solutions.
pub struct RemoteAgent {
    chain: Arc<dyn ChainReader>,
    engine: Arc<dyn Engine>,
    hashrates: Arc<RemoteHashrates>,
    state: Mutex<WorkState>,
    results: Sender<Block>,
}

impl fmt::Debug for RemoteAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RemoteAgent")
            .field("current", &state.current.as_ref().map(Block::number))
            .field("pending", &state.pending.len())
            .field("miners", &self.hashrates.len())
            .finish_non_exhaustive()
    }
}

impl RemoteAgent {
    /// Create an agent and the receiver of the blocks it accepts.
    pub fn new(
        chain: Arc<dyn ChainReader>,
        engine: Arc<dyn Engine>,
        hashrates: Arc<RemoteHashrates>,
    ) -> (Self, Receiver<Block>) {
        let (results, rx) = mpsc::channel();
        let agent = Self {
            chain,
            engine,
            hashrates,
            state: Mutex::new(WorkState::default()),
            results,
        };
        (agent, rx)
    }

    /// Install `block` as the work served from now on.
    pub fn set_work(&self, mut block: Block) {
        if block.header.version.is_none() {
            block.header.version = Some(self.chain.config().header_version(block.number()));
        }
        debug!(number = block.number(), "New remote work");
        self.state.lock().current = Some(block);
    }

    /// Current work as `[hash_no_nonce, indicator, target]` hex strings.
    ///
    /// `None` if no work is set or its difficulty is zero.
    pub fn get_work(&self) -> Option<[String; 3]> {
        let mut state = self.state.lock();
        let block = state.current.clone()?;
        let target = remote_target(block.header.difficulty)?;
        let version = block
            .header
            .version
            .unwrap_or_else(|| self.chain.config().header_version(block.number()));

        let hash = block.header.hash_no_nonce();
        let mut target_bytes = [0u8; 32];
        target.to_big_endian(&mut target_bytes);
        let work = [
            hex32(hash.as_bytes()),
            hex32(algorithm_indicator(version, block.number()).as_bytes()),
            hex32(&target_bytes),
        ];
        state.pending.insert(
            hash,
            PendingWork {
                block,
                served_at: Instant::now(),
            },
        );
        Some(work)
    }

    /// RLP of the current work with `coinbase` as beneficiary, for miners
    /// assembling blocks themselves.
    pub fn block_template(&self, coinbase: Address) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let current = state.current.as_ref()?;
        let header = Header {
            coinbase,
            ..current.header.clone()
        };
        let block = Block::new(header, current.transactions.clone(), Vec::new(), current.receipts.clone());
        Some(rlp::encode(&block).to_vec())
    }

    /// Check a solution for served work `hash`, forwarding the sealed block
    /// if it is valid.
    pub fn submit_work(&self, nonce: u64, mix_digest: H256, hash: H256) -> bool {
        let mut state = self.state.lock();
        let Some(work) = state.pending.get(&hash) else {
            info!(?hash, "Work submitted but was not pending");
            return false;
        };
        let header = Header {
            nonce,
            mix_digest,
            ..work.block.header.clone()
        };
        if let Err(e) = self.engine.verify_seal(self.chain.as_ref(), &header) {
            warn!(?hash, err = %e, "Invalid proof-of-work submitted");
            return false;
        }
        let block = work.block.with_seal(header);
        state.pending.remove(&hash);
        info!(number = block.number(), ?hash, "Remote solution accepted");
        self.results.send(block).is_ok()
    }

    /// Validate a complete RLP-encoded block extending the head.
    pub fn submit_block(&self, encoded: &[u8]) -> bool {
        let mut block: Block = match rlp::decode(encoded) {
            Ok(block) => block,
            Err(e) => {
                warn!(err = %e, "Undecodable block submitted");
                return false;
            }
        };
        let wanted = self
            .chain
            .current_header()
            .map_or(0, |head| head.number + 1);
        if block.number() != wanted {
            warn!(number = block.number(), wanted, "Block submitted out of order");
            return false;
        }
        if block.header.nonce == 0 {
            warn!(number = block.number(), "Block submitted without a nonce");
            return false;
        }
        let version = self.chain.config().header_version(block.number());
        block.header.version = Some(version);
        if let Err(e) = self.engine.verify_header(self.chain.as_ref(), &block.header, true) {
            warn!(hash = ?block.hash(), number = block.number(), err = %e, "Invalid proof-of-work submitted");
            return false;
        }
        info!(number = block.number(), hash = ?block.hash(), "Remote block accepted");
        self.results.send(block).is_ok()
    }

    /// Record the advisory hash rate of miner `id`.
    pub fn submit_hashrate(&self, id: H256, rate: u64) -> bool {
        self.hashrates.submit(id, rate);
        true
    }

    /// Sum of the live remote hash rates.
    pub fn hashrate(&self) -> u64 {
        self.hashrates.total(Instant::now())
    }

    /// Forget work served more than [`WORK_EXPIRY`] before `now` and stale rates.
    pub fn prune(&self, now: Instant) {
        self.state
            .lock()
            .pending
            .retain(|_, work| now.saturating_duration_since(work.served_at) <= WORK_EXPIRY);
        self.hashrates.prune(now);
    }

    /// Number of served work items still accepting solutions.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}
