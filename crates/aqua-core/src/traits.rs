//! Trait interfaces between the consensus engine and its host chain.
//!
//! - [`ChainReader`]: read-only header and block lookups (the host chain implements)
//! - [`StateDb`]: the account state the finalizer credits (the host chain implements)
//! - [`Engine`]: validation, difficulty, sealing, and finalization (aqua-consensus implements)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;

use primitive_types::{H256, U256};

use crate::error::ConsensusError;
use crate::fork::ChainConfig;
use crate::types::{Address, Block, Header, Receipt, Transaction};

/// Read-only view of the local chain used during header verification.
///
/// Lookups return owned copies; a missing entry is `None`, never an error.
pub trait ChainReader: Send + Sync {
    /// Chain identity and fork schedule.
    fn config(&self) -> &ChainConfig;

    /// Current head of the local chain, if any block has been imported.
    fn current_header(&self) -> Option<Header>;

    /// Header by hash and number.
    fn get_header(&self, hash: &H256, number: u64) -> Option<Header>;

    /// Canonical header at `number`.
    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    /// Full block by hash and number.
    fn get_block(&self, hash: &H256, number: u64) -> Option<Block>;
}

/// Mutable account state the finalizer credits rewards to.
pub trait StateDb {
    /// Credit `amount` wei to `address`.
    fn add_balance(&mut self, address: &Address, amount: U256);

    /// Root of the state with all pending changes applied.
    fn intermediate_root(&mut self) -> H256;
}

/// Broadcast-once cancellation handle shared by worker threads.
///
/// Clones observe the same flag. Once aborted it stays aborted.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder to stop.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The consensus engine contract consumed by the import pipeline and miner.
pub trait Engine: Send + Sync {
    /// Address credited with the block reward.
    fn author(&self, header: &Header) -> Address;

    /// Verify a single header against its parent, optionally checking the seal.
    fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        seal: bool,
    ) -> Result<(), ConsensusError>;

    /// Verify a batch of headers concurrently.
    ///
    /// Results arrive on the returned receiver strictly in input order.
    /// Aborting the returned signal stops dispatch; undelivered results are dropped.
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> (AbortSignal, Receiver<Result<(), ConsensusError>>);

    /// Verify the uncles of a full block.
    fn verify_uncles(&self, chain: &dyn ChainReader, block: &Block) -> Result<(), ConsensusError>;

    /// Verify only the proof-of-work seal of a header.
    fn verify_seal(&self, chain: &dyn ChainReader, header: &Header) -> Result<(), ConsensusError>;

    /// Fill in difficulty and version of a header about to be sealed.
    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), ConsensusError>;

    /// Credit rewards, set the state root, and assemble the final block.
    fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        state: &mut dyn StateDb,
        txs: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: Vec<Receipt>,
    ) -> Result<Block, ConsensusError>;

    /// Difficulty a block at `parent.number + 1` with timestamp `time` must have.
    fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        time: u64,
        parent: &Header,
        grandparent: Option<&Header>,
    ) -> Result<U256, ConsensusError>;

    /// Search for a seal. Blocks until found (`Some`) or `stop` is aborted (`None`).
    fn seal(
        &self,
        chain: &dyn ChainReader,
        block: Block,
        stop: &AbortSignal,
    ) -> Result<Option<Block>, ConsensusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_shared_between_clones() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_aborted());
        signal.abort();
        assert!(clone.is_aborted());
        signal.abort();
        assert!(signal.is_aborted());
    }
}
