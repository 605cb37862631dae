//! Cross-crate integration tests for the Aquahash engine.
//!
//! Chains are built over the in-memory [`MemoryChain`] with blocks that go
//! through the same prepare, finalize, and seal steps a miner runs.
//!
//! [`MemoryChain`]: aqua_consensus::testing::MemoryChain

pub mod helpers;
