//! # aqua-consensus — Aquahash difficulty, validation, sealing, and rewards.
//!
//! This crate implements the [`Engine`](aqua_core::traits::Engine) trait for
//! every Aquahash era, wiring together the difficulty rules, header and uncle
//! validators, the hashimoto and Argon2id proof-of-work codecs, the local
//! sealer, and the block finalizer.
//!
//! Blocks up to HF5 seal with hashimoto over an epoch dataset; later blocks
//! seal with Argon2id over the header hash, with parameters selected by the
//! header version.

pub mod config;
pub mod difficulty;
pub mod engine;
pub mod ethash;
pub mod light;
pub mod pow;
pub mod remote;
pub mod reward;
pub mod sealer;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod uncles;
pub mod verifier;

pub use config::{AquahashConfig, PowMode};
pub use engine::Aquahash;
pub use light::LightVerifier;
pub use pow::{PowCodec, SealVerifier};
pub use remote::RemoteAgent;
pub use sealer::{HashrateMeter, RemoteHashrates};
pub use verifier::HeaderValidator;
