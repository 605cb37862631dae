//! # aqua-core
//! Protocol types, fork schedule, hash primitives, and engine traits for Aquahash.

pub mod argon2id;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod fork;
pub mod traits;
pub mod types;
