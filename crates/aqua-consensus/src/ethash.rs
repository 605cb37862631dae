//! Version-1 proof of work: the memory-hard hashimoto construction.
//!
//! Each epoch of [`EPOCH_LENGTH`] blocks has its own pseudo-random *cache*,
//! derived from the epoch seed hash, and a much larger *dataset* derived from
//! the cache. Verifiers recompute the few dataset items a nonce touches from
//! the cache ([`hashimoto_light`]); miners precompute the whole dataset and
//! read it directly ([`hashimoto_full`]). Both paths yield identical results.
//!
//! # Sizing
//!
//! Cache and dataset sizes grow linearly per epoch and are then reduced until
//! their row count is prime, which keeps access patterns from aliasing.

use aqua_core::crypto::{keccak256, keccak512, pow_seed};
use primitive_types::H256;
use rayon::prelude::*;

/// Blocks per epoch.
pub const EPOCH_LENGTH: u64 = 30_000;
/// Epochs with a supported cache/dataset size. Heights beyond are out of range.
pub const MAX_EPOCH: u64 = 2048;

const DATASET_INIT_BYTES: u64 = 1 << 30;
const DATASET_GROWTH_BYTES: u64 = 1 << 23;
const CACHE_INIT_BYTES: u64 = 1 << 24;
const CACHE_GROWTH_BYTES: u64 = 1 << 17;
const MIX_BYTES: u64 = 128;
const HASH_BYTES: u64 = 64;
/// 32-bit words per 64-byte hash.
pub const HASH_WORDS: usize = 16;
const DATASET_PARENTS: u32 = 256;
const CACHE_ROUNDS: usize = 3;
const LOOP_ACCESSES: usize = 64;
const FNV_PRIME: u32 = 0x0100_0193;

/// Cache size used by test-mode engines.
pub const TEST_CACHE_SIZE: u64 = 1024;
/// Dataset size used by test-mode engines.
pub const TEST_DATASET_SIZE: u64 = 32 * 1024;

/// Epoch of block `number`.
pub fn epoch(number: u64) -> u64 {
    number / EPOCH_LENGTH
}

/// Verification cache size in bytes for the epoch of block `number`.
pub fn cache_size(number: u64) -> u64 {
    let mut size = CACHE_INIT_BYTES + CACHE_GROWTH_BYTES * epoch(number) - HASH_BYTES;
    while !is_prime(size / HASH_BYTES) {
        size -= 2 * HASH_BYTES;
    }
    size
}

/// Mining dataset size in bytes for the epoch of block `number`.
pub fn dataset_size(number: u64) -> u64 {
    let mut size = DATASET_INIT_BYTES + DATASET_GROWTH_BYTES * epoch(number) - MIX_BYTES;
    while !is_prime(size / MIX_BYTES) {
        size -= 2 * MIX_BYTES;
    }
    size
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Seed of the epoch containing block `number`: Keccak-256 iterated once per epoch.
pub fn seed_hash(number: u64) -> H256 {
    let mut seed = H256::zero();
    for _ in 0..epoch(number) {
        seed = keccak256(seed);
    }
    seed
}

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

#[inline]
fn fnv_hash(mix: &mut [u32], data: &[u32]) {
    for (m, d) in mix.iter_mut().zip(data) {
        *m = fnv(*m, *d);
    }
}

fn to_words(bytes: &[u8; 64]) -> [u32; HASH_WORDS] {
    let mut words = [0u32; HASH_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

fn to_bytes(words: &[u32; HASH_WORDS]) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Build the verification cache of `size` bytes from an epoch seed.
///
/// Sequential Keccak-512 fill followed by [`CACHE_ROUNDS`] rounds of
/// RandMemoHash. Returned as little-endian 32-bit words.
pub fn generate_cache(size: u64, seed: &H256) -> Vec<u32> {
    let rows = (size / HASH_BYTES) as usize;
    if rows == 0 {
        return Vec::new();
    }
    let mut cache = vec![[0u8; 64]; rows];
    cache[0] = keccak512(seed);
    for i in 1..rows {
        cache[i] = keccak512(cache[i - 1]);
    }

    for _ in 0..CACHE_ROUNDS {
        for j in 0..rows {
            let src = (j + rows - 1) % rows;
            let head = u32::from_le_bytes([cache[j][0], cache[j][1], cache[j][2], cache[j][3]]);
            let xor = head as usize % rows;
            let mut temp = [0u8; 64];
            for (k, byte) in temp.iter_mut().enumerate() {
                *byte = cache[src][k] ^ cache[xor][k];
            }
            cache[j] = keccak512(temp);
        }
    }

    cache.iter().flat_map(to_words).collect()
}

/// Compute dataset item `index` from the cache.
pub fn dataset_item(cache: &[u32], index: u32) -> [u32; HASH_WORDS] {
    let rows = (cache.len() / HASH_WORDS) as u32;
    let base = (index % rows) as usize * HASH_WORDS;

    let mut seed = [0u32; HASH_WORDS];
    seed.copy_from_slice(&cache[base..base + HASH_WORDS]);
    seed[0] ^= index;
    let mut mix = to_words(&keccak512(to_bytes(&seed)));

    for i in 0..DATASET_PARENTS {
        let parent = fnv(index ^ i, mix[i as usize % HASH_WORDS]) % rows;
        let offset = parent as usize * HASH_WORDS;
        fnv_hash(&mut mix, &cache[offset..offset + HASH_WORDS]);
    }
    to_words(&keccak512(to_bytes(&mix)))
}

/// Expand a cache into a full dataset of `size` bytes, in parallel.
pub fn generate_dataset(size: u64, cache: &[u32]) -> Vec<u32> {
    let mut dataset = vec![0u32; (size / 4) as usize];
    dataset
        .par_chunks_mut(HASH_WORDS)
        .enumerate()
        .for_each(|(i, chunk)| chunk.copy_from_slice(&dataset_item(cache, i as u32)));
    dataset
}

/// Aggregate dataset items for `(hash, nonce)` into `(mix_digest, result)`.
fn hashimoto(
    hash: &H256,
    nonce: u64,
    size: u64,
    lookup: impl Fn(u32) -> [u32; HASH_WORDS],
) -> (H256, H256) {
    let rows = (size / MIX_BYTES) as u32;
    let seed = keccak512(pow_seed(hash, nonce));
    let seed_words = to_words(&seed);
    let seed_head = seed_words[0];

    let mut mix = [0u32; 2 * HASH_WORDS];
    for (i, m) in mix.iter_mut().enumerate() {
        *m = seed_words[i % HASH_WORDS];
    }

    let mut temp = [0u32; 2 * HASH_WORDS];
    for i in 0..LOOP_ACCESSES {
        let parent = fnv(i as u32 ^ seed_head, mix[i % mix.len()]) % rows;
        for j in 0..2u32 {
            let item = lookup(2 * parent + j);
            let at = j as usize * HASH_WORDS;
            temp[at..at + HASH_WORDS].copy_from_slice(&item);
        }
        fnv_hash(&mut mix, &temp);
    }

    let mut digest = H256::zero();
    for (i, chunk) in mix.chunks_exact(4).enumerate() {
        let folded = fnv(fnv(fnv(chunk[0], chunk[1]), chunk[2]), chunk[3]);
        digest.0[i * 4..i * 4 + 4].copy_from_slice(&folded.to_le_bytes());
    }

    let mut tail = [0u8; 96];
    tail[..64].copy_from_slice(&seed);
    tail[64..].copy_from_slice(digest.as_bytes());
    (digest, keccak256(tail))
}

/// Hashimoto recomputing dataset items from the cache on demand.
pub fn hashimoto_light(size: u64, cache: &[u32], hash: &H256, nonce: u64) -> (H256, H256) {
    hashimoto(hash, nonce, size, |index| dataset_item(cache, index))
}

/// Hashimoto reading a precomputed dataset.
pub fn hashimoto_full(dataset: &[u32], hash: &H256, nonce: u64) -> (H256, H256) {
    let size = dataset.len() as u64 * 4;
    hashimoto(hash, nonce, size, |index| {
        let at = index as usize * HASH_WORDS;
        let mut item = [0u32; HASH_WORDS];
        item.copy_from_slice(&dataset[at..at + HASH_WORDS]);
        item
    })
}
