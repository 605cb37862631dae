//! Argon2id (RFC 9106, version 0x13) over BLAKE2b.
//!
//! The proof-of-work versions 2–4 run Argon2id with an empty salt and as
//! little as 1 KiB of memory. General-purpose password-hashing crates refuse
//! those parameters (minimum salt and memory sizes), so the kernel is
//! implemented here directly. Memory is rounded down to a multiple of
//! `4 * lanes` blocks with a floor of `8 * lanes` blocks, while the initial
//! hash `H0` commits to the requested memory size.
//!
//! The output tag is always [`TAG_LEN`] bytes.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};

/// Length of the derived tag in bytes.
pub const TAG_LEN: usize = 32;

const BLOCK_WORDS: usize = 128;
const BLOCK_BYTES: usize = BLOCK_WORDS * 8;
const SYNC_POINTS: u32 = 4;
const ARGON2_VERSION: u32 = 0x13;
const ARGON2ID: u32 = 2;

type Blake2b256 = Blake2b<U32>;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Memory size in KiB (1 KiB = one block).
    pub m_cost: u32,
    /// Number of passes over memory.
    pub t_cost: u32,
    /// Degree of parallelism (lanes).
    pub p_cost: u32,
}

impl Params {
    pub const fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }
}

#[derive(Clone, Copy)]
struct Block([u64; BLOCK_WORDS]);

impl Block {
    const ZERO: Block = Block([0; BLOCK_WORDS]);

    fn from_bytes(bytes: &[u8; BLOCK_BYTES]) -> Self {
        let mut block = Self::ZERO;
        for (word, chunk) in block.0.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        block
    }

    fn to_bytes(&self) -> [u8; BLOCK_BYTES] {
        let mut bytes = [0u8; BLOCK_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

/// Memory layout derived from the cost parameters.
#[derive(Clone, Copy)]
struct Layout {
    lanes: u32,
    passes: u32,
    blocks: u32,
    lane_len: u32,
    segment_len: u32,
}

impl Layout {
    fn new(params: Params) -> Self {
        let lanes = params.p_cost.max(1);
        let passes = params.t_cost.max(1);
        let mut blocks = params.m_cost / (SYNC_POINTS * lanes) * (SYNC_POINTS * lanes);
        if blocks < 2 * SYNC_POINTS * lanes {
            blocks = 2 * SYNC_POINTS * lanes;
        }
        let lane_len = blocks / lanes;
        Self {
            lanes,
            passes,
            blocks,
            lane_len,
            segment_len: lane_len / SYNC_POINTS,
        }
    }
}

/// Derive a [`TAG_LEN`]-byte Argon2id tag.
pub fn argon2id(password: &[u8], salt: &[u8], params: Params) -> [u8; TAG_LEN] {
    let layout = Layout::new(params);
    let h0 = initial_hash(password, salt, params, layout);

    let mut memory = vec![Block::ZERO; layout.blocks as usize];
    for lane in 0..layout.lanes {
        let start = (lane * layout.lane_len) as usize;
        for i in 0..2u32 {
            let bytes = hash_block(&[&h0, &i.to_le_bytes(), &lane.to_le_bytes()]);
            memory[start + i as usize] = Block::from_bytes(&bytes);
        }
    }

    for pass in 0..layout.passes {
        for slice in 0..SYNC_POINTS {
            for lane in 0..layout.lanes {
                fill_segment(&mut memory, layout, pass, slice, lane);
            }
        }
    }

    let last = (layout.blocks - 1) as usize;
    let mut final_block = memory[last];
    for lane in 0..layout.lanes - 1 {
        let tail = (lane * layout.lane_len + layout.lane_len - 1) as usize;
        for (acc, word) in final_block.0.iter_mut().zip(memory[tail].0.iter()) {
            *acc ^= word;
        }
    }

    let mut hasher = Blake2b256::new();
    hasher.update((TAG_LEN as u32).to_le_bytes());
    hasher.update(final_block.to_bytes());
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&hasher.finalize());
    tag
}

fn initial_hash(password: &[u8], salt: &[u8], params: Params, layout: Layout) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    for word in [
        layout.lanes,
        TAG_LEN as u32,
        params.m_cost,
        layout.passes,
        ARGON2_VERSION,
        ARGON2ID,
    ] {
        hasher.update(word.to_le_bytes());
    }
    hasher.update((password.len() as u32).to_le_bytes());
    hasher.update(password);
    hasher.update((salt.len() as u32).to_le_bytes());
    hasher.update(salt);
    // secret and associated data are always empty
    hasher.update(0u32.to_le_bytes());
    hasher.update(0u32.to_le_bytes());

    let mut h0 = [0u8; 64];
    h0.copy_from_slice(&hasher.finalize());
    h0
}

/// Variable-length hash H' specialised to one 1024-byte block.
fn hash_block(parts: &[&[u8]]) -> [u8; BLOCK_BYTES] {
    let mut out = [0u8; BLOCK_BYTES];
    let mut hasher = Blake2b512::new();
    hasher.update((BLOCK_BYTES as u32).to_le_bytes());
    for part in parts {
        hasher.update(part);
    }
    let mut v = hasher.finalize();
    out[..32].copy_from_slice(&v[..32]);

    let mut pos = 32;
    while BLOCK_BYTES - pos > 64 {
        v = Blake2b512::digest(v);
        out[pos..pos + 32].copy_from_slice(&v[..32]);
        pos += 32;
    }
    v = Blake2b512::digest(v);
    out[pos..].copy_from_slice(&v);
    out
}

fn fill_segment(memory: &mut [Block], layout: Layout, pass: u32, slice: u32, lane: u32) {
    let data_independent = pass == 0 && slice < SYNC_POINTS / 2;

    let zero = Block::ZERO;
    let mut address = Block::ZERO;
    let mut input = Block::ZERO;
    if data_independent {
        input.0[0] = pass as u64;
        input.0[1] = lane as u64;
        input.0[2] = slice as u64;
        input.0[3] = layout.blocks as u64;
        input.0[4] = layout.passes as u64;
        input.0[5] = ARGON2ID as u64;
    }

    let mut index = 0u32;
    if pass == 0 && slice == 0 {
        // the first two blocks of each lane are already seeded
        index = 2;
        if data_independent {
            next_addresses(&mut address, &mut input, &zero);
        }
    }

    let mut offset = lane * layout.lane_len + slice * layout.segment_len + index;
    while index < layout.segment_len {
        let prev = if index == 0 && slice == 0 {
            offset + layout.lane_len - 1
        } else {
            offset - 1
        };

        let random = if data_independent {
            if index as usize % BLOCK_WORDS == 0 {
                next_addresses(&mut address, &mut input, &zero);
            }
            address.0[index as usize % BLOCK_WORDS]
        } else {
            memory[prev as usize].0[0]
        };

        let reference = reference_index(random, layout, pass, slice, lane, index);
        let prev_block = memory[prev as usize];
        let ref_block = memory[reference as usize];
        compress(&mut memory[offset as usize], &prev_block, &ref_block, true);

        index += 1;
        offset += 1;
    }
}

fn next_addresses(address: &mut Block, input: &mut Block, zero: &Block) {
    input.0[6] += 1;
    compress(address, input, zero, false);
    let first = *address;
    compress(address, &first, zero, false);
}

fn reference_index(random: u64, layout: Layout, pass: u32, slice: u32, lane: u32, index: u32) -> u32 {
    let mut ref_lane = ((random >> 32) as u32) % layout.lanes;
    if pass == 0 && slice == 0 {
        ref_lane = lane;
    }

    let mut area = 3 * layout.segment_len;
    let mut start = ((slice + 1) % SYNC_POINTS) * layout.segment_len;
    if lane == ref_lane {
        area += index;
    }
    if pass == 0 {
        area = slice * layout.segment_len;
        start = 0;
        if slice == 0 || lane == ref_lane {
            area += index;
        }
    }
    if index == 0 || lane == ref_lane {
        area -= 1;
    }

    let mut p = random & 0xffff_ffff;
    p = (p * p) >> 32;
    p = (p * area as u64) >> 32;
    let relative = (start as u64 + area as u64 - (p + 1)) % layout.lane_len as u64;
    ref_lane * layout.lane_len + relative as u32
}

/// Compression function G: `out (^)= P(x ^ y) ^ x ^ y`.
fn compress(out: &mut Block, x: &Block, y: &Block, xor_into: bool) {
    let mut r = [0u64; BLOCK_WORDS];
    for (i, word) in r.iter_mut().enumerate() {
        *word = x.0[i] ^ y.0[i];
    }
    let mut t = r;

    for row in 0..8 {
        let base = row * 16;
        let idx: [usize; 16] = std::array::from_fn(|k| base + k);
        permute(&mut t, idx);
    }
    for col in 0..8 {
        let base = col * 2;
        let idx: [usize; 16] = std::array::from_fn(|k| base + (k / 2) * 16 + (k % 2));
        permute(&mut t, idx);
    }

    for (i, word) in out.0.iter_mut().enumerate() {
        let mixed = r[i] ^ t[i];
        if xor_into {
            *word ^= mixed;
        } else {
            *word = mixed;
        }
    }
}

/// BLAKE2b round with multiplication-hardened G over 16 selected words.
fn permute(v: &mut [u64; BLOCK_WORDS], idx: [usize; 16]) {
    let gb = |v: &mut [u64; BLOCK_WORDS], a: usize, b: usize, c: usize, d: usize| {
        let (a, b, c, d) = (idx[a], idx[b], idx[c], idx[d]);
        v[a] = blamka(v[a], v[b]);
        v[d] = (v[d] ^ v[a]).rotate_right(32);
        v[c] = blamka(v[c], v[d]);
        v[b] = (v[b] ^ v[c]).rotate_right(24);
        v[a] = blamka(v[a], v[b]);
        v[d] = (v[d] ^ v[a]).rotate_right(16);
        v[c] = blamka(v[c], v[d]);
        v[b] = (v[b] ^ v[c]).rotate_right(63);
    };
    gb(v, 0, 4, 8, 12);
    gb(v, 1, 5, 9, 13);
    gb(v, 2, 6, 10, 14);
    gb(v, 3, 7, 11, 15);
    gb(v, 0, 5, 10, 15);
    gb(v, 1, 6, 11, 12);
    gb(v, 2, 7, 8, 13);
    gb(v, 3, 4, 9, 14);
}

#[inline(always)]
fn blamka(x: u64, y: u64) -> u64 {
    let lo = (x as u32 as u64).wrapping_mul(y as u32 as u64);
    x.wrapping_add(y).wrapping_add(lo.wrapping_mul(2))
}
