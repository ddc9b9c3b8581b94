//! Context triggered piecewise hashing in the spamsum/ssdeep style.
//!
//! A rolling hash over the last [`ROLLING_WINDOW`] bytes decides where a
//! piece ends; every piece contributes one base64 character to a block hash.
//! One block hash is kept per candidate block size `3 << n`, and the digest
//! prints the two adjacent block sizes that best fit the input length as
//! `blocksize:hash1:hash2`.

use crate::backend::{Backend, BackendPolicy};
use crate::runtime::{self, Leased};
use crate::{Algorithm, FuzzyHashError, Result};
use std::cmp::{max, min};

pub const ROLLING_WINDOW: usize = 7;
pub const MIN_BLOCKSIZE: u32 = 3;
pub const SPAMSUM_LENGTH: usize = 64;
pub const NUM_BLOCKHASHES: usize = 31;
/// Longest digest text: two full block hashes, separators and block size.
pub const FUZZY_MAX_RESULT: usize = 2 * SPAMSUM_LENGTH + 20;

const HASH_PRIME: u32 = 0x0100_0193;
const HASH_INIT: u32 = 0x2802_1967;
const B64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
/// Block sizes from here on are large enough that scores are not capped.
const SCORE_CAP_BLOCKSIZE: u64 = (99 + ROLLING_WINDOW as u64) / ROLLING_WINDOW as u64 * MIN_BLOCKSIZE as u64;

fn block_size(index: usize) -> u64 {
    (MIN_BLOCKSIZE as u64) << index
}

fn sum_hash(byte: u8, hash: u32) -> u32 {
    hash.wrapping_mul(HASH_PRIME) ^ byte as u32
}

/// Options changing how block hashes are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestFlags {
    /// Collapse runs of more than three identical characters.
    pub eliminate_sequences: bool,
    /// Print the second block hash in full instead of 32 characters.
    pub no_truncate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RollingHash {
    index: usize,
    h1: u32,
    h2: u32,
    h3: u32,
    window: [u8; ROLLING_WINDOW],
}

impl RollingHash {
    fn update(&mut self, byte: u8) {
        self.h2 = self
            .h2
            .wrapping_sub(self.h1)
            .wrapping_add((ROLLING_WINDOW as u32).wrapping_mul(byte as u32));
        self.h1 = self
            .h1
            .wrapping_add(byte as u32)
            .wrapping_sub(self.window[self.index] as u32);
        self.window[self.index] = byte;
        self.index = (self.index + 1) % ROLLING_WINDOW;
        self.h3 = (self.h3 << 5) ^ byte as u32;
    }

    fn value(&self) -> u32 {
        self.h1.wrapping_add(self.h2).wrapping_add(self.h3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockHashContext {
    /// Hash of the piece currently being read.
    h: u32,
    /// Same as `h`, but only reset while the block hash is in its first half.
    half_h: u32,
    /// Emitted characters, at most `SPAMSUM_LENGTH - 1`.
    digest: Vec<u8>,
}

impl BlockHashContext {
    fn new(h: u32, half_h: u32) -> Self {
        BlockHashContext {
            h,
            half_h,
            digest: Vec::with_capacity(SPAMSUM_LENGTH),
        }
    }
}

/// Accumulation state of one ssdeep digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdeepState {
    /// Lowest block size still worth tracking.
    start: usize,
    /// `blocks.len()`, the block sizes opened so far.
    blocks: Vec<BlockHashContext>,
    total_size: u64,
    roll: RollingHash,
}

impl Default for SsdeepState {
    fn default() -> Self {
        Self::new()
    }
}

impl SsdeepState {
    pub fn new() -> Self {
        let mut blocks = Vec::with_capacity(NUM_BLOCKHASHES);
        blocks.push(BlockHashContext::new(HASH_INIT, HASH_INIT));
        SsdeepState {
            start: 0,
            blocks,
            total_size: 0,
            roll: RollingHash::default(),
        }
    }

    /// Total number of bytes fed so far.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn update(&mut self, data: &[u8]) {
        self.total_size += data.len() as u64;
        for &byte in data {
            self.step(byte);
        }
    }

    fn end(&self) -> usize {
        self.blocks.len()
    }

    fn step(&mut self, byte: u8) {
        self.roll.update(byte);
        let h = self.roll.value() as u64;
        for context in &mut self.blocks[self.start..] {
            context.h = sum_hash(byte, context.h);
            context.half_h = sum_hash(byte, context.half_h);
        }

        // A trigger for one block size implies a trigger for all smaller ones,
        // so the first miss ends the scan. Forking may extend the range.
        let mut index = self.start;
        while index < self.end() {
            let size = block_size(index);
            if h % size != size - 1 {
                break;
            }
            if self.blocks[index].digest.is_empty() {
                self.try_fork();
            }
            let context = &mut self.blocks[index];
            if context.digest.len() < SPAMSUM_LENGTH - 1 {
                context.digest.push(B64[(context.h % 64) as usize]);
                context.h = HASH_INIT;
                if context.digest.len() < SPAMSUM_LENGTH / 2 {
                    context.half_h = HASH_INIT;
                }
            } else {
                self.try_reduce();
            }
            index += 1;
        }
    }

    fn try_fork(&mut self) {
        if self.end() >= NUM_BLOCKHASHES {
            return;
        }
        let last = &self.blocks[self.end() - 1];
        let next = BlockHashContext::new(last.h, last.half_h);
        self.blocks.push(next);
    }

    fn try_reduce(&mut self) {
        if self.end() - self.start < 2 {
            return;
        }
        if block_size(self.start) * SPAMSUM_LENGTH as u64 >= self.total_size {
            return;
        }
        if self.blocks[self.start + 1].digest.len() < SPAMSUM_LENGTH / 2 {
            return;
        }
        self.start += 1;
    }

    /// Renders the digest of everything fed so far without consuming state.
    pub fn digest(&self, flags: DigestFlags) -> Result<String> {
        let h = self.roll.value();
        let mut index = self.start;
        while block_size(index) * (SPAMSUM_LENGTH as u64) < self.total_size {
            index += 1;
            if index >= NUM_BLOCKHASHES {
                return Err(FuzzyHashError::backend(
                    Algorithm::RollingContext,
                    format!("input of {} bytes is too large to digest", self.total_size),
                ));
            }
        }
        while index >= self.end() {
            index -= 1;
        }
        while index > self.start && self.blocks[index].digest.len() < SPAMSUM_LENGTH / 2 {
            index -= 1;
        }

        let first = &self.blocks[index];
        let mut hash1 = copy_block(&first.digest, flags);
        if h != 0 {
            push_tail(&mut hash1, B64[(first.h % 64) as usize], flags);
        }

        let mut hash2 = Vec::new();
        if index + 1 < self.end() {
            let second = &self.blocks[index + 1];
            let limit = if flags.no_truncate {
                SPAMSUM_LENGTH
            } else {
                SPAMSUM_LENGTH / 2 - 1
            };
            let len = min(second.digest.len(), limit);
            hash2 = copy_block(&second.digest[..len], flags);
            if h != 0 {
                let tail = if flags.no_truncate {
                    second.h
                } else {
                    second.half_h
                };
                push_tail(&mut hash2, B64[(tail % 64) as usize], flags);
            }
        } else if h != 0 {
            hash2.push(B64[(first.h % 64) as usize]);
        }

        let mut text = String::with_capacity(FUZZY_MAX_RESULT);
        text.push_str(&block_size(index).to_string());
        text.push(':');
        text.extend(hash1.iter().map(|&c| c as char));
        text.push(':');
        text.extend(hash2.iter().map(|&c| c as char));
        Ok(text)
    }
}

fn copy_block(block: &[u8], flags: DigestFlags) -> Vec<u8> {
    if flags.eliminate_sequences {
        eliminate_sequences(block)
    } else {
        block.to_vec()
    }
}

fn push_tail(block: &mut Vec<u8>, tail: u8, flags: DigestFlags) {
    let len = block.len();
    if !flags.eliminate_sequences || len < 3 || block[len - 3..].iter().any(|&c| c != tail) {
        block.push(tail);
    }
}

/// Keeps at most three consecutive identical characters.
fn eliminate_sequences(block: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(block.len());
    for (i, &c) in block.iter().enumerate() {
        if i >= 3 && c == block[i - 1] && c == block[i - 2] && c == block[i - 3] {
            continue;
        }
        result.push(c);
    }
    result
}

/// A parsed `blocksize:hash1:hash2` digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdeepHash {
    pub block_size: u32,
    pub block_hash1: Vec<u8>,
    pub block_hash2: Vec<u8>,
}

impl SsdeepHash {
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |reason: &str| FuzzyHashError::malformed(Algorithm::RollingContext, reason);
        let (size, rest) = text
            .split_once(':')
            .ok_or_else(|| malformed("missing block size separator"))?;
        let (hash1, hash2) = rest
            .split_once(':')
            .ok_or_else(|| malformed("missing block hash separator"))?;

        if size.is_empty() || !size.bytes().all(|c| c.is_ascii_digit()) {
            return Err(malformed("block size is not a decimal number"));
        }
        let size: u32 = size
            .parse()
            .map_err(|_| malformed("block size is out of range"))?;
        if !(0..NUM_BLOCKHASHES).any(|index| block_size(index) == size as u64) {
            return Err(malformed("block size is not 3 times a power of two"));
        }

        for hash in [hash1, hash2] {
            if hash.len() > SPAMSUM_LENGTH {
                return Err(malformed("block hash is longer than 64 characters"));
            }
            if !hash.bytes().all(|c| B64.contains(&c)) {
                return Err(malformed("block hash contains a non base64 character"));
            }
        }

        Ok(SsdeepHash {
            block_size: size,
            block_hash1: hash1.as_bytes().to_vec(),
            block_hash2: hash2.as_bytes().to_vec(),
        })
    }
}

/// Similarity of two parsed digests in `[0, 100]`.
pub fn compare_hashes(a: &SsdeepHash, b: &SsdeepHash) -> u8 {
    let size_a = a.block_size as u64;
    let size_b = b.block_size as u64;
    if size_a != size_b && size_a != size_b * 2 && size_b != size_a * 2 {
        return 0;
    }

    let a1 = eliminate_sequences(&a.block_hash1);
    let a2 = eliminate_sequences(&a.block_hash2);
    let b1 = eliminate_sequences(&b.block_hash1);
    let b2 = eliminate_sequences(&b.block_hash2);

    if size_a == size_b && a1 == b1 && a2 == b2 {
        return 100;
    }

    let score = if size_a == size_b {
        max(
            score_strings(&a1, &b1, size_a),
            score_strings(&a2, &b2, size_a * 2),
        )
    } else if size_a == size_b * 2 {
        score_strings(&a1, &b2, size_a)
    } else {
        score_strings(&a2, &b1, size_b)
    };
    score as u8
}

fn has_common_substring(s1: &[u8], s2: &[u8]) -> bool {
    if s1.len() < ROLLING_WINDOW || s2.len() < ROLLING_WINDOW {
        return false;
    }
    s1.windows(ROLLING_WINDOW)
        .any(|window| s2.windows(ROLLING_WINDOW).any(|other| other == window))
}

fn score_strings(s1: &[u8], s2: &[u8], block_size: u64) -> u32 {
    if s1.len() > SPAMSUM_LENGTH || s2.len() > SPAMSUM_LENGTH {
        return 0;
    }
    if !has_common_substring(s1, s2) {
        return 0;
    }
    let total_len = (s1.len() + s2.len()) as u32;
    let distance = edit_distance(s1, s2);
    let scaled = distance * SPAMSUM_LENGTH as u32 / total_len;
    let scaled = 100 * scaled / SPAMSUM_LENGTH as u32;
    if scaled >= 100 {
        return 0;
    }
    let score = 100 - scaled;
    if block_size >= SCORE_CAP_BLOCKSIZE {
        return score;
    }
    let cap = block_size / MIN_BLOCKSIZE as u64 * min(s1.len(), s2.len()) as u64;
    min(score as u64, cap) as u32
}

/// Edit distance where insertions and deletions cost 1 and substitutions 2.
fn edit_distance(s1: &[u8], s2: &[u8]) -> u32 {
    let mut matrix = vec![vec![0u32; s1.len() + 1]; s2.len() + 1];
    matrix[0] = (0..s1.len() as u32 + 1).collect();
    for y in 1..s2.len() + 1 {
        matrix[y][0] = y as u32;
        for x in 1..s1.len() + 1 {
            let insert = matrix[y - 1][x] + 1;
            let delete = matrix[y][x - 1] + 1;
            let mut replace = matrix[y - 1][x - 1];
            if s2[y - 1] != s1[x - 1] {
                replace += 2;
            }
            matrix[y][x] = min(min(insert, delete), replace);
        }
    }
    matrix[s2.len()][s1.len()]
}

/// ssdeep backend: incremental, non-destructive reads, no minimum size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ssdeep {
    flags: DigestFlags,
}

impl Ssdeep {
    pub fn new(flags: DigestFlags) -> Self {
        Ssdeep { flags }
    }

    pub fn flags(&self) -> DigestFlags {
        self.flags
    }
}

impl Backend for Ssdeep {
    type State = Leased<SsdeepState>;
    type Parsed = SsdeepHash;

    fn algorithm(&self) -> Algorithm {
        Algorithm::RollingContext
    }

    fn policy(&self) -> BackendPolicy {
        BackendPolicy {
            supports_update: true,
            min_input_size: None,
            min_finalize_size: None,
            digest_is_destructive: false,
        }
    }

    fn create(&self) -> Result<Leased<SsdeepState>> {
        runtime::lease(Algorithm::RollingContext, SsdeepState::new())
    }

    fn update(&self, state: &mut Leased<SsdeepState>, data: &[u8]) -> Result<()> {
        state.get_mut().update(data);
        Ok(())
    }

    fn digest(&self, state: &mut Leased<SsdeepState>) -> Result<String> {
        state.get().digest(self.flags)
    }

    fn clone_state(&self, state: &Leased<SsdeepState>) -> Result<Leased<SsdeepState>> {
        runtime::lease(Algorithm::RollingContext, state.get().clone())
    }

    fn release(&self, state: Leased<SsdeepState>) {
        runtime::release(state);
    }

    fn parse(&self, text: &str) -> Result<SsdeepHash> {
        SsdeepHash::parse(text)
    }

    fn compare(&self, a: &str, b: &str) -> Result<u8> {
        Ok(compare_hashes(&SsdeepHash::parse(a)?, &SsdeepHash::parse(b)?))
    }
}
