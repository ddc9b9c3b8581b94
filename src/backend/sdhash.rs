//! Similarity digests built from Bloom filters of statistically improbable
//! features.
//!
//! Every 64-byte window of the input is ranked by its Shannon entropy. A
//! window is selected as a feature when it holds the highest rank of at
//! least [`POP_THRESHOLD`] overlapping popularity windows. Selected features
//! are hashed with SHA-256 and inserted into 2048-bit Bloom filters of up to
//! [`MAX_ELEM`] elements each.

use crate::backend::{Backend, BackendPolicy};
use crate::runtime::{self, Leased};
use crate::{Algorithm, FuzzyHashError, Result};
use bit_vec::BitVec;
use sha2::{Digest, Sha256};
use std::cmp::{max, min};

/// Smallest buffer that can be digested.
pub const MIN_INPUT_SIZE: usize = 512;
/// Length of one feature in bytes.
pub const FEATURE_SIZE: usize = 64;
/// Bits per Bloom filter.
pub const BF_SIZE_BITS: usize = 2048;
/// Bit indices taken from each feature hash.
pub const HASH_COUNT: usize = 5;
/// Mask selecting one 11-bit index.
pub const BIT_MASK: u32 = 0x7ff;
/// Features per full Bloom filter.
pub const MAX_ELEM: u32 = 160;
/// Filters with fewer elements than this do not take part in comparisons.
pub const MIN_ELEM_COUNT: u32 = 16;

const BF_SIZE_BYTES: usize = BF_SIZE_BITS / 8;
const POP_WIN_SIZE: usize = 64;
const POP_THRESHOLD: u32 = 16;
const ENTROPY_SCALE: f64 = 1_000_000.0;
const ENTROPY_LOW: u32 = 180_000;
const ENTROPY_HIGH: u32 = 990_000;
const RANK_STEP: u32 = 10_000;
const MAGIC: &str = "sdbf";
const VERSION: &str = "03";
const HASH_NAME: &str = "sha256";

/// Entropy contribution of a byte value seen `count` times in one feature,
/// scaled so a feature of 64 distinct bytes sums to 1 000 000.
pub(crate) fn entropy_table() -> [u32; FEATURE_SIZE + 1] {
    let mut table = [0u32; FEATURE_SIZE + 1];
    for (count, slot) in table.iter_mut().enumerate().skip(1) {
        let p = count as f64 / FEATURE_SIZE as f64;
        *slot = (-p * p.log2() / 6.0 * ENTROPY_SCALE) as u32;
    }
    table
}

/// Entropy rank of every feature position, 0 for positions never selected.
fn feature_ranks(data: &[u8], entropy: &[u32; FEATURE_SIZE + 1]) -> Vec<u32> {
    let mut counts = [0usize; 256];
    for &byte in &data[..FEATURE_SIZE] {
        counts[byte as usize] += 1;
    }
    let mut window_entropy: u32 = counts.iter().map(|&count| entropy[count]).sum();

    let positions = data.len() - FEATURE_SIZE + 1;
    let mut ranks = Vec::with_capacity(positions);
    for i in 0..positions {
        if i > 0 {
            let old = data[i - 1] as usize;
            window_entropy -= entropy[counts[old]];
            counts[old] -= 1;
            window_entropy += entropy[counts[old]];

            let new = data[i + FEATURE_SIZE - 1] as usize;
            window_entropy -= entropy[counts[new]];
            counts[new] += 1;
            window_entropy += entropy[counts[new]];
        }
        let rank = if (ENTROPY_LOW..=ENTROPY_HIGH).contains(&window_entropy) {
            window_entropy / RANK_STEP
        } else {
            0
        };
        ranks.push(rank);
    }
    ranks
}

/// Positions that win at least [`POP_THRESHOLD`] popularity windows.
///
/// Each window of [`POP_WIN_SIZE`] consecutive ranks votes for its highest
/// rank, the leftmost one on ties.
fn select_features(ranks: &[u32]) -> Vec<usize> {
    if ranks.len() < POP_WIN_SIZE {
        return Vec::new();
    }
    let mut votes = vec![0u32; ranks.len()];
    let mut best = 0;
    for start in 0..=ranks.len() - POP_WIN_SIZE {
        let end = start + POP_WIN_SIZE;
        if start == 0 || best < start {
            best = start;
            for pos in start + 1..end {
                if ranks[pos] > ranks[best] {
                    best = pos;
                }
            }
        } else if ranks[end - 1] > ranks[best] {
            best = end - 1;
        }
        if ranks[best] > 0 {
            votes[best] += 1;
        }
    }
    votes
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count >= POP_THRESHOLD)
        .map(|(pos, _)| pos)
        .collect()
}

fn feature_indices(feature: &[u8]) -> [usize; HASH_COUNT] {
    let hash = Sha256::digest(feature);
    let mut indices = [0usize; HASH_COUNT];
    for (k, index) in indices.iter_mut().enumerate() {
        let word = u32::from_le_bytes([
            hash[4 * k],
            hash[4 * k + 1],
            hash[4 * k + 2],
            hash[4 * k + 3],
        ]);
        *index = (word & BIT_MASK) as usize;
    }
    indices
}

/// One Bloom filter and the number of features it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: BitVec,
    elements: u32,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomFilter {
    pub fn new() -> Self {
        BloomFilter {
            bits: BitVec::from_elem(BF_SIZE_BITS, false),
            elements: 0,
        }
    }

    pub fn elements(&self) -> u32 {
        self.elements
    }

    /// Sets the bits of one feature. Returns false if all were already set.
    fn insert(&mut self, indices: &[usize; HASH_COUNT]) -> bool {
        let mut fresh = false;
        for &index in indices {
            if !self.bits[index] {
                self.bits.set(index, true);
                fresh = true;
            }
        }
        if fresh {
            self.elements += 1;
        }
        fresh
    }

    fn bit_count(&self) -> u32 {
        self.bits.blocks().map(|block| block.count_ones()).sum()
    }

    fn common_bits(&self, other: &BloomFilter) -> u32 {
        self.bits
            .blocks()
            .zip(other.bits.blocks())
            .map(|(a, b)| (a & b).count_ones())
            .sum()
    }

    /// Overlap of two filters above what random filters would share.
    fn score(&self, other: &BloomFilter) -> u32 {
        let s1 = self.bit_count();
        let s2 = other.bit_count();
        let min_est = s1 * s2 / BF_SIZE_BITS as u32;
        let max_est = min(s1, s2);
        if max_est <= min_est {
            return 0;
        }
        let common = self.common_bits(other);
        let cut_off = min_est + 3 * (max_est - min_est) / 10;
        if common <= cut_off {
            return 0;
        }
        100 * (common - min_est) / (max_est - min_est)
    }
}

/// A decoded sdbf digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdbfHash {
    pub input_size: u64,
    pub filters: Vec<BloomFilter>,
}

impl SdbfHash {
    /// Digests a whole buffer.
    pub(crate) fn generate(data: &[u8], entropy: &[u32; FEATURE_SIZE + 1]) -> Result<Self> {
        if data.len() < MIN_INPUT_SIZE {
            return Err(FuzzyHashError::InputTooSmall {
                algorithm: Algorithm::StatisticalBloom,
                actual_size: data.len() as u64,
                required_size: MIN_INPUT_SIZE,
            });
        }
        let ranks = feature_ranks(data, entropy);
        let features = select_features(&ranks);

        let mut filters = Vec::new();
        let mut current = BloomFilter::new();
        for pos in features {
            current.insert(&feature_indices(&data[pos..pos + FEATURE_SIZE]));
            if current.elements == MAX_ELEM {
                filters.push(std::mem::take(&mut current));
            }
        }
        if current.elements > 0 {
            filters.push(current);
        }
        log::trace!(
            "sdhash: {} bytes digested into {} filters",
            data.len(),
            filters.len()
        );
        Ok(SdbfHash {
            input_size: data.len() as u64,
            filters,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |reason: String| FuzzyHashError::malformed(Algorithm::StatisticalBloom, reason);
        let fields: Vec<&str> = text.split(':').collect();
        if fields.len() != 11 {
            return Err(malformed(format!("expected 11 fields, got {}", fields.len())));
        }
        let expected = [
            (0, MAGIC.to_string()),
            (1, VERSION.to_string()),
            (3, HASH_NAME.to_string()),
            (4, BF_SIZE_BYTES.to_string()),
            (5, HASH_COUNT.to_string()),
            (6, format!("{BIT_MASK:x}")),
            (7, MAX_ELEM.to_string()),
        ];
        for (index, value) in expected {
            if fields[index] != value {
                return Err(malformed(format!(
                    "field {index} is `{}`, expected `{value}`",
                    fields[index]
                )));
            }
        }
        let number = |field: &str, name: &str| -> Result<u64> {
            if field.is_empty() || !field.bytes().all(|c| c.is_ascii_digit()) {
                return Err(malformed(format!("{name} is not a decimal number")));
            }
            field
                .parse()
                .map_err(|_| malformed(format!("{name} is out of range")))
        };
        let input_size = number(fields[2], "input size")?;
        let count = number(fields[8], "filter count")?;
        let last = number(fields[9], "last filter size")?;
        if last > MAX_ELEM as u64 || (count == 0) != (last == 0) {
            return Err(malformed(format!("inconsistent last filter size {last}")));
        }
        let filter_digits = BF_SIZE_BYTES * 2;
        let data_len = fields[10].len();
        if data_len % filter_digits != 0 || (data_len / filter_digits) as u64 != count {
            return Err(malformed(format!(
                "{count} filters announced, got {data_len} hex digits of filter data"
            )));
        }
        let count = count as usize;
        let bytes = hex::decode(fields[10]).map_err(|e| malformed(e.to_string()))?;
        let filters = bytes
            .chunks(BF_SIZE_BYTES)
            .enumerate()
            .map(|(i, chunk)| BloomFilter {
                bits: BitVec::from_bytes(chunk),
                elements: if i + 1 == count { last as u32 } else { MAX_ELEM },
            })
            .collect();
        Ok(SdbfHash {
            input_size,
            filters,
        })
    }

    /// Average best filter score of `self` against `other`.
    fn score_against(&self, other: &SdbfHash) -> u32 {
        let mut sum = 0;
        let mut counted = 0;
        for filter in self.filters.iter().filter(|f| f.elements >= MIN_ELEM_COUNT) {
            counted += 1;
            sum += other
                .filters
                .iter()
                .filter(|f| f.elements >= MIN_ELEM_COUNT)
                .map(|f| filter.score(f))
                .max()
                .unwrap_or(0);
        }
        if counted == 0 {
            0
        } else {
            sum / counted
        }
    }

    /// Similarity in `[0, 100]`. The digest with fewer filters is the query;
    /// with equally many filters the better direction wins.
    pub fn compare(&self, other: &SdbfHash) -> u8 {
        let score = match self.filters.len().cmp(&other.filters.len()) {
            std::cmp::Ordering::Less => self.score_against(other),
            std::cmp::Ordering::Greater => other.score_against(self),
            std::cmp::Ordering::Equal => max(self.score_against(other), other.score_against(self)),
        };
        min(score, 100) as u8
    }

    pub fn to_text(&self) -> String {
        let last = self.filters.last().map_or(0, |f| f.elements);
        let mut data = Vec::with_capacity(self.filters.len() * BF_SIZE_BYTES);
        for filter in &self.filters {
            data.extend(filter.bits.to_bytes());
        }
        format!(
            "{MAGIC}:{VERSION}:{}:{HASH_NAME}:{BF_SIZE_BYTES}:{HASH_COUNT}:{BIT_MASK:x}:{MAX_ELEM}:{}:{last}:{}",
            self.input_size,
            self.filters.len(),
            hex::encode(data)
        )
    }
}

/// Digest state: the text is computed from the single buffer it is fed.
#[derive(Debug, Clone)]
pub struct SdhashState {
    entropy: &'static [u32; FEATURE_SIZE + 1],
    text: Option<String>,
}

/// sdhash backend: whole buffer only, at least [`MIN_INPUT_SIZE`] bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sdhash;

impl Backend for Sdhash {
    type State = Leased<SdhashState>;
    type Parsed = SdbfHash;

    fn algorithm(&self) -> Algorithm {
        Algorithm::StatisticalBloom
    }

    fn policy(&self) -> BackendPolicy {
        BackendPolicy {
            supports_update: false,
            min_input_size: Some(MIN_INPUT_SIZE),
            min_finalize_size: None,
            digest_is_destructive: false,
        }
    }

    fn create(&self) -> Result<Leased<SdhashState>> {
        let state = SdhashState {
            entropy: &runtime::tables().sdhash_entropy,
            text: None,
        };
        runtime::lease(Algorithm::StatisticalBloom, state)
    }

    fn update(&self, state: &mut Leased<SdhashState>, data: &[u8]) -> Result<()> {
        let state = state.get_mut();
        if state.text.is_some() {
            return Err(FuzzyHashError::backend(
                Algorithm::StatisticalBloom,
                "sdbf digests can only be fed once",
            ));
        }
        state.text = Some(SdbfHash::generate(data, state.entropy)?.to_text());
        Ok(())
    }

    fn digest(&self, state: &mut Leased<SdhashState>) -> Result<String> {
        state.get().text.clone().ok_or_else(|| {
            FuzzyHashError::backend(Algorithm::StatisticalBloom, "no data was fed")
        })
    }

    fn clone_state(&self, state: &Leased<SdhashState>) -> Result<Leased<SdhashState>> {
        runtime::lease(Algorithm::StatisticalBloom, state.get().clone())
    }

    fn release(&self, state: Leased<SdhashState>) {
        runtime::release(state);
    }

    fn parse(&self, text: &str) -> Result<SdbfHash> {
        SdbfHash::parse(text)
    }

    fn compare(&self, a: &str, b: &str) -> Result<u8> {
        let parsed_a = SdbfHash::parse(a)?;
        let parsed_b = SdbfHash::parse(b)?;
        if a == b {
            return Ok(100);
        }
        Ok(parsed_a.compare(&parsed_b))
    }
}
