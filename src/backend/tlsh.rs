//! Trend locality sensitive hashing.
//!
//! Every 5-byte window increments six Pearson-hashed buckets. Finalizing
//! turns the first 128 bucket counts into 2-bit quartile codes and prefixes
//! them with a checksum, a log-scaled length and two quartile ratios. The
//! result prints as 70 upper-case hex digits.

use crate::backend::{Backend, BackendPolicy};
use crate::runtime::{self, Leased};
use crate::{Algorithm, FuzzyHashError, Result};
use std::cmp::min;
use std::fmt;

/// Length of the textual digest.
pub const HEX_DIGEST_LEN: usize = 2 * (3 + CODE_SIZE);
/// Minimum input length in the default mode.
pub const MIN_DATA_LENGTH: usize = 256;
/// Minimum input length when [`TlshOptions::force`] is set.
pub const MIN_FORCE_DATA_LENGTH: usize = 50;

const BUCKETS: usize = 256;
const EFF_BUCKETS: usize = 128;
const CODE_SIZE: usize = EFF_BUCKETS / 4;
const WINDOW_SIZE: usize = 5;

const PEARSON: [u8; 256] = [
    1, 87, 49, 12, 176, 178, 102, 166, 121, 193, 6, 84, 249, 230, 44, 163, 14, 197, 213, 181, 161,
    85, 218, 80, 64, 239, 24, 226, 236, 142, 38, 200, 110, 177, 104, 103, 141, 253, 255, 50, 77,
    101, 81, 18, 45, 96, 31, 222, 25, 107, 190, 70, 86, 237, 240, 34, 72, 242, 20, 214, 244, 227,
    149, 235, 97, 234, 57, 22, 60, 250, 82, 175, 208, 5, 127, 199, 111, 62, 135, 248, 174, 169,
    211, 58, 66, 154, 106, 195, 245, 171, 17, 187, 182, 179, 0, 243, 132, 56, 148, 75, 128, 133,
    158, 100, 130, 126, 91, 13, 153, 246, 216, 219, 119, 68, 223, 78, 83, 88, 201, 99, 122, 11, 92,
    32, 136, 114, 52, 10, 138, 30, 48, 183, 156, 35, 61, 26, 143, 74, 251, 94, 129, 162, 63, 152,
    170, 7, 115, 167, 241, 206, 3, 150, 55, 59, 151, 220, 90, 53, 23, 131, 125, 173, 15, 238, 79,
    95, 89, 16, 105, 137, 225, 224, 217, 160, 37, 123, 118, 73, 2, 157, 46, 116, 9, 145, 134, 228,
    207, 212, 202, 215, 69, 229, 27, 188, 67, 124, 168, 252, 42, 4, 29, 108, 21, 247, 19, 205, 39,
    203, 233, 40, 186, 147, 198, 192, 155, 33, 164, 191, 98, 204, 165, 180, 117, 76, 140, 36, 210,
    172, 41, 54, 159, 8, 185, 232, 113, 196, 231, 47, 146, 120, 51, 65, 28, 144, 254, 221, 93, 189,
    194, 139, 112, 43, 71, 109, 184, 209,
];

fn b_mapping(salt: u8, i: u8, j: u8, k: u8) -> u8 {
    let mut h = PEARSON[salt as usize];
    h = PEARSON[(h ^ i) as usize];
    h = PEARSON[(h ^ j) as usize];
    PEARSON[(h ^ k) as usize]
}

/// Log-scaled input length, one byte.
fn l_capturing(len: u64) -> u8 {
    let len = len as f64;
    let value = if len <= 656.0 {
        (len.ln() / 1.5f64.ln()).floor()
    } else if len <= 3199.0 {
        (len.ln() / 1.3f64.ln() - 8.72777).floor()
    } else {
        (len.ln() / 1.1f64.ln() - 62.5472).floor()
    };
    (value as i64 & 0xFF) as u8
}

fn swap_nibbles(byte: u8) -> u8 {
    byte.rotate_left(4)
}

/// Distance between `x` and `y` on a ring of size `ring`.
fn mod_diff(x: u32, y: u32, ring: u32) -> u32 {
    let (dl, dr) = if y > x {
        (y - x, x + ring - y)
    } else {
        (x - y, y + ring - x)
    };
    min(dl, dr)
}

/// Distance between two quartile code bodies, 2 bits per bucket.
fn h_distance(a: &[u8; CODE_SIZE], b: &[u8; CODE_SIZE]) -> u32 {
    let mut diff = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        for shift in [0, 2, 4, 6] {
            let d = ((x >> shift) & 3).abs_diff((y >> shift) & 3) as u32;
            diff += if d == 3 { 6 } else { d };
        }
    }
    diff
}

/// Optional relaxations of the default TLSH rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlshOptions {
    /// Accept inputs from 50 bytes instead of 256.
    pub force: bool,
}

/// Accumulation state of one TLSH digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlshState {
    buckets: [u32; BUCKETS],
    checksum: u8,
    window: [u8; WINDOW_SIZE],
    data_len: u64,
    sealed: bool,
}

impl Default for TlshState {
    fn default() -> Self {
        Self::new()
    }
}

impl TlshState {
    pub fn new() -> Self {
        TlshState {
            buckets: [0; BUCKETS],
            checksum: 0,
            window: [0; WINDOW_SIZE],
            data_len: 0,
            sealed: false,
        }
    }

    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.sealed {
            return Err(FuzzyHashError::backend(
                Algorithm::StreamingFinalized,
                "state was already finalized",
            ));
        }
        let mut j = (self.data_len % WINDOW_SIZE as u64) as usize;
        let mut fed = self.data_len;
        for &byte in data {
            self.window[j] = byte;
            if fed >= WINDOW_SIZE as u64 - 1 {
                let w = self.window;
                let j1 = (j + 4) % WINDOW_SIZE;
                let j2 = (j + 3) % WINDOW_SIZE;
                let j3 = (j + 2) % WINDOW_SIZE;
                let j4 = (j + 1) % WINDOW_SIZE;
                self.checksum = b_mapping(0, w[j], w[j1], self.checksum);
                for (salt, a, b) in [
                    (2, j1, j2),
                    (3, j1, j3),
                    (5, j2, j3),
                    (7, j2, j4),
                    (11, j1, j4),
                    (13, j3, j4),
                ] {
                    self.buckets[b_mapping(salt, w[j], w[a], w[b]) as usize] += 1;
                }
            }
            fed += 1;
            j = (j + 1) % WINDOW_SIZE;
        }
        self.data_len += data.len() as u64;
        Ok(())
    }

    /// Seals the state and builds the digest. Can only succeed once.
    pub fn finalize(&mut self, min_len: usize) -> Result<TlshHash> {
        if self.sealed {
            return Err(FuzzyHashError::backend(
                Algorithm::StreamingFinalized,
                "state was already finalized",
            ));
        }
        if self.data_len < min_len as u64 {
            return Err(FuzzyHashError::InputTooSmall {
                algorithm: Algorithm::StreamingFinalized,
                actual_size: self.data_len,
                required_size: min_len,
            });
        }

        let mut sorted = self.buckets[..EFF_BUCKETS].to_vec();
        sorted.sort_unstable();
        let q1 = sorted[EFF_BUCKETS / 4 - 1];
        let q2 = sorted[EFF_BUCKETS / 2 - 1];
        let q3 = sorted[EFF_BUCKETS - EFF_BUCKETS / 4 - 1];

        let nonzero = self.buckets[..EFF_BUCKETS]
            .iter()
            .filter(|&&count| count > 0)
            .count();
        if q3 == 0 || nonzero <= 4 * CODE_SIZE / 2 {
            return Err(FuzzyHashError::backend(
                Algorithm::StreamingFinalized,
                format!("input lacks variation ({nonzero} of {EFF_BUCKETS} buckets used)"),
            ));
        }

        let mut code = [0u8; CODE_SIZE];
        for (i, slot) in code.iter_mut().enumerate() {
            let mut h = 0u8;
            for j in 0..4 {
                let k = self.buckets[4 * i + j];
                if q3 < k {
                    h += 3 << (j * 2);
                } else if q2 < k {
                    h += 2 << (j * 2);
                } else if q1 < k {
                    h += 1 << (j * 2);
                }
            }
            *slot = h;
        }

        self.sealed = true;
        Ok(TlshHash {
            checksum: self.checksum,
            lvalue: l_capturing(self.data_len),
            q1_ratio: ((q1 as u64 * 100 / q3 as u64) % 16) as u8,
            q2_ratio: ((q2 as u64 * 100 / q3 as u64) % 16) as u8,
            code,
        })
    }
}

/// A decoded TLSH digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlshHash {
    pub checksum: u8,
    pub lvalue: u8,
    pub q1_ratio: u8,
    pub q2_ratio: u8,
    /// Quartile codes, bucket 0 in the low bits of `code[0]`.
    pub code: [u8; CODE_SIZE],
}

impl TlshHash {
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |reason: String| FuzzyHashError::malformed(Algorithm::StreamingFinalized, reason);
        if text.len() != HEX_DIGEST_LEN {
            return Err(malformed(format!(
                "expected {HEX_DIGEST_LEN} hex digits, got {}",
                text.len()
            )));
        }
        if let Some(c) = text.chars().find(|c| !matches!(c, '0'..='9' | 'A'..='F')) {
            return Err(malformed(format!("{c:?} is not an uppercase hex digit")));
        }
        let bytes = hex::decode(text).map_err(|e| malformed(e.to_string()))?;
        let q_byte = swap_nibbles(bytes[2]);
        let mut code = [0u8; CODE_SIZE];
        for (i, slot) in code.iter_mut().enumerate() {
            *slot = bytes[3 + CODE_SIZE - 1 - i];
        }
        Ok(TlshHash {
            checksum: swap_nibbles(bytes[0]),
            lvalue: swap_nibbles(bytes[1]),
            q1_ratio: q_byte & 0x0F,
            q2_ratio: q_byte >> 4,
            code,
        })
    }

    /// Distance between two digests; 0 for identical digests, unbounded above.
    pub fn diff(&self, other: &TlshHash, len_diff: bool) -> u32 {
        let mut diff = 0;
        if len_diff {
            let ldiff = mod_diff(self.lvalue as u32, other.lvalue as u32, 256);
            diff += match ldiff {
                0 => 0,
                1 => 1,
                _ => ldiff * 12,
            };
        }
        for (a, b) in [
            (self.q1_ratio, other.q1_ratio),
            (self.q2_ratio, other.q2_ratio),
        ] {
            let qdiff = mod_diff(a as u32, b as u32, 16);
            diff += if qdiff <= 1 { qdiff } else { (qdiff - 1) * 12 };
        }
        if self.checksum != other.checksum {
            diff += 1;
        }
        diff + h_distance(&self.code, &other.code)
    }
}

impl fmt::Display for TlshHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = Vec::with_capacity(HEX_DIGEST_LEN / 2);
        bytes.push(swap_nibbles(self.checksum));
        bytes.push(swap_nibbles(self.lvalue));
        bytes.push((self.q1_ratio << 4) | self.q2_ratio);
        bytes.extend(self.code.iter().rev());
        f.write_str(&hex::encode_upper(bytes))
    }
}

/// Length-aware distance between two textual digests.
pub fn diff(a: &str, b: &str) -> Result<u32> {
    Ok(TlshHash::parse(a)?.diff(&TlshHash::parse(b)?, true))
}

/// Distance between two textual digests, ignoring the length byte.
pub fn diff_ignoring_length(a: &str, b: &str) -> Result<u32> {
    Ok(TlshHash::parse(a)?.diff(&TlshHash::parse(b)?, false))
}

/// TLSH backend: incremental until an explicit, one-shot finalize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tlsh {
    options: TlshOptions,
}

impl Tlsh {
    pub fn new(options: TlshOptions) -> Self {
        Tlsh { options }
    }

    /// Shortest input that can be finalized.
    pub fn min_length(&self) -> usize {
        if self.options.force {
            MIN_FORCE_DATA_LENGTH
        } else {
            MIN_DATA_LENGTH
        }
    }
}

impl Backend for Tlsh {
    type State = Leased<TlshState>;
    type Parsed = TlshHash;

    fn algorithm(&self) -> Algorithm {
        Algorithm::StreamingFinalized
    }

    fn policy(&self) -> BackendPolicy {
        BackendPolicy {
            supports_update: true,
            min_input_size: None,
            min_finalize_size: Some(self.min_length()),
            digest_is_destructive: true,
        }
    }

    fn create(&self) -> Result<Leased<TlshState>> {
        runtime::lease(Algorithm::StreamingFinalized, TlshState::new())
    }

    fn update(&self, state: &mut Leased<TlshState>, data: &[u8]) -> Result<()> {
        state.get_mut().update(data)
    }

    fn digest(&self, state: &mut Leased<TlshState>) -> Result<String> {
        Ok(state.get_mut().finalize(self.min_length())?.to_string())
    }

    fn clone_state(&self, state: &Leased<TlshState>) -> Result<Leased<TlshState>> {
        runtime::lease(Algorithm::StreamingFinalized, state.get().clone())
    }

    fn release(&self, state: Leased<TlshState>) {
        runtime::release(state);
    }

    fn parse(&self, text: &str) -> Result<TlshHash> {
        TlshHash::parse(text)
    }

    fn compare(&self, a: &str, b: &str) -> Result<u8> {
        let distance = diff(a, b)?;
        Ok(100 - min(distance, 100) as u8)
    }
}
