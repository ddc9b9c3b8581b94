use crate::backend::{Backend, Sdhash, Ssdeep, Tlsh};
use crate::{comparator, Algorithm, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A finished digest as a plain value.
///
/// Unlike [`Digest`](crate::Digest) it owns no backend state, so it is cheap
/// to clone, can be shared between threads and used as a map key. Two
/// values are equal when they belong to the same algorithm and have the
/// same text; the input length is informational only.
#[derive(Debug, Clone)]
pub struct FuzzyHash {
    algorithm: Algorithm,
    text: Arc<str>,
    input_len: Option<u64>,
}

impl FuzzyHash {
    pub(crate) fn new(algorithm: Algorithm, text: String, input_len: Option<u64>) -> Self {
        FuzzyHash {
            algorithm,
            text: text.into(),
            input_len,
        }
    }

    /// Validates `text` as a digest of `algorithm`.
    ///
    /// # Errors
    ///
    /// * `MalformedHash` - `text` is not a well-formed digest.
    pub fn parse(algorithm: Algorithm, text: &str) -> Result<Self> {
        match algorithm {
            Algorithm::RollingContext => Ssdeep::default().parse(text).map(drop)?,
            Algorithm::StatisticalBloom => Sdhash.parse(text).map(drop)?,
            Algorithm::StreamingFinalized => Tlsh::default().parse(text).map(drop)?,
        }
        Ok(FuzzyHash::new(algorithm, text.to_string(), None))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of bytes that were hashed, unknown for parsed digests.
    pub fn input_len(&self) -> Option<u64> {
        self.input_len
    }

    /// Similarity to `other` in `[0, 100]`.
    pub fn compare(&self, other: &FuzzyHash) -> Result<u8> {
        comparator::compare_hashes(self, other)
    }
}

impl PartialEq for FuzzyHash {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.text == other.text
    }
}

impl Eq for FuzzyHash {}

impl Hash for FuzzyHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.algorithm.hash(state);
        self.text.hash(state);
    }
}

impl PartialEq<str> for FuzzyHash {
    fn eq(&self, other: &str) -> bool {
        &*self.text == other
    }
}

impl PartialEq<&str> for FuzzyHash {
    fn eq(&self, other: &&str) -> bool {
        &*self.text == *other
    }
}

impl AsRef<str> for FuzzyHash {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for FuzzyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
