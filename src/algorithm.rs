use crate::backend::{sdhash, ssdeep, tlsh};
use std::fmt;
use std::str::FromStr;

/// Fuzzy hash families supported by the crate.
///
/// The three families differ in how they accumulate input:
/// - `RollingContext` (ssdeep) is incremental and can be read at any time.
/// - `StatisticalBloom` (sdhash) needs the whole buffer at once.
/// - `StreamingFinalized` (tlsh) is incremental until it is finalized once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    RollingContext,
    StatisticalBloom,
    StreamingFinalized,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::RollingContext,
        Algorithm::StatisticalBloom,
        Algorithm::StreamingFinalized,
    ];

    /// Stable identifier of the algorithm.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::RollingContext => "ssdeep",
            Algorithm::StatisticalBloom => "sdhash",
            Algorithm::StreamingFinalized => "tlsh",
        }
    }

    /// Maximum length in bytes of the textual digest, where it is bounded.
    pub fn max_digest_size(self) -> Option<usize> {
        match self {
            Algorithm::RollingContext => Some(ssdeep::FUZZY_MAX_RESULT),
            Algorithm::StatisticalBloom => None,
            Algorithm::StreamingFinalized => Some(tlsh::HEX_DIGEST_LEN),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Algorithm::RollingContext => 0,
            Algorithm::StatisticalBloom => 1,
            Algorithm::StreamingFinalized => 2,
        }
    }

    /// Smallest buffer the algorithm accepts at construction.
    pub fn min_input_size(self) -> Option<usize> {
        match self {
            Algorithm::StatisticalBloom => Some(sdhash::MIN_INPUT_SIZE),
            Algorithm::RollingContext | Algorithm::StreamingFinalized => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fuzzy hash algorithm `{0}`")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownAlgorithm(name.to_string()))
    }
}
