//! Fuzzy hashing and similarity comparison.
//!
//! Three algorithm families sit behind one [`Backend`] contract:
//! - [`Ssdeep`]: context triggered piecewise hashing, incremental, any input size.
//! - [`Sdhash`]: Bloom filter similarity digests over whole buffers of at least 512 bytes.
//! - [`Tlsh`]: trend locality sensitive hashing, incremental until finalized once,
//!   which needs at least 256 bytes.
//!
//! A [`Digest`] drives any backend through the same lifecycle, the
//! [`comparator`] scores two digests of the same algorithm in `[0, 100]`,
//! and [`FuzzyHash`] is the finished digest as a plain value.
//!
//! # Example
//!
//! ```
//! use fuzzy_hashlib::{comparator, Algorithm, SsdeepDigest};
//!
//! let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();
//! let mut a = SsdeepDigest::from_buffer(&data).unwrap();
//! let mut b = SsdeepDigest::from_hash(&a.text().unwrap()).unwrap();
//! assert_eq!(comparator::compare(&mut a, &mut b).unwrap(), 100);
//!
//! let hash = fuzzy_hashlib::hash_buf(Algorithm::StreamingFinalized, &data).unwrap();
//! assert_eq!(hash.as_str().len(), 70);
//! ```

use rayon::prelude::*;

mod algorithm;
pub mod backend;
pub mod comparator;
mod digest;
mod error;
mod fuzzy_hash;
pub mod runtime;

pub use algorithm::{Algorithm, UnknownAlgorithm};
pub use backend::{
    sdhash, ssdeep, tlsh, Backend, BackendPolicy, DigestFlags, Sdhash, Ssdeep, Tlsh, TlshOptions,
};
pub use digest::Digest;
pub use error::{FuzzyHashError, InvalidOperation, Result};
pub use fuzzy_hash::FuzzyHash;

pub type SsdeepDigest = Digest<Ssdeep>;
pub type SdhashDigest = Digest<Sdhash>;
pub type TlshDigest = Digest<Tlsh>;

/// Hashes one buffer with a default-configured backend of `algorithm`.
///
/// # Errors
///
/// * `InputTooSmall` - `data` is too short for the algorithm.
/// * `Allocation` - The backend runtime has been torn down.
/// * `Backend` - The backend could not digest `data`.
pub fn hash_buf(algorithm: Algorithm, data: &[u8]) -> Result<FuzzyHash> {
    match algorithm {
        Algorithm::RollingContext => SsdeepDigest::from_buffer(data)?.fuzzy_hash(),
        Algorithm::StatisticalBloom => SdhashDigest::from_buffer(data)?.fuzzy_hash(),
        Algorithm::StreamingFinalized => TlshDigest::from_buffer(data)?.fuzzy_hash(),
    }
}

/// Hashes many buffers in parallel.
///
/// # Returns
///
/// One result per input, in input order. A failing input does not affect
/// the others.
pub fn hash_many<T>(algorithm: Algorithm, inputs: &[T]) -> Vec<Result<FuzzyHash>>
where
    T: AsRef<[u8]> + Sync,
{
    log::debug!("{algorithm}: hashing {} buffers", inputs.len());
    inputs
        .par_iter()
        .map(|data| hash_buf(algorithm, data.as_ref()))
        .collect()
}
