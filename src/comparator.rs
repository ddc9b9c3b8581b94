//! Similarity scoring between digests of the same algorithm.

use crate::backend::{Backend, Sdhash, Ssdeep, Tlsh};
use crate::{Algorithm, Digest, FuzzyHash, FuzzyHashError, Result};

fn check_same_algorithm(left: Algorithm, right: Algorithm) -> Result<()> {
    if left != right {
        return Err(FuzzyHashError::AlgorithmMismatch { left, right });
    }
    Ok(())
}

/// Scores two valid texts with `compare`, which must be the backend's.
///
/// Operands are passed to the backend in a fixed order so the result does
/// not depend on argument order.
fn score(
    algorithm: Algorithm,
    a: &str,
    b: &str,
    compare: impl FnOnce(&str, &str) -> Result<u8>,
) -> Result<u8> {
    if a == b {
        return Ok(100);
    }
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let score = compare(first, second)?;
    if score > 100 {
        log::error!("{algorithm}: backend reported similarity {score}");
        return Err(FuzzyHashError::backend(
            algorithm,
            format!("similarity {score} is out of range"),
        ));
    }
    log::trace!("{algorithm}: similarity {score}");
    Ok(score)
}

/// Similarity of two digests in `[0, 100]`.
///
/// Open digests are finalized first. Identical digests score 100 and the
/// score does not depend on argument order.
///
/// # Errors
///
/// * `AlgorithmMismatch` - The digests were computed by different algorithms.
/// * `InputTooSmall` - An open digest cannot be finalized yet.
/// * `Backend` - The backend failed to score the digests.
pub fn compare<A: Backend, B: Backend>(a: &mut Digest<A>, b: &mut Digest<B>) -> Result<u8> {
    let algorithm = a.algorithm();
    check_same_algorithm(algorithm, b.algorithm())?;
    a.finalize()?;
    b.finalize()?;
    let text_a = a.text()?;
    let text_b = b.text()?;
    score(algorithm, &text_a, &text_b, |x, y| a.backend().compare(x, y))
}

/// Similarity of two digest values in `[0, 100]`.
///
/// # Errors
///
/// * `AlgorithmMismatch` - The digests were computed by different algorithms.
pub fn compare_hashes(a: &FuzzyHash, b: &FuzzyHash) -> Result<u8> {
    let algorithm = a.algorithm();
    check_same_algorithm(algorithm, b.algorithm())?;
    score(algorithm, a.as_str(), b.as_str(), |x, y| match algorithm {
        Algorithm::RollingContext => Ssdeep::default().compare(x, y),
        Algorithm::StatisticalBloom => Sdhash.compare(x, y),
        Algorithm::StreamingFinalized => Tlsh::default().compare(x, y),
    })
}

/// Textual equality of two digests. Never the same as a score of 100.
///
/// Open digests are read the way [`Digest::text`] reads them.
pub fn text_eq<A: Backend, B: Backend>(a: &mut Digest<A>, b: &mut Digest<B>) -> Result<bool> {
    Ok(a.algorithm() == b.algorithm() && a.text()? == b.text()?)
}
