use crate::Algorithm;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, FuzzyHashError>;

/// Errors produced by digests, backends and the comparator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FuzzyHashError {
    /// The backend could not allocate state for a new digest.
    #[error("{algorithm}: could not allocate backend state: {reason}")]
    Allocation {
        algorithm: Algorithm,
        reason: String,
    },

    /// The input is shorter than the algorithm requires.
    ///
    /// Recoverable: feed more data, or pick another algorithm.
    #[error("{algorithm} requires at least {required_size} bytes, got {actual_size}")]
    InputTooSmall {
        algorithm: Algorithm,
        /// Bytes available at the time of the call.
        actual_size: u64,
        /// Minimum number of bytes the operation needs.
        required_size: usize,
    },

    #[error("{algorithm}: {operation}")]
    InvalidOperation {
        algorithm: Algorithm,
        operation: InvalidOperation,
    },

    #[error("malformed {algorithm} hash: {reason}")]
    MalformedHash {
        algorithm: Algorithm,
        reason: String,
    },

    #[error("cannot compare a {left} digest with a {right} digest")]
    AlgorithmMismatch { left: Algorithm, right: Algorithm },

    /// Opaque failure inside a backend, surfaced as-is.
    #[error("{algorithm} backend failure: {reason}")]
    Backend {
        algorithm: Algorithm,
        reason: String,
    },
}

/// Why an operation is not allowed on a digest in its current state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidOperation {
    #[error("algorithm does not support update")]
    UpdateUnsupported,

    #[error("cannot update a digest derived from a precomputed hash")]
    DerivedFromHash,

    #[error("cannot update a finalized digest")]
    AlreadyFinalized,
}

impl FuzzyHashError {
    pub(crate) fn malformed(algorithm: Algorithm, reason: impl Into<String>) -> Self {
        FuzzyHashError::MalformedHash {
            algorithm,
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(algorithm: Algorithm, reason: impl Into<String>) -> Self {
        FuzzyHashError::Backend {
            algorithm,
            reason: reason.into(),
        }
    }

    /// The algorithm the error was raised for, if it concerns a single one.
    pub fn algorithm(&self) -> Option<Algorithm> {
        match self {
            FuzzyHashError::Allocation { algorithm, .. }
            | FuzzyHashError::InputTooSmall { algorithm, .. }
            | FuzzyHashError::InvalidOperation { algorithm, .. }
            | FuzzyHashError::MalformedHash { algorithm, .. }
            | FuzzyHashError::Backend { algorithm, .. } => Some(*algorithm),
            FuzzyHashError::AlgorithmMismatch { .. } => None,
        }
    }
}
