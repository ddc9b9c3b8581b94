use crate::backend::Backend;
use crate::error::InvalidOperation;
use crate::{Algorithm, FuzzyHash, FuzzyHashError, Result};
use std::fmt;

/// How a digest came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Built by feeding data into a backend state.
    Buffer,
    /// Parsed from a precomputed hash string.
    Hash,
}

/// Lifecycle of a digest.
///
/// # There are two variants:
/// - `Open`: the digest owns a live backend state and may accept more data.
/// - `Finalized`: the backend state is gone and the text is cached for good.
enum Lifecycle<S> {
    Open(S),
    Finalized { text: String, origin: Origin },
}

/// A fuzzy hash digest, generic over the algorithm backend that computes it.
///
/// A digest is created either from a buffer, in which case it owns a live
/// backend state, or from a precomputed hash string, in which case it is
/// immutable from the start. The lifecycle rules (whether more data may be
/// fed, how much data is needed, whether reading the text consumes the
/// state) come from the backend's [`BackendPolicy`](crate::BackendPolicy);
/// the digest itself never asks which algorithm it drives.
///
/// Dropping a digest releases its backend state exactly once.
///
/// # Type Parameters
///
/// * `B` - The backend implementing the `Backend` trait.
///
/// # Example
///
/// ```
/// use fuzzy_hashlib::SsdeepDigest;
///
/// let mut digest = SsdeepDigest::from_buffer(b"hello").unwrap();
/// digest.update(b", world").unwrap();
/// assert!(digest.text().unwrap().starts_with("3:"));
/// assert_eq!(digest.accumulated_length(), 12);
/// ```
pub struct Digest<B: Backend> {
    backend: B,
    lifecycle: Lifecycle<B::State>,
    accumulated_length: u64,
}

impl<B: Backend + Default> Digest<B> {
    /// Hashes `data` with a default-configured backend.
    ///
    /// See [`Digest::from_buffer_with`].
    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        Self::from_buffer_with(B::default(), data)
    }

    /// Wraps a precomputed hash string for a default-configured backend.
    ///
    /// See [`Digest::from_hash_with`].
    pub fn from_hash(text: &str) -> Result<Self> {
        Self::from_hash_with(B::default(), text)
    }
}

impl<B: Backend> Digest<B> {
    /// Creates a digest by feeding `data` into a fresh backend state.
    ///
    /// # Arguments
    ///
    /// * `backend` - The configured backend computing the digest.
    /// * `data` - The initial input.
    ///
    /// # Returns
    ///
    /// An open digest, or a finalized one if the backend does not support
    /// incremental updates.
    ///
    /// # Errors
    ///
    /// * `InputTooSmall` - `data` is shorter than the backend's minimum
    ///   input size. No backend state is allocated in that case.
    /// * `Allocation` - The backend could not allocate state.
    /// * `Backend` - The backend failed while digesting `data`.
    pub fn from_buffer_with(backend: B, data: &[u8]) -> Result<Self> {
        let algorithm = backend.algorithm();
        let policy = backend.policy();
        if let Some(required_size) = policy.min_input_size {
            if data.len() < required_size {
                return Err(FuzzyHashError::InputTooSmall {
                    algorithm,
                    actual_size: data.len() as u64,
                    required_size,
                });
            }
        }

        let state = backend.create()?;
        let mut digest = Digest {
            backend,
            lifecycle: Lifecycle::Open(state),
            accumulated_length: 0,
        };
        digest.feed(data)?;
        if !policy.supports_update {
            digest.finalize()?;
        }
        log::debug!("{algorithm}: digest created from {} bytes", data.len());
        Ok(digest)
    }

    /// Creates an immutable digest from a precomputed hash string.
    ///
    /// # Errors
    ///
    /// * `MalformedHash` - The backend does not accept `text` as a digest.
    pub fn from_hash_with(backend: B, text: &str) -> Result<Self> {
        backend.parse(text)?;
        Ok(Digest {
            backend,
            lifecycle: Lifecycle::Finalized {
                text: text.to_string(),
                origin: Origin::Hash,
            },
            accumulated_length: 0,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.backend.algorithm()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of bytes fed so far; 0 for digests parsed from text.
    pub fn accumulated_length(&self) -> u64 {
        self.accumulated_length
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Finalized { .. })
    }

    /// Whether the digest was parsed from a hash string.
    pub fn is_from_hash(&self) -> bool {
        matches!(
            self.lifecycle,
            Lifecycle::Finalized {
                origin: Origin::Hash,
                ..
            }
        )
    }

    /// Whether [`Digest::update`] would currently accept data.
    pub fn is_updatable(&self) -> bool {
        self.backend.policy().supports_update && !self.is_finalized()
    }

    /// Feeds more data into an open digest.
    ///
    /// # Errors
    ///
    /// * `InvalidOperation` - The backend does not support updates, the
    ///   digest was parsed from a hash string, or it is already finalized.
    /// * `Backend` - The backend failed while consuming `data`.
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        let operation = if !self.backend.policy().supports_update {
            InvalidOperation::UpdateUnsupported
        } else if self.is_from_hash() {
            InvalidOperation::DerivedFromHash
        } else if self.is_finalized() {
            InvalidOperation::AlreadyFinalized
        } else {
            return self.feed(data);
        };
        Err(FuzzyHashError::InvalidOperation {
            algorithm: self.algorithm(),
            operation,
        })
    }

    fn feed(&mut self, data: &[u8]) -> Result<()> {
        if let Lifecycle::Open(state) = &mut self.lifecycle {
            self.backend.update(state, data)?;
            self.accumulated_length += data.len() as u64;
        }
        Ok(())
    }

    /// Produces the final text and releases the backend state.
    ///
    /// Does nothing on a finalized digest.
    ///
    /// # Errors
    ///
    /// * `InputTooSmall` - Less data was fed than the backend needs to
    ///   finalize. The digest stays open, so more data can be fed and
    ///   finalization retried.
    /// * `Backend` - The backend could not produce a digest.
    pub fn finalize(&mut self) -> Result<()> {
        let Lifecycle::Open(state) = &mut self.lifecycle else {
            return Ok(());
        };
        if let Some(required_size) = self.backend.policy().min_finalize_size {
            if self.accumulated_length < required_size as u64 {
                return Err(FuzzyHashError::InputTooSmall {
                    algorithm: self.backend.algorithm(),
                    actual_size: self.accumulated_length,
                    required_size,
                });
            }
        }
        let text = self.backend.digest(state)?;
        self.seal(text);
        log::trace!("{}: digest finalized", self.algorithm());
        Ok(())
    }

    fn seal(&mut self, text: String) {
        let finalized = Lifecycle::Finalized {
            text,
            origin: Origin::Buffer,
        };
        if let Lifecycle::Open(state) = std::mem::replace(&mut self.lifecycle, finalized) {
            self.backend.release(state);
        }
    }

    /// Returns the textual digest.
    ///
    /// Open digests of backends that read non-destructively report the
    /// digest of everything fed so far and stay open. Other open digests are
    /// finalized first.
    ///
    /// # Errors
    ///
    /// Same as [`Digest::finalize`] when finalization is needed.
    pub fn text(&mut self) -> Result<String> {
        if let Lifecycle::Open(state) = &mut self.lifecycle {
            if !self.backend.policy().digest_is_destructive {
                return self.backend.digest(state);
            }
        }
        self.finalize()?;
        match &self.lifecycle {
            Lifecycle::Finalized { text, .. } => Ok(text.clone()),
            Lifecycle::Open(_) => Err(FuzzyHashError::backend(
                self.algorithm(),
                "digest is still open after finalization",
            )),
        }
    }

    /// Snapshot of the digest as a value.
    pub fn fuzzy_hash(&mut self) -> Result<FuzzyHash> {
        let text = self.text()?;
        let input_len = (!self.is_from_hash()).then_some(self.accumulated_length);
        Ok(FuzzyHash::new(self.algorithm(), text, input_len))
    }

    /// Creates an independent digest with the same observable state.
    ///
    /// An open digest gets a deep copy of its backend state and stays
    /// updatable; a finalized digest only shares its text.
    ///
    /// # Errors
    ///
    /// * `Allocation` - The backend could not allocate the copied state.
    pub fn copy(&self) -> Result<Self>
    where
        B: Clone,
    {
        let lifecycle = match &self.lifecycle {
            Lifecycle::Open(state) => Lifecycle::Open(self.backend.clone_state(state)?),
            Lifecycle::Finalized { text, origin } => Lifecycle::Finalized {
                text: text.clone(),
                origin: *origin,
            },
        };
        Ok(Digest {
            backend: self.backend.clone(),
            lifecycle,
            accumulated_length: self.accumulated_length,
        })
    }
}

impl<B: Backend> Drop for Digest<B> {
    fn drop(&mut self) {
        let finalized = Lifecycle::Finalized {
            text: String::new(),
            origin: Origin::Buffer,
        };
        if let Lifecycle::Open(state) = std::mem::replace(&mut self.lifecycle, finalized) {
            self.backend.release(state);
        }
    }
}

impl<B: Backend> fmt::Debug for Digest<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Digest");
        debug
            .field("algorithm", &self.algorithm())
            .field("accumulated_length", &self.accumulated_length);
        match &self.lifecycle {
            Lifecycle::Open(_) => debug.field("state", &"open"),
            Lifecycle::Finalized { text, origin } => debug
                .field("state", &"finalized")
                .field("origin", origin)
                .field("text", text),
        };
        debug.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{Sdhash, Ssdeep, Tlsh, TlshOptions};

    fn random_data(len: usize) -> Vec<u8> {
        (0..len).map(|_| rand::random::<u8>()).collect()
    }

    #[test]
    fn test_ssdeep_reads_without_finalizing() {
        let data = random_data(20_000);
        let mut digest = Digest::<Ssdeep>::from_buffer(&data[..10_000]).unwrap();
        let early = digest.text().unwrap();
        assert!(!digest.is_finalized());
        assert_eq!(digest.text().unwrap(), early);

        digest.update(&data[10_000..]).unwrap();
        assert_eq!(digest.accumulated_length(), 20_000);
        let whole = Digest::<Ssdeep>::from_buffer(&data).unwrap().text().unwrap();
        assert_eq!(digest.text().unwrap(), whole);
    }

    #[test]
    fn test_finalize_blocks_updates() {
        let mut digest = Digest::<Ssdeep>::from_buffer(b"some data").unwrap();
        digest.finalize().unwrap();
        digest.finalize().unwrap();
        assert!(digest.is_finalized());
        assert!(!digest.is_updatable());
        assert_eq!(
            digest.update(b"more"),
            Err(FuzzyHashError::InvalidOperation {
                algorithm: Algorithm::RollingContext,
                operation: InvalidOperation::AlreadyFinalized,
            })
        );
    }

    #[test]
    fn test_sdhash_is_finalized_at_construction() {
        let mut digest = Digest::<Sdhash>::from_buffer(&random_data(4096)).unwrap();
        assert!(digest.is_finalized());
        assert_eq!(digest.accumulated_length(), 4096);
        let text = digest.text().unwrap();
        assert_eq!(digest.text().unwrap(), text);
        assert_eq!(
            digest.update(b"more"),
            Err(FuzzyHashError::InvalidOperation {
                algorithm: Algorithm::StatisticalBloom,
                operation: InvalidOperation::UpdateUnsupported,
            })
        );
    }

    #[test]
    fn test_sdhash_minimum_is_checked_before_allocation() {
        assert_eq!(
            Digest::<Sdhash>::from_buffer(b"short").unwrap_err(),
            FuzzyHashError::InputTooSmall {
                algorithm: Algorithm::StatisticalBloom,
                actual_size: 5,
                required_size: 512,
            }
        );
    }

    #[test]
    fn test_tlsh_stays_open_until_enough_data() {
        let data = random_data(1000);
        let mut digest = Digest::<Tlsh>::from_buffer(&data[..100]).unwrap();
        assert!(matches!(
            digest.text(),
            Err(FuzzyHashError::InputTooSmall {
                required_size: 256,
                ..
            })
        ));
        assert!(!digest.is_finalized());

        digest.update(&data[100..]).unwrap();
        let text = digest.text().unwrap();
        assert!(digest.is_finalized());
        assert_eq!(digest.text().unwrap(), text);
        assert_eq!(Digest::<Tlsh>::from_buffer(&data).unwrap().text().unwrap(), text);
    }

    #[test]
    fn test_tlsh_force_mode() {
        let data = random_data(100);
        let mut forced = Digest::from_buffer_with(Tlsh::new(TlshOptions { force: true }), &data).unwrap();
        assert_eq!(forced.text().unwrap().len(), 70);
    }

    #[test]
    fn test_hash_derived_digest_is_immutable() {
        let text = Digest::<Ssdeep>::from_buffer(&random_data(5000)).unwrap().text().unwrap();
        let mut parsed = Digest::<Ssdeep>::from_hash(&text).unwrap();
        assert!(parsed.is_from_hash());
        assert_eq!(parsed.accumulated_length(), 0);
        assert_eq!(parsed.text().unwrap(), text);
        assert_eq!(
            parsed.update(b"more"),
            Err(FuzzyHashError::InvalidOperation {
                algorithm: Algorithm::RollingContext,
                operation: InvalidOperation::DerivedFromHash,
            })
        );
        assert_eq!(parsed.fuzzy_hash().unwrap().input_len(), None);
    }

    #[test]
    fn test_from_hash_rejects_malformed_text() {
        assert!(matches!(
            Digest::<Tlsh>::from_hash("not a digest"),
            Err(FuzzyHashError::MalformedHash {
                algorithm: Algorithm::StreamingFinalized,
                ..
            })
        ));
    }

    #[test]
    fn test_copy_of_open_digest_is_independent() {
        let data = random_data(3000);
        let mut original = Digest::<Tlsh>::from_buffer(&data[..1000]).unwrap();
        let mut copy = original.copy().unwrap();
        assert!(!copy.is_finalized());
        copy.update(&data[1000..]).unwrap();

        assert_eq!(original.accumulated_length(), 1000);
        assert_eq!(copy.accumulated_length(), 3000);
        assert_ne!(original.text().unwrap(), copy.text().unwrap());
        assert_eq!(
            copy.text().unwrap(),
            Digest::<Tlsh>::from_buffer(&data).unwrap().text().unwrap()
        );
    }

    #[test]
    fn test_copy_of_finalized_digest() {
        let mut original = Digest::<Ssdeep>::from_buffer(&random_data(5000)).unwrap();
        original.finalize().unwrap();
        let mut copy = original.copy().unwrap();
        assert!(copy.is_finalized());
        assert_eq!(copy.text().unwrap(), original.text().unwrap());
        assert!(copy.update(b"more").is_err());
    }

    #[test]
    fn test_fuzzy_hash_snapshot() {
        let mut digest = Digest::<Ssdeep>::from_buffer(b"").unwrap();
        let hash = digest.fuzzy_hash().unwrap();
        assert_eq!(hash.algorithm(), Algorithm::RollingContext);
        assert_eq!(hash.as_str(), "3::");
        assert_eq!(hash.input_len(), Some(0));
    }
}
