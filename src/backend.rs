pub mod sdhash;
pub mod ssdeep;
pub mod tlsh;

use crate::{Algorithm, Result};
pub use sdhash::Sdhash;
pub use ssdeep::{DigestFlags, Ssdeep};
pub use tlsh::{Tlsh, TlshOptions};

/// Lifecycle rules a backend imposes on the digests built on top of it.
///
/// The digest state machine only ever reads these flags, it never asks
/// which algorithm it is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendPolicy {
    /// Whether more data may be fed after construction.
    pub supports_update: bool,
    /// Smallest buffer accepted when building a digest from data.
    pub min_input_size: Option<usize>,
    /// Smallest accumulated length that can be finalized.
    pub min_finalize_size: Option<usize>,
    /// Whether producing the digest consumes the accumulation state.
    pub digest_is_destructive: bool,
}

/// Adapter over one fuzzy hash algorithm.
///
/// A backend owns no per-digest data itself: every digest gets its own
/// `State` from [`Backend::create`] and hands it back through
/// [`Backend::release`] exactly once.
pub trait Backend: Send + Sync {
    /// Per-digest accumulation state.
    type State: Send;
    /// Validated, decoded form of a textual digest.
    type Parsed;

    fn algorithm(&self) -> Algorithm;

    fn policy(&self) -> BackendPolicy;

    /// Allocates fresh accumulation state.
    fn create(&self) -> Result<Self::State>;

    /// Feeds `data` into an open state.
    fn update(&self, state: &mut Self::State, data: &[u8]) -> Result<()>;

    /// Produces the textual digest of everything fed so far.
    ///
    /// Destructive backends (see [`BackendPolicy::digest_is_destructive`])
    /// may leave `state` unusable for further updates.
    fn digest(&self, state: &mut Self::State) -> Result<String>;

    /// Deep copy of the accumulation state.
    fn clone_state(&self, state: &Self::State) -> Result<Self::State>;

    /// Frees the state. Must not fail or panic.
    fn release(&self, state: Self::State);

    fn parse(&self, text: &str) -> Result<Self::Parsed>;

    /// Similarity of two textual digests in `[0, 100]`.
    fn compare(&self, a: &str, b: &str) -> Result<u8>;
}
