//! Process-wide backend state.
//!
//! Backends share lookup tables that are built once, lazily, the first time
//! any digest is created (or when [`init`] is called explicitly). The
//! runtime also keeps a count of live backend states per algorithm and a
//! teardown flag: after [`teardown`], new states cannot be allocated and
//! releasing one allocated before it is a silent no-op, also after the
//! runtime is re-armed with [`init`].

use crate::backend::sdhash;
use crate::{Algorithm, FuzzyHashError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Lookup tables shared by all backend states.
pub(crate) struct Tables {
    /// Scaled per-count entropy terms of a 64-byte window.
    pub(crate) sdhash_entropy: [u32; sdhash::FEATURE_SIZE + 1],
}

static TABLES: OnceLock<Tables> = OnceLock::new();
static TORN_DOWN: AtomicBool = AtomicBool::new(false);
/// Bumped by every teardown; leases from older generations are stale.
static GENERATION: AtomicU64 = AtomicU64::new(0);
static LIVE_HANDLES: [AtomicUsize; 3] = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];

pub(crate) fn tables() -> &'static Tables {
    TABLES.get_or_init(|| {
        log::debug!("building backend lookup tables");
        Tables {
            sdhash_entropy: sdhash::entropy_table(),
        }
    })
}

/// Loads the backend runtime. Idempotent, and re-arms it after [`teardown`].
pub fn init() {
    tables();
    if TORN_DOWN.swap(false, Ordering::SeqCst) {
        log::debug!("backend runtime re-initialised after teardown");
    }
}

/// Unloads the backend runtime. Idempotent.
///
/// Live handle accounting is discarded: states allocated before the
/// teardown are ignored when released, even after a later [`init`].
pub fn teardown() {
    if !TORN_DOWN.swap(true, Ordering::SeqCst) {
        GENERATION.fetch_add(1, Ordering::SeqCst);
        for counter in &LIVE_HANDLES {
            counter.store(0, Ordering::SeqCst);
        }
        log::debug!("backend runtime torn down");
    }
}

/// Whether backend states can currently be allocated.
pub fn is_loaded() -> bool {
    !TORN_DOWN.load(Ordering::SeqCst)
}

/// Number of backend states of `algorithm` that have not been released yet.
pub fn live_handles(algorithm: Algorithm) -> usize {
    LIVE_HANDLES[algorithm.index()].load(Ordering::SeqCst)
}

/// A backend state registered with the runtime.
///
/// Released back to the runtime exactly once, by the owning backend.
#[derive(Debug)]
pub struct Leased<S> {
    inner: S,
    algorithm: Algorithm,
    generation: u64,
}

impl<S> Leased<S> {
    pub fn get(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

/// Registers a new backend state.
pub(crate) fn lease<S>(algorithm: Algorithm, inner: S) -> Result<Leased<S>> {
    let generation = GENERATION.load(Ordering::SeqCst);
    if TORN_DOWN.load(Ordering::SeqCst) {
        return Err(FuzzyHashError::Allocation {
            algorithm,
            reason: "backend runtime has been torn down".to_string(),
        });
    }
    tables();
    LIVE_HANDLES[algorithm.index()].fetch_add(1, Ordering::SeqCst);
    log::trace!("{algorithm}: backend state allocated");
    Ok(Leased {
        inner,
        algorithm,
        generation,
    })
}

/// Unregisters a backend state. Never fails.
pub(crate) fn release<S>(leased: Leased<S>) {
    let Leased {
        inner,
        algorithm,
        generation,
    } = leased;
    drop(inner);
    if generation != GENERATION.load(Ordering::SeqCst) || TORN_DOWN.load(Ordering::SeqCst) {
        log::debug!("{algorithm}: backend state from before teardown released, ignoring");
        return;
    }
    let released = LIVE_HANDLES[algorithm.index()].fetch_update(
        Ordering::SeqCst,
        Ordering::SeqCst,
        |live| live.checked_sub(1),
    );
    match released {
        Ok(_) => log::trace!("{algorithm}: backend state released"),
        Err(_) => log::warn!("{algorithm}: released more backend states than were allocated"),
    }
}
