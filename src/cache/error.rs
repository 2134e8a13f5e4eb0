//! Errors delivered to callers of [`ExpiringCache::get_or_load`](super::ExpiringCache::get_or_load).

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The outcome of a failed load episode.
///
/// A single `LoadError` is produced per episode and cloned out to every caller
/// that was waiting on it, which is why the upstream error sits behind an
/// [`Arc`]. The error kind is never rewritten on the way out: a negatively
/// cached failure is returned exactly as it was first observed.
#[derive(Debug)]
pub enum LoadError<E> {
    /// The fetch completed and reported an error.
    UpstreamFailure(Arc<E>),

    /// The fetch did not complete within the configured `load_timeout`.
    UpstreamTimeout(Duration),

    /// The fetch task ended without producing an outcome (it panicked or the
    /// runtime shut down underneath it).
    Abandoned,
}

impl<E> LoadError<E> {
    /// Returns the upstream error if this is an [`UpstreamFailure`](Self::UpstreamFailure).
    pub fn upstream(&self) -> Option<&E> {
        match self {
            Self::UpstreamFailure(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the fetch ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::UpstreamTimeout(_))
    }
}

impl<E> Clone for LoadError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::UpstreamFailure(error) => Self::UpstreamFailure(Arc::clone(error)),
            Self::UpstreamTimeout(timeout) => Self::UpstreamTimeout(*timeout),
            Self::Abandoned => Self::Abandoned,
        }
    }
}

impl<E: fmt::Display> fmt::Display for LoadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailure(error) => write!(f, "upstream failure: {error}"),
            Self::UpstreamTimeout(timeout) => {
                write!(f, "upstream did not respond within {timeout:?}")
            }
            Self::Abandoned => write!(f, "load task ended without a result"),
        }
    }
}

impl<E: Error + 'static> Error for LoadError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UpstreamFailure(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// Raised internally when no entry can be evicted because every entry is
/// still loading. The cache tolerates the overflow and never surfaces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cache holds {len} entries over a capacity of {capacity}, all of them loading")]
pub(crate) struct CapacityExceeded {
    pub len: usize,
    pub capacity: usize,
}
