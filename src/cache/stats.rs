//! Hit/miss/load counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated with relaxed atomics from any task.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    negative_hits: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    load_timeouts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

macro_rules! counters {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl CacheStats {
            $(
                pub(crate) fn $name(&self, n: u64) {
                    self.$field.fetch_add(n, Ordering::Relaxed);
                }
            )*
        }
    };
}

counters! {
    record_hit => hits,
    record_miss => misses,
    record_coalesced => coalesced,
    record_negative_hit => negative_hits,
    record_load_success => load_successes,
    record_load_failure => load_failures,
    record_load_timeout => load_timeouts,
    record_evictions => evictions,
    record_expirations => expirations,
    record_invalidations => invalidations,
}

impl CacheStats {
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            hits: load(&self.hits),
            misses: load(&self.misses),
            coalesced: load(&self.coalesced),
            negative_hits: load(&self.negative_hits),
            load_successes: load(&self.load_successes),
            load_failures: load(&self.load_failures),
            load_timeouts: load(&self.load_timeouts),
            evictions: load(&self.evictions),
            expirations: load(&self.expirations),
            invalidations: load(&self.invalidations),
        }
    }
}

/// A point-in-time copy of the cache counters.
///
/// `misses` counts load episodes started; callers that joined an episode
/// already in flight are counted under `coalesced` instead. Failed loads that
/// hit the upstream timeout are counted in both `load_failures` and
/// `load_timeouts`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub negative_hits: u64,
    pub load_successes: u64,
    pub load_failures: u64,
    pub load_timeouts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl StatsSnapshot {
    /// Total number of lookups, however they were answered.
    pub fn requests(&self) -> u64 {
        self.hits + self.misses + self.coalesced + self.negative_hits
    }

    /// Fraction of lookups answered from a loaded entry, `1.0` when idle.
    pub fn hit_rate(&self) -> f64 {
        match self.requests() {
            0 => 1.0,
            requests => self.hits as f64 / requests as f64,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} coalesced={} negative_hits={} load_successes={} \
             load_failures={} load_timeouts={} evictions={} expirations={} \
             invalidations={} hit_rate={:.3}",
            self.hits,
            self.misses,
            self.coalesced,
            self.negative_hits,
            self.load_successes,
            self.load_failures,
            self.load_timeouts,
            self.evictions,
            self.expirations,
            self.invalidations,
            self.hit_rate(),
        )
    }
}
