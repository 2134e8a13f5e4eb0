//! A single slot in the cache map.

use std::time::Duration;

use tokio::time::Instant;

use super::error::LoadError;
use super::single_flight::{Flight, Outcome};

/// Where an entry is in its load lifecycle.
pub(crate) enum EntryState<V, E> {
    /// A fetch is running. Every waiter holds a clone of the flight, so the
    /// waiter set disappears together with this variant.
    Loading(Flight<V, E>),
    Loaded(V),
    /// A remembered failure, only recorded while negative caching is enabled.
    Failed(LoadError<E>),
}

/// What happened when a load episode reported back to its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    Loaded,
    Failed,
    /// The failure is not remembered; the caller should drop the entry.
    Discard,
    /// The entry is not loading, or is loading for another episode.
    Stale,
}

/// The key lives in the map, not in the entry.
pub(crate) struct CacheEntry<V, E> {
    state: EntryState<V, E>,
    /// When the current state was established.
    created_at: Instant,
    /// `None` while loading; loading entries never expire on their own.
    expires_at: Option<Instant>,
    /// Position in the eviction order, see `Store::recency`.
    rank: u64,
}

impl<V, E> CacheEntry<V, E> {
    pub(crate) fn loading(flight: Flight<V, E>, now: Instant, rank: u64) -> Self {
        Self {
            state: EntryState::Loading(flight),
            created_at: now,
            expires_at: None,
            rank,
        }
    }

    pub(crate) fn state(&self) -> &EntryState<V, E> {
        &self.state
    }

    pub(crate) fn rank(&self) -> u64 {
        self.rank
    }

    pub(crate) fn set_rank(&mut self, rank: u64) {
        self.rank = rank;
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn is_loading(&self) -> bool {
        matches!(self.state, EntryState::Loading(_))
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Moves a loading entry to its final state.
    ///
    /// Only the episode that created the entry may settle it, and only once:
    /// anything else is reported as [`Settled::Stale`] and leaves the entry
    /// untouched.
    pub(crate) fn settle(
        &mut self,
        episode: u64,
        outcome: &Outcome<V, E>,
        now: Instant,
        time_to_live: Duration,
        negative_ttl: Duration,
    ) -> Settled
    where
        V: Clone,
    {
        match &self.state {
            EntryState::Loading(flight) if flight.episode() == episode => {}
            _ => return Settled::Stale,
        }

        match outcome {
            Ok(value) => {
                self.state = EntryState::Loaded(value.clone());
                self.created_at = now;
                self.expires_at = Some(now + time_to_live);
                Settled::Loaded
            }
            Err(_) if negative_ttl.is_zero() => Settled::Discard,
            Err(error) => {
                self.state = EntryState::Failed(error.clone());
                self.created_at = now;
                self.expires_at = Some(now + negative_ttl);
                Settled::Failed
            }
        }
    }
}
