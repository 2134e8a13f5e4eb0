//! Caching layer: an async, bounded, expiring get-or-load cache.
//!
//! [`ExpiringCache`] sits between request handlers and an upstream source.
//! A lookup either answers from a loaded entry or joins the single load
//! episode running for that key, starting one if there is none. However many
//! callers miss on the same key at once, the upstream is asked once.
//!
//! ## Entry lifecycle
//!
//! ```text
//!   miss ──► LOADING ──► LOADED ──(ttl)──► gone
//!               │
//!               └──────► FAILED ──(negative ttl)──► gone
//! ```
//!
//! A loading entry owns the shared future its waiters are parked on. When the
//! fetch finishes, the entry is moved to its final state under the map lock
//! before any waiter is woken (see [`single_flight`]).
//!
//! Entries leave the map when they expire (lazily on access, or through
//! [`ExpiringCache::purge_expired`]), when they are invalidated, or when
//! they are evicted to stay within `max_capacity`. Loading entries are never
//! evicted.

mod config;
mod entry;
mod error;
pub mod single_flight;
mod stats;

pub use config::{CacheConfig, ConfigError, EvictionPolicy};
pub use error::LoadError;
pub use single_flight::{Flight, SingleFlightLoader};
pub use stats::StatsSnapshot;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use entry::{CacheEntry, EntryState, Settled};
use error::CapacityExceeded;
use single_flight::Outcome;
use stats::CacheStats;

enum Lookup<V, E> {
    Hit(V),
    NegativeHit(LoadError<E>),
    InFlight(Flight<V, E>),
    Miss,
}

/// The entry map plus the eviction order.
///
/// `recency` maps a monotonically increasing rank to its key; the smallest
/// rank is the next eviction candidate. Under [`EvictionPolicy::Lru`] every
/// access re-ranks the entry, under [`EvictionPolicy::Fifo`] only insertion
/// does.
struct Store<K, V, E> {
    entries: HashMap<K, CacheEntry<V, E>>,
    recency: BTreeMap<u64, K>,
    clock: u64,
}

impl<K, V, E> Store<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
        }
    }

    fn next_rank(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(
        &mut self,
        key: &K,
        now: Instant,
        policy: EvictionPolicy,
        stats: &CacheStats,
    ) -> Lookup<V, E> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Miss;
        };

        if entry.is_expired(now) {
            trace!(?key, "entry expired");
            self.remove(key);
            stats.record_expirations(1);
            return Lookup::Miss;
        }

        let lookup = match entry.state() {
            EntryState::Loading(flight) => Lookup::InFlight(flight.clone()),
            EntryState::Loaded(value) => Lookup::Hit(value.clone()),
            EntryState::Failed(error) => Lookup::NegativeHit(error.clone()),
        };
        if policy == EvictionPolicy::Lru {
            self.touch(key);
        }
        lookup
    }

    fn touch(&mut self, key: &K) {
        let rank = self.next_rank();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.rank());
            entry.set_rank(rank);
            self.recency.insert(rank, key.clone());
        }
    }

    fn begin(&mut self, key: K, flight: Flight<V, E>, now: Instant) {
        let rank = self.next_rank();
        let entry = CacheEntry::loading(flight, now, rank);
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.recency.remove(&previous.rank());
        }
        self.recency.insert(rank, key);
    }

    fn settle(
        &mut self,
        key: &K,
        episode: u64,
        outcome: &Outcome<V, E>,
        now: Instant,
        config: &CacheConfig,
    ) -> Settled {
        let Some(entry) = self.entries.get_mut(key) else {
            return Settled::Stale;
        };
        let settled = entry.settle(
            episode,
            outcome,
            now,
            config.time_to_live,
            config.negative_cache_ttl,
        );
        if settled == Settled::Discard {
            self.remove(key);
        }
        settled
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V, E>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.rank());
        Some(entry)
    }

    fn clear(&mut self) -> usize {
        let len = self.entries.len();
        self.entries.clear();
        self.recency.clear();
        len
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Shrinks the map back to `capacity`, expired entries first, then by rank.
    fn make_room(
        &mut self,
        capacity: usize,
        now: Instant,
        stats: &CacheStats,
    ) -> Result<(), CapacityExceeded> {
        if self.entries.len() <= capacity {
            return Ok(());
        }

        let expired = self.purge_expired(now);
        stats.record_expirations(expired as u64);

        while self.entries.len() > capacity {
            let victim = self
                .recency
                .values()
                .find(|key| self.entries.get(*key).is_some_and(|e| !e.is_loading()))
                .cloned();

            let Some(victim) = victim else {
                return Err(CapacityExceeded {
                    len: self.entries.len(),
                    capacity,
                });
            };

            if let Some(entry) = self.remove(&victim) {
                debug!(key = ?victim, age = ?now.duration_since(entry.created_at()), "evicted entry");
            }
            stats.record_evictions(1);
        }

        Ok(())
    }
}

struct Inner<K, V, E> {
    config: CacheConfig,
    loader: SingleFlightLoader,
    store: Mutex<Store<K, V, E>>,
    stats: CacheStats,
}

impl<K, V, E> Inner<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    fn settle(&self, key: &K, episode: u64, outcome: &Outcome<V, E>) {
        let now = Instant::now();
        let settled = self
            .store
            .lock()
            .settle(key, episode, outcome, now, &self.config);

        match outcome {
            Ok(_) => self.stats.record_load_success(1),
            Err(LoadError::UpstreamTimeout(_)) => {
                self.stats.record_load_failure(1);
                self.stats.record_load_timeout(1);
            }
            Err(_) => self.stats.record_load_failure(1),
        }

        match settled {
            Settled::Stale => {
                debug!(?key, episode, "load finished after its entry was invalidated");
            }
            settled => trace!(?key, episode, ?settled, "load settled"),
        }
    }
}

/// A bounded, expiring, single-flight cache.
///
/// Cloning is cheap and every clone refers to the same cache. Construct one
/// per service at startup and hand clones to whatever serves requests.
///
/// # Examples
///
/// ```
/// use cat_cache::cache::{CacheConfig, ExpiringCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: ExpiringCache<u16, String, std::io::Error> =
///     ExpiringCache::new(CacheConfig::default());
///
/// let value = cache
///     .get_or_load(404, |code| async move { Ok(format!("cat #{code}")) })
///     .await
///     .unwrap();
/// assert_eq!(value, "cat #404");
/// assert_eq!(cache.get_if_present(&404).as_deref(), Some("cat #404"));
/// # }
/// ```
pub struct ExpiringCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for ExpiringCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> fmt::Debug for ExpiringCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .store
            .try_lock()
            .map(|store| store.entries.len())
            .unwrap_or_default();
        f.debug_struct("ExpiringCache")
            .field("config", &self.inner.config)
            .field("entries", &entries)
            .finish()
    }
}

impl<K, V, E> ExpiringCache<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates an empty cache.
    ///
    /// The configuration is taken as is; run [`CacheConfig::validate`] first
    /// when it comes from user input.
    pub fn new(config: CacheConfig) -> Self {
        let loader = SingleFlightLoader::new(config.load_timeout);
        Self {
            inner: Arc::new(Inner {
                config,
                loader,
                store: Mutex::new(Store::new()),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Returns the value for `key`, loading it with `fetch` on a miss.
    ///
    /// - A loaded, unexpired entry is returned immediately.
    /// - If a load for `key` is already running, the caller waits for it and
    ///   receives the same outcome as everyone else waiting on it.
    /// - Otherwise `fetch(key)` is called to build the load future, which is
    ///   spawned as a new episode bounded by `load_timeout`.
    ///
    /// Dropping the returned future stops waiting but does not stop the load.
    ///
    /// # Errors
    ///
    /// - [`LoadError::UpstreamFailure`] with the error `fetch` produced.
    /// - [`LoadError::UpstreamTimeout`] when the load exceeded `load_timeout`.
    /// - [`LoadError::Abandoned`] when the load task died without a result.
    ///
    /// With negative caching enabled, a recent failure is returned again
    /// without calling `fetch`.
    pub async fn get_or_load<F, Fut>(&self, key: K, fetch: F) -> Result<V, LoadError<E>>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let flight = {
            let now = Instant::now();
            let config = &self.inner.config;
            let stats = &self.inner.stats;
            let mut store = self.inner.store.lock();

            match store.lookup(&key, now, config.eviction_policy, stats) {
                Lookup::Hit(value) => {
                    stats.record_hit(1);
                    trace!(?key, "cache hit");
                    return Ok(value);
                }
                Lookup::NegativeHit(error) => {
                    stats.record_negative_hit(1);
                    trace!(?key, "negative cache hit");
                    return Err(error);
                }
                Lookup::InFlight(flight) => {
                    stats.record_coalesced(1);
                    trace!(?key, episode = flight.episode(), "joining load in flight");
                    flight
                }
                Lookup::Miss => {
                    stats.record_miss(1);
                    let flight = self.launch(key.clone(), fetch);
                    debug!(?key, episode = flight.episode(), "cache miss, loading");
                    store.begin(key, flight.clone(), now);
                    if let Err(error) = store.make_room(config.max_capacity, now, stats) {
                        debug!(%error, "cache over capacity");
                    }
                    flight
                }
            }
        };

        flight.wait().await
    }

    fn launch<F, Fut>(&self, key: K, fetch: F) -> Flight<V, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let fetch = fetch(key.clone());
        self.inner
            .loader
            .launch(fetch, move |episode, outcome: &Outcome<V, E>| {
                inner.settle(&key, episode, outcome)
            })
    }

    /// Returns the loaded value for `key` without ever starting a load.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut store = self.inner.store.lock();
        match store.lookup(key, now, self.inner.config.eviction_policy, &self.inner.stats) {
            Lookup::Hit(value) => {
                self.inner.stats.record_hit(1);
                Some(value)
            }
            _ => None,
        }
    }

    /// Removes the entry for `key`, whatever state it is in.
    ///
    /// A load running for the key keeps going and still answers the callers
    /// already waiting on it, but its result is not stored. The next caller
    /// starts a fresh load.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.inner.store.lock().remove(key).is_some();
        if removed {
            self.inner.stats.record_invalidations(1);
            debug!(?key, "invalidated entry");
        }
        removed
    }

    /// Removes every entry. Returns how many there were.
    pub fn invalidate_all(&self) -> usize {
        let removed = self.inner.store.lock().clear();
        self.inner.stats.record_invalidations(removed as u64);
        debug!(removed, "invalidated all entries");
        removed
    }

    /// Drops every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let purged = self.inner.store.lock().purge_expired(Instant::now());
        self.inner.stats.record_expirations(purged as u64);
        purged
    }

    /// Number of entries in any state, including loading and expired ones
    /// that have not been purged yet.
    pub fn len(&self) -> usize {
        self.inner.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::{BoxFuture, FutureExt};
    use tokio::time;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("upstream refused {0}")]
    struct Refused(&'static str);

    type TestCache = ExpiringCache<&'static str, String, Refused>;
    type Fetch =
        Box<dyn FnOnce(&'static str) -> BoxFuture<'static, Result<String, Refused>> + Send>;

    /// A fake upstream counting how often it is asked.
    #[derive(Clone, Default)]
    struct Upstream {
        calls: Arc<AtomicUsize>,
    }

    impl Upstream {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Answers `"{key}-v{n}"` after `delay`, `n` counting calls from 1.
        fn value(&self, delay: Duration) -> Fetch {
            let calls = Arc::clone(&self.calls);
            Box::new(move |key| {
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    time::sleep(delay).await;
                    Ok(format!("{key}-v{n}"))
                }
                .boxed()
            })
        }

        fn failure(&self, delay: Duration) -> Fetch {
            let calls = Arc::clone(&self.calls);
            Box::new(move |key| {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    time::sleep(delay).await;
                    Err(Refused(key))
                }
                .boxed()
            })
        }
    }

    fn cache(config: CacheConfig) -> TestCache {
        ExpiringCache::new(config)
    }

    const MS: Duration = Duration::from_millis(1);

    #[tokio::test(start_paused = true)]
    async fn burst_of_misses_fetches_once() {
        let cache = cache(CacheConfig::default());
        let upstream = Upstream::default();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                let fetch = upstream.value(10 * MS);
                tokio::spawn(async move { cache.get_or_load("k1", fetch).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            assert_eq!(result.unwrap().unwrap(), "k1-v1");
        }
        assert_eq!(upstream.calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced, 31);
        assert_eq!(stats.load_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hit_then_expiry() {
        let cache = cache(CacheConfig {
            time_to_live: 100 * MS,
            ..Default::default()
        });
        let upstream = Upstream::default();

        // t=0: miss, the fetch takes 10ms
        let start = Instant::now();
        assert_eq!(cache.get_or_load("k1", upstream.value(10 * MS)).await.unwrap(), "k1-v1");
        assert!(start.elapsed() >= 10 * MS && start.elapsed() < 20 * MS);
        assert_eq!(upstream.calls(), 1);

        // t=50ms: hit, answered without waiting
        time::advance(40 * MS).await;
        let before = Instant::now();
        assert_eq!(cache.get_or_load("k1", upstream.value(10 * MS)).await.unwrap(), "k1-v1");
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(upstream.calls(), 1);

        // t=150ms: expired, exactly one new fetch
        time::advance(100 * MS).await;
        assert_eq!(cache.get_or_load("k1", upstream.value(10 * MS)).await.unwrap(), "k1-v2");
        assert_eq!(upstream.calls(), 2);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.expirations), (1, 2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_key_does_not_block_other_keys() {
        let cache = cache(CacheConfig {
            load_timeout: Duration::from_secs(7200),
            ..Default::default()
        });

        let slow = tokio::spawn({
            let cache = cache.clone();
            let fetch = Upstream::default().value(Duration::from_secs(3600));
            async move { cache.get_or_load("a", fetch).await }
        });
        tokio::task::yield_now().await;

        let start = Instant::now();
        let value = cache
            .get_or_load("b", Upstream::default().value(5 * MS))
            .await
            .unwrap();
        assert_eq!(value, "b-v1");
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!slow.is_finished());
        slow.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used() {
        let cache = cache(CacheConfig {
            max_capacity: 3,
            ..Default::default()
        });
        let upstream = Upstream::default();

        for key in ["a", "b", "c"] {
            cache.get_or_load(key, upstream.value(MS)).await.unwrap();
        }
        // touching "a" leaves "b" as the oldest access
        cache.get_or_load("a", upstream.value(MS)).await.unwrap();
        cache.get_or_load("d", upstream.value(MS)).await.unwrap();

        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 3);
        assert!(cache.get_if_present(&"b").is_none());
        for key in ["a", "c", "d"] {
            assert!(cache.get_if_present(&key).is_some(), "{key} was evicted");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_ignores_hits() {
        let cache = cache(CacheConfig {
            max_capacity: 2,
            eviction_policy: EvictionPolicy::Fifo,
            ..Default::default()
        });
        let upstream = Upstream::default();

        cache.get_or_load("a", upstream.value(MS)).await.unwrap();
        cache.get_or_load("b", upstream.value(MS)).await.unwrap();
        cache.get_or_load("a", upstream.value(MS)).await.unwrap();
        cache.get_or_load("c", upstream.value(MS)).await.unwrap();

        assert!(cache.get_if_present(&"a").is_none());
        assert!(cache.get_if_present(&"b").is_some());
        assert!(cache.get_if_present(&"c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn never_evicts_loading_entries() {
        let cache = cache(CacheConfig {
            max_capacity: 1,
            ..Default::default()
        });
        let upstream = Upstream::default();

        let slow = tokio::spawn({
            let cache = cache.clone();
            let fetch = upstream.value(100 * MS);
            async move { cache.get_or_load("slow", fetch).await }
        });
        tokio::task::yield_now().await;

        // both entries are loading when "fast" is inserted, nothing can go
        assert_eq!(cache.get_or_load("fast", upstream.value(MS)).await.unwrap(), "fast-v2");
        assert_eq!(slow.await.unwrap().unwrap(), "slow-v1");
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_go_before_live_ones() {
        let cache = cache(CacheConfig {
            max_capacity: 2,
            time_to_live: 50 * MS,
            ..Default::default()
        });
        let upstream = Upstream::default();

        cache.get_or_load("old", upstream.value(MS)).await.unwrap();
        time::advance(40 * MS).await;
        cache.get_or_load("fresh", upstream.value(MS)).await.unwrap();
        time::advance(20 * MS).await;
        cache.get_or_load("new", upstream.value(MS)).await.unwrap();

        let stats = cache.stats();
        assert_eq!((stats.evictions, stats.expirations), (0, 1));
        assert!(cache.get_if_present(&"fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reaches_every_waiter() {
        let cache = cache(CacheConfig {
            load_timeout: 50 * MS,
            ..Default::default()
        });
        let upstream = Upstream::default();
        let slow = || upstream.value(Duration::from_secs(3600));

        let (a, b, c) = futures::join!(
            cache.get_or_load("k", slow()),
            cache.get_or_load("k", slow()),
            cache.get_or_load("k", slow()),
        );
        for result in [a, b, c] {
            assert!(matches!(result, Err(LoadError::UpstreamTimeout(t)) if t == 50 * MS));
        }
        assert_eq!(upstream.calls(), 1);
        assert_eq!(cache.stats().load_timeouts, 1);

        // the slot is free again
        assert_eq!(cache.get_or_load("k", upstream.value(MS)).await.unwrap(), "k-v2");
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_shared_and_not_cached() {
        let cache = cache(CacheConfig::default());
        let upstream = Upstream::default();

        let (a, b) = futures::join!(
            cache.get_or_load("k", upstream.failure(5 * MS)),
            cache.get_or_load("k", upstream.failure(5 * MS)),
        );
        match (a, b) {
            (Err(LoadError::UpstreamFailure(a)), Err(LoadError::UpstreamFailure(b))) => {
                assert!(Arc::ptr_eq(&a, &b));
                assert_eq!(a.to_string(), "upstream refused k");
            }
            other => panic!("expected shared failures, got {other:?}"),
        }
        assert_eq!(upstream.calls(), 1);
        assert!(cache.is_empty());

        cache.get_or_load("k", upstream.failure(MS)).await.unwrap_err();
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_caching_replays_failures() {
        let cache = cache(CacheConfig {
            negative_cache_ttl: Duration::from_secs(1),
            ..Default::default()
        });
        let upstream = Upstream::default();

        let first = cache.get_or_load("k", upstream.failure(MS)).await;
        let second = cache.get_or_load("k", upstream.value(MS)).await;
        assert!(matches!(first, Err(LoadError::UpstreamFailure(_))));
        assert!(matches!(second, Err(LoadError::UpstreamFailure(ref e)) if e.0 == "k"));
        assert_eq!(upstream.calls(), 1);
        assert_eq!(cache.stats().negative_hits, 1);

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_or_load("k", upstream.value(MS)).await.unwrap(), "k-v2");
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_during_load_is_not_undone() {
        let cache = cache(CacheConfig::default());
        let upstream = Upstream::default();

        let first = tokio::spawn({
            let cache = cache.clone();
            let fetch = upstream.value(10 * MS);
            async move { cache.get_or_load("k", fetch).await }
        });
        tokio::task::yield_now().await;

        assert!(cache.invalidate(&"k"));
        // a caller arriving after the invalidation starts its own episode
        let second = cache.get_or_load("k", upstream.value(20 * MS)).await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), "k-v1");
        assert_eq!(second, "k-v2");
        assert_eq!(cache.get_if_present(&"k").as_deref(), Some("k-v2"));
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_load_is_delivered_but_dropped() {
        let cache = cache(CacheConfig::default());
        let upstream = Upstream::default();

        let waiter = tokio::spawn({
            let cache = cache.clone();
            let fetch = upstream.value(10 * MS);
            async move { cache.get_or_load("k", fetch).await }
        });
        tokio::task::yield_now().await;
        cache.invalidate(&"k");

        assert_eq!(waiter.await.unwrap().unwrap(), "k-v1");
        assert!(cache.get_if_present(&"k").is_none());
        assert!(!cache.invalidate(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_waiter_does_not_cancel_the_load() {
        let cache = cache(CacheConfig::default());
        let upstream = Upstream::default();

        let impatient = tokio::spawn({
            let cache = cache.clone();
            let fetch = upstream.value(10 * MS);
            async move { cache.get_or_load("k", fetch).await }
        });
        tokio::task::yield_now().await;
        impatient.abort();

        assert_eq!(cache.get_or_load("k", upstream.value(10 * MS)).await.unwrap(), "k-v1");
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_and_invalidate_all() {
        let cache = cache(CacheConfig {
            time_to_live: 10 * MS,
            ..Default::default()
        });
        let upstream = Upstream::default();

        cache.get_or_load("a", upstream.value(MS)).await.unwrap();
        cache.get_or_load("b", upstream.value(MS)).await.unwrap();
        time::advance(20 * MS).await;
        cache.get_or_load("c", upstream.value(MS)).await.unwrap();

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_all(), 1);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!((stats.expirations, stats.invalidations), (2, 1));
    }

    #[tokio::test]
    async fn panicking_fetch_frees_the_slot() {
        let cache = cache(CacheConfig::default());

        let result = cache
            .get_or_load("k", |_| async {
                if true {
                    panic!("upstream client bug");
                }
                Ok::<_, Refused>(String::new())
            })
            .await;
        assert!(matches!(result, Err(LoadError::Abandoned)));
        assert!(cache.is_empty());

        let upstream = Upstream::default();
        assert_eq!(cache.get_or_load("k", upstream.value(MS)).await.unwrap(), "k-v1");
    }
}
