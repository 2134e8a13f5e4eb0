//! Request coalescing for cache misses.
//!
//! A load episode is one spawned fetch. Its outcome is published through a
//! oneshot channel turned into a [`Shared`] future, so any number of callers
//! can await the same result. The fetch runs as its own tokio task: dropping a
//! [`Flight`] handle (for example when a client disconnects) never cancels it.
//!
//! Before the outcome is published, a settle hook runs. The cache uses it to
//! move the entry out of the loading state under its own lock, so a caller
//! arriving after the episode ended either sees the settled entry or starts a
//! new episode. It can never attach to a finished one.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use super::error::LoadError;

/// What a load episode resolves to.
pub type Outcome<V, E> = Result<V, LoadError<E>>;

/// A handle on an in-flight load episode.
///
/// Cloning a `Flight` registers another waiter.
pub struct Flight<V, E> {
    episode: u64,
    outcome: Shared<oneshot::Receiver<Outcome<V, E>>>,
}

impl<V, E> Clone for Flight<V, E> {
    fn clone(&self) -> Self {
        Self {
            episode: self.episode,
            outcome: self.outcome.clone(),
        }
    }
}

impl<V, E> std::fmt::Debug for Flight<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
            .field("episode", &self.episode)
            .finish_non_exhaustive()
    }
}

impl<V, E> Flight<V, E> {
    /// The episode this handle belongs to.
    pub fn episode(&self) -> u64 {
        self.episode
    }
}

impl<V: Clone, E> Flight<V, E> {
    /// Waits for the episode to finish and returns its outcome.
    pub async fn wait(self) -> Outcome<V, E> {
        // the sender only disappears without sending if the fetch task died
        self.outcome.await.unwrap_or(Err(LoadError::Abandoned))
    }
}

/// Finishes an episode exactly once: settles, then publishes.
///
/// If the task is torn down before [`finish`](Self::finish) is called, the
/// drop path settles with [`LoadError::Abandoned`] and then drops the sender,
/// which wakes every waiter with the same error.
struct Completion<V, E, S>
where
    S: FnOnce(u64, &Outcome<V, E>),
{
    episode: u64,
    settle: Option<S>,
    sender: Option<oneshot::Sender<Outcome<V, E>>>,
    _outcome: PhantomData<fn() -> (V, E)>,
}

impl<V, E, S> Completion<V, E, S>
where
    S: FnOnce(u64, &Outcome<V, E>),
{
    fn new(episode: u64, settle: S, sender: oneshot::Sender<Outcome<V, E>>) -> Self {
        Self {
            episode,
            settle: Some(settle),
            sender: Some(sender),
            _outcome: PhantomData,
        }
    }

    fn finish(mut self, outcome: Outcome<V, E>) {
        if let Some(settle) = self.settle.take() {
            settle(self.episode, &outcome);
        }
        if let Some(sender) = self.sender.take() {
            // nobody listening is fine, the settle hook already recorded the result
            sender.send(outcome).ok();
        }
    }
}

impl<V, E, S> Drop for Completion<V, E, S>
where
    S: FnOnce(u64, &Outcome<V, E>),
{
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            tracing::warn!(episode = self.episode, "load task ended without an outcome");
            settle(self.episode, &Err(LoadError::Abandoned));
        }
        drop(self.sender.take());
    }
}

/// Spawns fetches and hands out [`Flight`]s for them.
///
/// The loader itself keeps no per-key state; deciding whether a key already
/// has a flight to join is up to the owner of the entry map, which stores the
/// `Flight` alongside the entry.
#[derive(Debug)]
pub struct SingleFlightLoader {
    load_timeout: Duration,
    episodes: AtomicU64,
}

impl SingleFlightLoader {
    pub fn new(load_timeout: Duration) -> Self {
        Self {
            load_timeout,
            episodes: AtomicU64::new(0),
        }
    }

    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    /// Starts a new load episode.
    ///
    /// `fetch` is spawned immediately on the current tokio runtime and bounded
    /// by the load timeout. Once it finishes, `settle` is called with the
    /// episode id and outcome, and only afterwards is the outcome delivered to
    /// the returned [`Flight`] and all of its clones.
    ///
    /// The fetch starts even if nobody polls the returned handle.
    pub fn launch<V, E, F, S>(&self, fetch: F, settle: S) -> Flight<V, E>
    where
        V: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: Future<Output = Result<V, E>> + Send + 'static,
        S: FnOnce(u64, &Outcome<V, E>) + Send + 'static,
    {
        let episode = self.episodes.fetch_add(1, Ordering::Relaxed) + 1;
        let load_timeout = self.load_timeout;
        let (sender, receiver) = oneshot::channel();
        let completion = Completion::new(episode, settle, sender);

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(load_timeout, fetch).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(LoadError::UpstreamFailure(Arc::new(error))),
                Err(_elapsed) => Err(LoadError::UpstreamTimeout(load_timeout)),
            };
            completion.finish(outcome);
        });

        Flight {
            episode,
            outcome: receiver.shared(),
        }
    }
}
