//! Periodic jobs that run next to the request path.
//!
//! The service runs two of them: the stats reporter and the expiration
//! sweeper. Jobs are plain closures; anything slow belongs in a task of its own.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

/// Owns the handles of spawned periodic jobs.
///
/// Dropping it leaves the jobs running; call [`shutdown`](Self::shutdown)
/// to stop them.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    jobs: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` every `period`, first after one full period has passed.
    ///
    /// Ticks missed while the runtime was busy are not made up for.
    pub fn spawn_periodic<F>(&mut self, name: &'static str, period: Duration, mut job: F)
    where
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                trace!(job = name, "running periodic job");
                job();
            }
        });

        debug!(job = name, ?period, "started periodic job");
        self.jobs.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stops every job and waits for them to wind down.
    pub async fn shutdown(self) {
        for (name, handle) in self.jobs {
            handle.abort();
            // The only expected error is the cancellation itself.
            match handle.await {
                Err(error) if !error.is_cancelled() => {
                    tracing::error!(job = name, %error, "periodic job failed");
                }
                _ => {}
            }
            debug!(job = name, "stopped periodic job");
        }
    }
}
