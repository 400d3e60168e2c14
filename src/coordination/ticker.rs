//! Fixed-interval loop runner
//!
//! Runs one tick at a time. A tick that overruns its period causes the missed
//! ticks to be dropped (logged, never queued). Stopping waits for the in-flight
//! tick to complete.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::shutdown::ShutdownListener;

pub struct Ticker {
    name: &'static str,
    period: Duration,
}

impl Ticker {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self { name, period }
    }

    /// Drive `tick` until shutdown is requested. Returns the number of completed ticks.
    pub async fn run<F, Fut>(self, mut shutdown: ShutdownListener, mut tick: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut completed = 0u64;

        info!("{} loop started (every {:?})", self.name, self.period);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {}
            }

            if shutdown.is_requested() {
                break;
            }

            let started = Instant::now();
            tick().await;
            completed += 1;

            let elapsed = started.elapsed();
            if elapsed > self.period {
                let skipped = (elapsed.as_millis() / self.period.as_millis().max(1)) as u64;
                warn!(
                    "{} tick took {:?} (period {:?}), dropping {} overlapping tick(s)",
                    self.name, elapsed, self.period, skipped
                );
            } else {
                debug!("{} tick completed in {:?}", self.name, elapsed);
            }
        }

        info!("{} loop stopped after {} tick(s)", self.name, completed);
        completed
    }
}
