//! Background sweep of idle client state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::rate_limiter::RateLimiter;
use crate::utils::{AdmissionError, AdmissionResult};

/// Periodically calls [`RateLimiter::sweep`]
pub struct EvictionWorker;

impl EvictionWorker {
    /// Spawn the sweep loop on the current runtime.
    ///
    /// The first sweep runs one `interval` after spawning.
    pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration) -> AdmissionResult<EvictionHandle> {
        if interval.is_zero() {
            return Err(AdmissionError::invalid("sweep interval must be greater than 0"));
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!(event = "eviction_stopped");
                        break;
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = interval.as_secs(),
            event = "eviction_started"
        );
        Ok(EvictionHandle {
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// Owner of a running sweep loop
#[derive(Debug)]
pub struct EvictionHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EvictionHandle {
    /// Stop the loop and wait for it to finish
    pub async fn shutdown(mut self) -> AdmissionResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // the task may already be gone; joining reports why
            let _ = shutdown.send(());
        }
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
