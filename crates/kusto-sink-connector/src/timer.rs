//! Per-partition flush timer.
//!
//! The timer holds no batch state and performs no I/O: every period it calls
//! back into its owner, which decides what (if anything) to roll. Stopping
//! signals the task and waits for it, so a stop never cuts a callback short.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Handle to a running (or disabled) flush timer task.
#[derive(Debug)]
pub struct FlushTimer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// A timer that never fires.
    pub fn disabled() -> Self {
        Self {
            shutdown_tx: None,
            task: None,
        }
    }

    /// Spawn a timer that calls `on_fire` every `period`, first one period
    /// after start. The callback returns `false` to end the timer (e.g. its
    /// owner is gone). A zero period yields a disabled timer.
    pub fn start<F, Fut>(period: Duration, mut on_fire: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if period.is_zero() {
            return Self::disabled();
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        tracing::trace!(period_ms = period.as_millis() as u64, "Flush timer tick");
                        if !on_fire().await {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the timer and wait until its task has exited.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Flush timer task ended abnormally");
            }
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        // Without a stop() the task still exits at its next select.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
