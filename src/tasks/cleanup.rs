//! TTL Cleanup Task
//!
//! Background janitor that periodically removes expired entries from a
//! backend that does not expire data on its own.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;

// == Sweep ==
/// A store the janitor can purge.
#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    /// Label used in log lines.
    fn label(&self) -> &'static str;

    /// Removes every expired entry, returning how many were removed.
    async fn sweep(&self) -> Result<usize>;
}

// == Janitor ==
/// Handle to a running cleanup task.
///
/// The task holds only a weak reference to its store and exits on its own
/// once the store is dropped. Dropping the handle also stops the task.
#[derive(Debug)]
pub struct Janitor {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Janitor {
    /// Spawns a janitor sweeping `target` every `interval`.
    ///
    /// Returns `None` when `interval` is zero (cleanup disabled) or when
    /// called outside a tokio runtime.
    pub fn spawn<S: Sweep>(target: &Arc<S>, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            debug!("{} janitor disabled", target.label());
            return None;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(
                    "{} janitor not started: no tokio runtime, expired entries are only evicted on read",
                    target.label()
                );
                return None;
            }
        };

        let store: Weak<S> = Arc::downgrade(target);
        let label = target.label();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            info!(
                "Starting {} cleanup task with interval of {:?}",
                label, interval
            );

            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // Fires on an explicit stop and when the handle is dropped
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };

                        match store.sweep().await {
                            Ok(0) => debug!("{} cleanup: no expired entries found", label),
                            Ok(removed) => {
                                info!("{} cleanup: removed {} expired entries", label, removed)
                            }
                            Err(e) => warn!("{} cleanup pass failed: {}", label, e),
                        }
                    }
                }
            }

            debug!("{} cleanup task stopped", label);
        });

        Some(Self {
            stop: Some(stop_tx),
            handle,
        })
    }

    // == Stop ==
    /// Signals the task and waits for it to exit.
    ///
    /// A sweep already in progress is allowed to finish first.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        if let Err(e) = (&mut self.handle).await {
            if !e.is_cancelled() {
                warn!("cleanup task ended abnormally: {}", e);
            }
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
