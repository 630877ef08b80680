//! Timer lifecycle for the background sync loop.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::settings::SyncSettings;

use super::dispatcher::{SyncDispatcher, TickReport};

/// Cadence of the background sync tick in seconds.
pub const SYNC_TICK_INTERVAL_SECS: u64 = 30;

struct BackgroundLoop {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Owns the repeating tick. At most one loop runs at a time, and the
/// dispatcher's own guard keeps ticks from overlapping.
pub struct SyncScheduler {
    dispatcher: Arc<SyncDispatcher>,
    interval: Duration,
    background_task: Mutex<Option<BackgroundLoop>>,
}

impl SyncScheduler {
    pub fn new(dispatcher: Arc<SyncDispatcher>) -> Self {
        Self::with_interval(dispatcher, Duration::from_secs(SYNC_TICK_INTERVAL_SECS))
    }

    pub fn with_interval(dispatcher: Arc<SyncDispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
            background_task: Mutex::new(None),
        }
    }

    /// Starts the loop when both server URL and API key are set, stops it
    /// otherwise.
    pub async fn apply_settings(&self, settings: &SyncSettings) {
        if settings.sync_target().is_some() {
            self.start().await;
        } else {
            self.stop().await;
        }
    }

    /// Starts the loop. Returns `false` when it was already running.
    pub async fn start(&self) -> bool {
        let mut guard = self.background_task.lock().await;
        if let Some(running) = guard.as_ref() {
            if !running.handle.is_finished() {
                return false;
            }
            guard.take();
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                let report = dispatcher.run_tick().await;
                if report != TickReport::Idle && report != TickReport::Disabled {
                    debug!("[SyncScheduler] Tick finished: {:?}", report);
                }
            }
            debug!("[SyncScheduler] Background loop exited");
        });

        info!(
            "[SyncScheduler] Background sync started (every {}s)",
            interval.as_secs()
        );
        *guard = Some(BackgroundLoop { handle, shutdown });
        true
    }

    /// Prevents future ticks. A tick already in flight runs to completion.
    pub async fn stop(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(running) = guard.take() {
            let _ = running.shutdown.send(true);
            info!("[SyncScheduler] Background sync stopped");
        }
    }

    /// Like [`stop`](Self::stop), but waits for the loop (and any in-flight
    /// tick) to finish.
    pub async fn stop_and_wait(&self) {
        let running = self.background_task.lock().await.take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            let _ = running.handle.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.background_task
            .lock()
            .await
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    /// Runs a tick immediately, subject to the same overlap guard.
    pub async fn run_now(&self) -> TickReport {
        self.dispatcher.run_tick().await
    }
}
