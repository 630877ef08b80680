//! One pass over the eligible part of the sync queue.

use futures::FutureExt;
use log::{debug, error, warn};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::settings::SettingsService;

use super::queue_store::{RecordedOutcome, SyncQueueStore};
use super::sync_model::{DeliveryOutcome, MutationItem};
use super::transport::{DeliveryTransport, SyncTarget};

/// Summary of a single dispatcher tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum TickReport {
    /// No server URL or API key configured.
    Disabled,
    /// Another tick was still running.
    Skipped,
    /// Nothing was eligible.
    Idle,
    /// The queue could not be read.
    StorageUnavailable { message: String },
    Completed {
        attempted: usize,
        delivered: usize,
        rescheduled: usize,
        abandoned: usize,
    },
}

/// Resets the in-progress flag when a tick ends, including on panic.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncDispatcher {
    queue: Arc<SyncQueueStore>,
    transport: Arc<dyn DeliveryTransport>,
    settings: Arc<SettingsService>,
    tick_in_progress: AtomicBool,
}

impl SyncDispatcher {
    pub fn new(
        queue: Arc<SyncQueueStore>,
        transport: Arc<dyn DeliveryTransport>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            queue,
            transport,
            settings,
            tick_in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_tick_in_progress(&self) -> bool {
        self.tick_in_progress.load(Ordering::Acquire)
    }

    /// Delivers every eligible item once, sequentially and in FIFO order.
    ///
    /// Never fails: delivery errors become queue updates and storage errors
    /// are logged. The target is read once, so settings changed mid-tick take
    /// effect on the next tick.
    pub async fn run_tick(&self) -> TickReport {
        let Some(target) = self.settings.sync_target() else {
            return TickReport::Disabled;
        };

        let Some(_guard) = TickGuard::acquire(&self.tick_in_progress) else {
            debug!("[SyncDispatcher] Previous tick still running; skipping");
            return TickReport::Skipped;
        };

        let now = self.queue.now();
        let items: Vec<MutationItem> = match self.queue.eligible_items(now) {
            Ok(items) => items.collect(),
            Err(err) => {
                error!("[SyncDispatcher] Failed to read sync queue: {}", err);
                return TickReport::StorageUnavailable {
                    message: err.to_string(),
                };
            }
        };
        if items.is_empty() {
            return TickReport::Idle;
        }

        debug!("[SyncDispatcher] Delivering {} eligible item(s)", items.len());
        let mut delivered = 0;
        let mut rescheduled = 0;
        let mut abandoned = 0;

        for item in &items {
            let outcome = self.attempt(&target, item).await;
            match self.queue.record_outcome(&item.id, outcome) {
                Ok(RecordedOutcome::Delivered) => delivered += 1,
                Ok(RecordedOutcome::Rescheduled { .. }) => rescheduled += 1,
                Ok(RecordedOutcome::Abandoned { .. }) => abandoned += 1,
                Ok(RecordedOutcome::Ignored) => {
                    debug!("[SyncDispatcher] Item {} left the queue mid-tick", item.id)
                }
                Err(err) => error!(
                    "[SyncDispatcher] Failed to record outcome for {}: {}",
                    item.id, err
                ),
            }
        }

        TickReport::Completed {
            attempted: items.len(),
            delivered,
            rescheduled,
            abandoned,
        }
    }

    async fn attempt(&self, target: &SyncTarget, item: &MutationItem) -> DeliveryOutcome {
        let delivery = AssertUnwindSafe(self.transport.deliver(target, &item.payload))
            .catch_unwind()
            .await;

        match delivery {
            Ok(Ok(())) => DeliveryOutcome::Success,
            Ok(Err(err)) => {
                if matches!(err.status_code(), Some(401 | 403)) {
                    warn!("[SyncDispatcher] Server rejected the API key; check sync settings");
                }
                warn!("[SyncDispatcher] Delivery of {} failed: {}", item.id, err);
                DeliveryOutcome::Failure(err.to_string())
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("[SyncDispatcher] Delivery of {} panicked: {}", item.id, reason);
                DeliveryOutcome::Failure(format!("Unexpected delivery failure: {}", reason))
            }
        }
    }
}
