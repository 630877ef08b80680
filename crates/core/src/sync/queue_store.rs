//! Durable queue of pending sync mutations plus a bounded audit log.
//!
//! The store is the only writer of `syncQueue` and `syncLog`. Every mutating
//! call persists both keys in a single write before it returns; in-memory
//! state is only replaced after that write succeeded.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::state_store::{LocalStateStore, SYNC_LOG_KEY, SYNC_QUEUE_KEY};

use super::clock::{Clock, SystemClock};
use super::retry_policy::RetryPolicy;
use super::sync_model::{
    DeliveryOutcome, MutationItem, SyncLogEntry, SyncLogKind, SyncPayload, SyncStatus,
};

/// Maximum number of retained log entries.
pub const SYNC_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Default)]
struct QueueState {
    queue: Vec<MutationItem>,
    log: Vec<SyncLogEntry>,
}

impl QueueState {
    fn append_log(&mut self, kind: SyncLogKind, message: String, timestamp: DateTime<Utc>) {
        self.log.push(SyncLogEntry {
            id: Uuid::now_v7().to_string(),
            timestamp,
            kind,
            message,
        });
        if self.log.len() > SYNC_LOG_CAPACITY {
            let overflow = self.log.len() - SYNC_LOG_CAPACITY;
            self.log.drain(..overflow);
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.queue.iter().position(|item| item.id == id)
    }
}

/// What `record_outcome` did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedOutcome {
    Delivered,
    Rescheduled {
        retry_count: u32,
        next_eligible_at: DateTime<Utc>,
    },
    Abandoned {
        retry_count: u32,
    },
    /// The id was not queued.
    Ignored,
}

/// Snapshot iterator over items eligible at a given instant, in FIFO order.
///
/// Each call to [`SyncQueueStore::eligible_items`] takes a fresh snapshot, so
/// later queue changes never affect an iterator already handed out.
#[derive(Debug)]
pub struct EligibleItems {
    items: std::vec::IntoIter<MutationItem>,
    now: DateTime<Utc>,
}

impl Iterator for EligibleItems {
    type Item = MutationItem;

    fn next(&mut self) -> Option<Self::Item> {
        let now = self.now;
        self.items.by_ref().find(|item| item.is_eligible(now))
    }
}

pub struct SyncQueueStore {
    storage: Arc<dyn LocalStateStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
}

impl SyncQueueStore {
    /// Opens the store with the system clock and default retry policy.
    pub fn new(storage: Arc<dyn LocalStateStore>) -> Result<Self> {
        Self::open(storage, Arc::new(SystemClock), RetryPolicy::default())
    }

    /// Opens the store, loading any persisted queue and log.
    pub fn open(
        storage: Arc<dyn LocalStateStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let queue = load_entries::<MutationItem>(storage.as_ref(), SYNC_QUEUE_KEY)?;
        let mut log = load_entries::<SyncLogEntry>(storage.as_ref(), SYNC_LOG_KEY)?;
        if log.len() > SYNC_LOG_CAPACITY {
            let overflow = log.len() - SYNC_LOG_CAPACITY;
            log.drain(..overflow);
        }
        debug!(
            "[SyncQueue] Loaded {} queued item(s) and {} log entries",
            queue.len(),
            log.len()
        );

        Ok(Self {
            storage,
            clock,
            policy,
            state: Mutex::new(QueueState { queue, log }),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Appends a new mutation, eligible immediately. Returns its id.
    pub fn enqueue(&self, payload: SyncPayload) -> Result<String> {
        let now = self.clock.now();
        let id = Uuid::now_v7().to_string();
        let message = format!(
            "Queued {} handle(s) and {} template(s) for sync",
            payload.handles.len(),
            payload.templates.len()
        );
        let item = MutationItem {
            id: id.clone(),
            payload,
            created_at: now,
            next_eligible_at: now,
            retry_count: 0,
            last_error: None,
        };

        self.mutate(|state| {
            state.queue.push(item);
            state.append_log(SyncLogKind::Queued, message, now);
            true
        })?;
        debug!("[SyncQueue] Enqueued mutation {}", id);
        Ok(id)
    }

    /// Items whose `next_eligible_at <= now`, oldest first.
    pub fn eligible_items(&self, now: DateTime<Utc>) -> Result<EligibleItems> {
        let state = self.state.lock().map_err(|_| Error::poisoned("sync queue"))?;
        Ok(EligibleItems {
            items: state.queue.clone().into_iter(),
            now,
        })
    }

    /// Full queue snapshot in FIFO order.
    pub fn pending_items(&self) -> Result<Vec<MutationItem>> {
        let state = self.state.lock().map_err(|_| Error::poisoned("sync queue"))?;
        Ok(state.queue.clone())
    }

    /// Deletes an item; unknown ids are ignored.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.mutate(|state| match state.position(id) {
            Some(index) => {
                state.queue.remove(index);
                true
            }
            None => false,
        })?;
        Ok(())
    }

    /// Applies the result of a delivery attempt to the queue and log.
    ///
    /// Outcomes for ids no longer in the queue are ignored.
    pub fn record_outcome(&self, id: &str, outcome: DeliveryOutcome) -> Result<RecordedOutcome> {
        let now = self.clock.now();
        let policy = self.policy;
        let mut recorded = RecordedOutcome::Ignored;

        self.mutate(|state| {
            let Some(index) = state.position(id) else {
                return false;
            };

            match &outcome {
                DeliveryOutcome::Success => {
                    let item = state.queue.remove(index);
                    state.append_log(
                        SyncLogKind::Success,
                        format!(
                            "Synced {} handle(s) and {} template(s)",
                            item.payload.handles.len(),
                            item.payload.templates.len()
                        ),
                        now,
                    );
                    recorded = RecordedOutcome::Delivered;
                }
                DeliveryOutcome::Failure(message) => {
                    let item = &mut state.queue[index];
                    let previous_attempts = item.retry_count;
                    item.retry_count = previous_attempts.saturating_add(1);
                    item.next_eligible_at = policy.next_eligible_at(previous_attempts, now);
                    item.last_error = Some(message.clone());
                    let retry_count = item.retry_count;
                    let next_eligible_at = item.next_eligible_at;

                    state.append_log(
                        SyncLogKind::Error,
                        format!(
                            "Sync attempt {} failed: {} (next retry at {})",
                            retry_count,
                            message,
                            next_eligible_at.to_rfc3339()
                        ),
                        now,
                    );

                    if policy.is_exhausted(retry_count) {
                        state.queue.remove(index);
                        state.append_log(
                            SyncLogKind::Failed,
                            format!(
                                "Gave up on mutation {} after {} failed attempts (retryCount={}): {}",
                                id, retry_count, retry_count, message
                            ),
                            now,
                        );
                        recorded = RecordedOutcome::Abandoned { retry_count };
                    } else {
                        recorded = RecordedOutcome::Rescheduled {
                            retry_count,
                            next_eligible_at,
                        };
                    }
                }
            }
            true
        })?;

        match &recorded {
            RecordedOutcome::Ignored => {
                debug!("[SyncQueue] Ignoring outcome for unknown mutation {}", id)
            }
            RecordedOutcome::Abandoned { retry_count } => warn!(
                "[SyncQueue] Abandoned mutation {} after {} failed attempts",
                id, retry_count
            ),
            RecordedOutcome::Rescheduled { retry_count, .. } => {
                info!("[SyncQueue] Mutation {} failed (attempt {})", id, retry_count)
            }
            RecordedOutcome::Delivered => {}
        }
        Ok(recorded)
    }

    pub fn status(&self) -> Result<SyncStatus> {
        let state = self.state.lock().map_err(|_| Error::poisoned("sync queue"))?;
        let failed = state
            .queue
            .iter()
            .filter(|item| self.policy.is_exhausted(item.retry_count))
            .count();
        let latest_is_error = state
            .log
            .last()
            .map(|entry| matches!(entry.kind, SyncLogKind::Error | SyncLogKind::Failed))
            .unwrap_or(false);
        let has_errors =
            latest_is_error || state.queue.iter().any(|item| item.last_error.is_some());

        Ok(SyncStatus {
            pending: state.queue.len(),
            failed,
            has_errors,
            log: state.log.clone(),
        })
    }

    pub fn clear_log(&self) -> Result<()> {
        self.mutate(|state| {
            let had_entries = !state.log.is_empty();
            state.log.clear();
            had_entries
        })?;
        Ok(())
    }

    /// Runs `apply` against a copy of the state; when it reports a change the
    /// copy is persisted and then becomes the live state.
    fn mutate<F>(&self, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut QueueState) -> bool,
    {
        let mut state = self.state.lock().map_err(|_| Error::poisoned("sync queue"))?;
        let mut next = state.clone();
        if !apply(&mut next) {
            return Ok(false);
        }

        self.storage.set_many(vec![
            (SYNC_QUEUE_KEY.to_string(), serde_json::to_value(&next.queue)?),
            (SYNC_LOG_KEY.to_string(), serde_json::to_value(&next.log)?),
        ])?;
        *state = next;
        Ok(true)
    }
}

/// Loads a persisted list entry by entry so one corrupt element does not
/// discard the rest.
fn load_entries<T: serde::de::DeserializeOwned>(
    storage: &dyn LocalStateStore,
    key: &str,
) -> Result<Vec<T>> {
    let Some(value) = storage.get(key)? else {
        return Ok(Vec::new());
    };
    let serde_json::Value::Array(raw_items) = value else {
        warn!("[SyncQueue] Persisted '{}' is not a list; starting empty", key);
        return Ok(Vec::new());
    };

    let mut items = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        match serde_json::from_value::<T>(raw) {
            Ok(item) => items.push(item),
            Err(err) => warn!("[SyncQueue] Dropping unreadable '{}' entry: {}", key, err),
        }
    }
    Ok(items)
}
