//! # Optimistic Realtime Sync
//!
//! Top-level orchestrator for the admin editors: maintains a
//! priority-ordered pending-update queue keyed by field, batches and
//! flushes it (immediately for high priority, debounced otherwise),
//! signals editing presence, and exposes conflict-resolution entry
//! points.
//!
//! One orchestrator instance owns the pending map and baseline for its
//! (content_type, content_id) entity: it subscribes the channel at
//! construction and unsubscribes at [`cleanup`](RealtimeSync::cleanup).
//!
//! A failed flush clears nothing - still-pending entries are picked up
//! by the next flush cycle. Retry policy is layered on top by callers
//! (see [`AutoSave`](crate::AutoSave)).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use atelier_common::{timestamp_millis, unique_id};

use crate::debounce::{Debouncer, Throttler};
use crate::errors::SyncError;
use crate::remote::{ContentChannel, FieldChange};

/// Update priority, ordered via an explicit rank table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

/// One queued edit awaiting a flush. At most one exists per field; a
/// newer edit to the same field replaces the older entry.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub id: String,
    pub field: String,
    pub value: Value,
    pub timestamp: i64,
    pub priority: Priority,
    // Monotonic tie-breaker for edits landing in the same millisecond
    pub(crate) seq: u64,
}

/// How to resolve a local/remote conflict on a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Re-submit the pending local value at high priority
    KeepLocal,
    /// Discard the pending local entry; the remote value is
    /// authoritative going forward
    TakeRemote,
    /// Defaults to keep-local; callers run custom merge logic before
    /// calling through
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Stale,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Stale => "stale",
            ConnectionStatus::Disconnected => "disconnected",
        };
        write!(f, "{}", label)
    }
}

/// Read-only derived view of engine health. Never mutates state.
#[derive(Debug, Clone)]
pub struct SyncMetrics {
    pub healthy: bool,
    pub status: ConnectionStatus,
    pub pending_updates: usize,
    pub in_flight_updates: usize,
    pub active_editors: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RealtimeOptions {
    /// Debounce window for non-high-priority flushes
    pub update_debounce: Duration,

    /// Bound on distinct pending fields; exceeding it evicts the
    /// oldest-by-timestamp entry
    pub max_pending_updates: usize,

    /// A successful flush older than this marks the connection stale
    pub staleness_threshold: Duration,

    pub start_editing_throttle: Duration,
    pub stop_editing_throttle: Duration,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            update_debounce: Duration::from_millis(500),
            max_pending_updates: 50,
            staleness_threshold: Duration::from_secs(30),
            start_editing_throttle: Duration::from_secs(1),
            stop_editing_throttle: Duration::from_millis(500),
        }
    }
}

struct RealtimeInner {
    pending: HashMap<String, PendingUpdate>,
    // Last remotely-confirmed value per field; updates equal to their
    // baseline are suppressed
    baseline: HashMap<String, Value>,
    in_flight: usize,
    last_flush_at: Option<Instant>,
    next_seq: u64,
    closed: bool,
}

/// Optimistic batching orchestrator over a [`ContentChannel`]
#[derive(Clone)]
pub struct RealtimeSync {
    channel: Arc<dyn ContentChannel>,
    options: RealtimeOptions,
    inner: Arc<Mutex<RealtimeInner>>,
    // Overlapping flushes queue here instead of interleaving
    flush_gate: Arc<tokio::sync::Mutex<()>>,
    debouncer: Debouncer,
    start_throttle: Throttler,
    stop_throttle: Throttler,
}

impl RealtimeSync {
    /// Subscribe to an entity with default options
    pub fn new(channel: Arc<dyn ContentChannel>, content_type: &str, content_id: &str) -> Self {
        Self::with_options(channel, content_type, content_id, RealtimeOptions::default())
    }

    pub fn with_options(
        channel: Arc<dyn ContentChannel>,
        content_type: &str,
        content_id: &str,
        options: RealtimeOptions,
    ) -> Self {
        channel.subscribe(content_type, content_id);
        Self {
            channel,
            options,
            inner: Arc::new(Mutex::new(RealtimeInner {
                pending: HashMap::new(),
                baseline: HashMap::new(),
                in_flight: 0,
                last_flush_at: None,
                next_seq: 0,
                closed: false,
            })),
            flush_gate: Arc::new(tokio::sync::Mutex::new(())),
            debouncer: Debouncer::new(options.update_debounce),
            start_throttle: Throttler::new(options.start_editing_throttle),
            stop_throttle: Throttler::new(options.stop_editing_throttle),
        }
    }

    /// Queue an edit for a field.
    ///
    /// Last-write-wins per field: a newer edit replaces the field's
    /// pending entry. High priority flushes the entire pending batch
    /// immediately; anything else schedules the debounced flush. An
    /// edit equal to the field's baseline is suppressed.
    pub async fn send_update(
        &self,
        field: &str,
        value: Value,
        priority: Priority,
    ) -> Result<(), SyncError> {
        let flush_now = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(SyncError::Closed);
            }
            if inner.baseline.get(field) == Some(&value) {
                tracing::debug!(field, "update equals baseline, suppressed");
                return Ok(());
            }

            if !inner.pending.contains_key(field)
                && inner.pending.len() >= self.options.max_pending_updates
            {
                let oldest = inner
                    .pending
                    .values()
                    .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)))
                    .map(|update| update.field.clone());
                if let Some(oldest_field) = oldest {
                    tracing::warn!(
                        field = %oldest_field,
                        "pending update limit reached, evicting oldest entry"
                    );
                    inner.pending.remove(&oldest_field);
                }
            }

            inner.next_seq += 1;
            let update = PendingUpdate {
                id: unique_id("upd"),
                field: field.to_string(),
                value,
                timestamp: timestamp_millis(),
                priority,
                seq: inner.next_seq,
            };
            inner.pending.insert(field.to_string(), update);
            priority == Priority::High
        };

        if flush_now {
            self.flush().await?;
        } else {
            let this = self.clone();
            self.debouncer.call(move || {
                tokio::spawn(async move {
                    let _ = this.flush().await;
                });
            });
        }
        Ok(())
    }

    /// Flush all pending entries as one batch.
    ///
    /// The batch is ordered by priority descending then timestamp
    /// ascending; the per-field pending map already deduplicates.
    /// On success exactly the flushed entries are cleared - a same-field
    /// entry replaced during network latency keeps its newer pending
    /// entry - and the per-field baseline advances. On failure nothing
    /// is cleared.
    pub async fn flush(&self) -> Result<usize, SyncError> {
        let _gate = self.flush_gate.lock().await;

        let batch = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(SyncError::Closed);
            }
            if inner.pending.is_empty() {
                return Ok(0);
            }
            let mut batch: Vec<PendingUpdate> = inner.pending.values().cloned().collect();
            batch.sort_by(|a, b| {
                b.priority
                    .rank()
                    .cmp(&a.priority.rank())
                    .then(a.timestamp.cmp(&b.timestamp))
                    .then(a.seq.cmp(&b.seq))
            });
            inner.in_flight = batch.len();
            batch
        };

        let changes: Vec<FieldChange> = batch
            .iter()
            .map(|update| FieldChange {
                field: update.field.clone(),
                new_value: update.value.clone(),
                timestamp: update.timestamp,
            })
            .collect();
        let batch_id = unique_id("batch");
        tracing::debug!(batch_id = %batch_id, changes = changes.len(), "flushing update batch");

        match self.channel.send_batch(changes, &batch_id).await {
            Ok(()) => {
                let mut inner = self.inner.lock().unwrap();
                inner.in_flight = 0;
                for update in &batch {
                    let still_same = inner
                        .pending
                        .get(&update.field)
                        .map(|current| current.seq == update.seq)
                        .unwrap_or(false);
                    if still_same {
                        inner.pending.remove(&update.field);
                    }
                    inner
                        .baseline
                        .insert(update.field.clone(), update.value.clone());
                }
                inner.last_flush_at = Some(Instant::now());
                Ok(batch.len())
            }
            Err(e) => {
                self.inner.lock().unwrap().in_flight = 0;
                tracing::warn!(
                    batch_id = %batch_id,
                    error = %e,
                    "batch flush failed, entries remain pending"
                );
                Err(e)
            }
        }
    }

    /// Throttled presence signal; lossy and advisory, never blocks or
    /// reorders data updates
    pub fn start_field_editing(&self, field: &str) {
        if self.inner.lock().unwrap().closed {
            return;
        }
        let channel = self.channel.clone();
        let field = field.to_string();
        self.start_throttle
            .call(move || channel.signal_editing(&field, true));
    }

    pub fn stop_field_editing(&self, field: &str) {
        if self.inner.lock().unwrap().closed {
            return;
        }
        let channel = self.channel.clone();
        let field = field.to_string();
        self.stop_throttle
            .call(move || channel.signal_editing(&field, false));
    }

    /// Resolve a conflict the collaborator layer detected. The engine
    /// never guesses a resolution.
    pub async fn resolve_conflict(
        &self,
        field: &str,
        resolution: ConflictResolution,
    ) -> Result<(), SyncError> {
        match resolution {
            ConflictResolution::TakeRemote => {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(SyncError::Closed);
                }
                inner.pending.remove(field);
                Ok(())
            }
            ConflictResolution::KeepLocal | ConflictResolution::Merge => {
                let local = {
                    let inner = self.inner.lock().unwrap();
                    if inner.closed {
                        return Err(SyncError::Closed);
                    }
                    inner.pending.get(field).map(|update| update.value.clone())
                };
                match local {
                    Some(value) => self.send_update(field, value, Priority::High).await,
                    None => Ok(()),
                }
            }
        }
    }

    /// Record a remotely-confirmed value for a field (remote echo or
    /// conflict-resolution input). Pending local edits are untouched.
    pub fn note_remote_value(&self, field: &str, value: Value) {
        self.inner
            .lock()
            .unwrap()
            .baseline
            .insert(field.to_string(), value);
    }

    /// Read-only health and queue view
    pub fn metrics(&self) -> SyncMetrics {
        let inner = self.inner.lock().unwrap();
        let connected = self.channel.is_connected();
        // A never-flushed engine is not stale
        let fresh = inner
            .last_flush_at
            .map(|at| at.elapsed() < self.options.staleness_threshold)
            .unwrap_or(true);
        let status = if !connected {
            ConnectionStatus::Disconnected
        } else if !fresh {
            ConnectionStatus::Stale
        } else {
            ConnectionStatus::Connected
        };
        SyncMetrics {
            healthy: connected && fresh,
            status,
            pending_updates: inner.pending.len(),
            in_flight_updates: inner.in_flight,
            active_editors: self.channel.active_editors().len(),
        }
    }

    /// Clear all pending state and unsubscribe. Idempotent.
    pub fn cleanup(&self) {
        let newly_closed = {
            let mut inner = self.inner.lock().unwrap();
            let newly = !inner.closed;
            inner.closed = true;
            inner.pending.clear();
            inner.in_flight = 0;
            newly
        };
        self.debouncer.cancel();
        if newly_closed {
            self.channel.unsubscribe();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Fields with a pending entry, sorted for stable inspection
    pub fn pending_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.inner.lock().unwrap().pending.keys().cloned().collect();
        fields.sort();
        fields
    }

    pub fn baseline_value(&self, field: &str) -> Option<Value> {
        self.inner.lock().unwrap().baseline.get(field).cloned()
    }
}
