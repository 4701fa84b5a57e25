//! # Auto-Save Coordinator
//!
//! Watches a data snapshot for changes, debounces a save call, and
//! retries failed saves with bounded exponential backoff.
//!
//! ## State machine
//!
//! ```text
//! Idle ──change detected──▶ Saving ──success──▶ Idle
//!                             │ ▲
//!            failure, retries │ │ backoff timer fires
//!            remaining        ▼ │
//!                           Retrying
//!                             │
//!            failure, budget  │
//!            exhausted        ▼
//!                           Failed  (manual save() restarts the cycle)
//! ```
//!
//! Only one save cycle is in flight at a time; concurrent `save()`
//! calls await the same cycle's outcome instead of issuing parallel
//! requests. The last-saved snapshot advances only on success, so a
//! failed save never loses local edits - they stay unsaved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;

use crate::debounce::Debouncer;
use crate::errors::SyncError;

/// Remote save function supplied by the transport layer
pub type SaveFn<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync>;

/// Equality comparator used for change detection (true = equal)
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Lifecycle state of the save cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Saving,
    Retrying,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AutoSaveOptions {
    /// How long edits must pause before an automatic save fires
    pub debounce_delay: Duration,

    /// Retry budget for a single save cycle
    pub max_retries: u32,

    /// Base backoff delay; doubles on each consecutive failure
    pub retry_delay: Duration,
}

impl Default for AutoSaveOptions {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_secs(2),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

struct AutoSaveInner<T> {
    data: T,
    // Deep copy of the last successfully saved data, used as the diff
    // base. Advances only on confirmed success.
    last_saved: T,
    state: SaveState,
    retry_count: u32,
    last_error: Option<String>,
    last_saved_at: Option<DateTime<Utc>>,
    has_unsaved_changes: bool,
    in_flight: bool,
    cycle_seq: u64,
    closed: bool,
}

type CycleOutcome = (u64, Option<Result<(), SyncError>>);

/// Debounced auto-save coordinator with bounded retry
#[derive(Clone)]
pub struct AutoSave<T> {
    inner: Arc<Mutex<AutoSaveInner<T>>>,
    save_fn: SaveFn<T>,
    comparator: CompareFn<T>,
    options: AutoSaveOptions,
    debouncer: Debouncer,
    cycle_done: Arc<watch::Sender<CycleOutcome>>,
}

impl<T> AutoSave<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a coordinator with default options and serde-based deep
    /// equality for change detection
    pub fn new(initial: T, save_fn: SaveFn<T>) -> Self {
        Self::with_options(initial, save_fn, AutoSaveOptions::default())
    }

    pub fn with_options(initial: T, save_fn: SaveFn<T>, options: AutoSaveOptions) -> Self {
        let (cycle_done, _) = watch::channel::<CycleOutcome>((0, None));
        let debouncer = Debouncer::new(options.debounce_delay);
        Self {
            inner: Arc::new(Mutex::new(AutoSaveInner {
                data: initial.clone(),
                last_saved: initial,
                state: SaveState::Idle,
                retry_count: 0,
                last_error: None,
                last_saved_at: None,
                has_unsaved_changes: false,
                in_flight: false,
                cycle_seq: 0,
                closed: false,
            })),
            save_fn,
            comparator: Arc::new(|a: &T, b: &T| {
                serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
            }),
            options,
            debouncer,
            cycle_done: Arc::new(cycle_done),
        }
    }
}

impl<T> AutoSave<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Replace the change-detection comparator
    pub fn with_comparator(mut self, comparator: CompareFn<T>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Feed the current data snapshot to the change watcher.
    ///
    /// Recomputes `has_unsaved_changes` against the last-saved snapshot
    /// and schedules a debounced automatic save when the data is dirty.
    /// Automatic saves never fire from the `Failed` state - recovering
    /// from terminal failure requires an explicit [`save`](Self::save).
    pub fn update(&self, data: T) {
        let schedule = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.data = data;
            let dirty = !(self.comparator)(&inner.data, &inner.last_saved);
            inner.has_unsaved_changes = dirty;
            dirty && inner.state != SaveState::Failed
        };

        if schedule {
            let this = self.clone();
            self.debouncer.call(move || {
                tokio::spawn(async move {
                    // Data may have reverted to the saved state, or the
                    // cycle may have gone terminal, while the debounce
                    // was pending
                    if this.has_unsaved_changes() && this.state() != SaveState::Failed {
                        let _ = this.save().await;
                    }
                });
            });
        } else {
            self.debouncer.cancel();
        }
    }

    /// Save now, retrying failures with exponential backoff.
    ///
    /// If a cycle is already in flight this awaits that cycle's outcome
    /// instead of starting a second one. Calling from the `Failed`
    /// state restarts the cycle with a fresh retry budget.
    pub async fn save(&self) -> Result<(), SyncError> {
        // `Err(seq)` means a cycle is already in flight and we should await it;
        // `Ok(seq)` means we started a fresh cycle. The lock is released at the
        // end of this block so no guard is held across the awaits below.
        let seq = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(SyncError::Closed);
            }
            if inner.in_flight {
                Err(inner.cycle_seq)
            } else {
                inner.in_flight = true;
                inner.cycle_seq += 1;
                inner.retry_count = 0;
                inner.last_error = None;
                Ok(inner.cycle_seq)
            }
        };

        let seq = match seq {
            Err(existing) => return self.await_cycle(existing).await,
            Ok(new_seq) => new_seq,
        };

        let outcome = self.run_cycle().await;

        self.inner.lock().unwrap().in_flight = false;
        let _ = self.cycle_done.send((seq, Some(outcome.clone())));
        outcome
    }

    /// Cancel the debounce and any pending backoff so nothing saves
    /// after the consumer is gone
    pub fn shutdown(&self) {
        self.inner.lock().unwrap().closed = true;
        self.debouncer.cancel();
    }

    pub fn state(&self) -> SaveState {
        self.inner.lock().unwrap().state
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.lock().unwrap().retry_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().last_saved_at
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.lock().unwrap().has_unsaved_changes
    }

    pub fn data(&self) -> T {
        self.inner.lock().unwrap().data.clone()
    }

    async fn run_cycle(&self) -> Result<(), SyncError> {
        loop {
            let data = {
                let mut inner = self.inner.lock().unwrap();
                inner.state = SaveState::Saving;
                inner.data.clone()
            };

            match (self.save_fn)(data.clone()).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.closed {
                        // Consumer is gone; discard the result
                        return Err(SyncError::Closed);
                    }
                    inner.last_saved = data;
                    inner.last_saved_at = Some(Utc::now());
                    inner.retry_count = 0;
                    inner.last_error = None;
                    inner.state = SaveState::Idle;
                    // Edits may have landed while the save was in flight
                    let dirty = !(self.comparator)(&inner.data, &inner.last_saved);
                    inner.has_unsaved_changes = dirty;
                    return Ok(());
                }
                Err(e) => {
                    let retry_after = {
                        let mut inner = self.inner.lock().unwrap();
                        if inner.retry_count < self.options.max_retries {
                            inner.retry_count += 1;
                            inner.state = SaveState::Retrying;
                            inner.last_error = Some(format!(
                                "Save failed ({}), retrying {} of {}",
                                e, inner.retry_count, self.options.max_retries
                            ));
                            Some(self.options.retry_delay * 2u32.pow(inner.retry_count - 1))
                        } else {
                            inner.state = SaveState::Failed;
                            let attempts = inner.retry_count;
                            inner.last_error = Some(
                                SyncError::Terminal {
                                    attempts,
                                    message: e.to_string(),
                                }
                                .to_string(),
                            );
                            None
                        }
                    };

                    match retry_after {
                        Some(delay) => {
                            tracing::warn!(
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "save failed, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            if self.inner.lock().unwrap().closed {
                                return Err(SyncError::Closed);
                            }
                        }
                        None => {
                            tracing::error!(error = %e, "save failed, retry budget exhausted");
                            let attempts = self.inner.lock().unwrap().retry_count;
                            return Err(SyncError::Terminal {
                                attempts,
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn await_cycle(&self, seq: u64) -> Result<(), SyncError> {
        let mut rx = self.cycle_done.subscribe();
        loop {
            {
                let current = rx.borrow_and_update();
                if current.0 >= seq {
                    if let Some(outcome) = &current.1 {
                        return outcome.clone();
                    }
                }
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::Closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn counting_save(attempts: Arc<AtomicUsize>) -> SaveFn<String> {
        Arc::new(move |_| {
            let attempts = attempts.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_save(attempts: Arc<AtomicUsize>) -> SaveFn<String> {
        Arc::new(move |_| {
            let attempts = attempts.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Save("server unavailable".to_string()))
            })
        })
    }

    fn options(debounce_ms: u64, max_retries: u32, retry_ms: u64) -> AutoSaveOptions {
        AutoSaveOptions {
            debounce_delay: Duration::from_millis(debounce_ms),
            max_retries,
            retry_delay: Duration::from_millis(retry_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_save_fires_after_debounce() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let autosave = AutoSave::with_options(
            "v1".to_string(),
            counting_save(attempts.clone()),
            options(500, 3, 1000),
        );

        autosave.update("v2".to_string());
        assert!(autosave.has_unsaved_changes());
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!autosave.has_unsaved_changes());
        assert_eq!(autosave.state(), SaveState::Idle);
        assert!(autosave.last_saved_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_data_never_saves() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let autosave = AutoSave::with_options(
            "v1".to_string(),
            counting_save(attempts.clone()),
            options(500, 3, 1000),
        );

        autosave.update("v1".to_string());
        assert!(!autosave.has_unsaved_changes());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_backoff_schedule() {
        let times = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let save_fn: SaveFn<String> = {
            let times = times.clone();
            Arc::new(move |_| {
                let times = times.clone();
                Box::pin(async move {
                    times.lock().unwrap().push(start.elapsed());
                    Err(SyncError::Save("down".to_string()))
                })
            })
        };

        let autosave =
            AutoSave::with_options("v1".to_string(), save_fn, options(2000, 3, 1000));
        autosave.update("v2".to_string());
        let result = autosave.save().await;

        assert!(matches!(
            result,
            Err(SyncError::Terminal { attempts: 3, .. })
        ));
        assert_eq!(autosave.state(), SaveState::Failed);
        assert_eq!(autosave.retry_count(), 3);
        assert!(autosave.last_error().unwrap().contains("after 3 attempts"));

        // Initial attempt plus 3 retries with 1s/2s/4s backoff gaps
        let times = times.lock().unwrap();
        assert_eq!(
            *times,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(1000),
                Duration::from_millis(3000),
                Duration::from_millis(7000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_state_surfaces_transient_error() {
        let should_fail = Arc::new(AtomicBool::new(true));
        let save_fn: SaveFn<String> = {
            let should_fail = should_fail.clone();
            Arc::new(move |_| {
                let should_fail = should_fail.clone();
                Box::pin(async move {
                    if should_fail.swap(false, Ordering::SeqCst) {
                        Err(SyncError::Save("flaky".to_string()))
                    } else {
                        Ok(())
                    }
                })
            })
        };

        let autosave =
            AutoSave::with_options("v1".to_string(), save_fn, options(2000, 3, 1000));
        autosave.update("v2".to_string());

        let handle = tokio::spawn({
            let autosave = autosave.clone();
            async move { autosave.save().await }
        });

        // Mid-backoff after the first failure
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(autosave.state(), SaveState::Retrying);
        assert!(autosave.last_error().unwrap().contains("retrying 1 of 3"));

        handle.await.unwrap().unwrap();
        assert_eq!(autosave.state(), SaveState::Idle);
        assert_eq!(autosave.retry_count(), 0);
        assert!(autosave.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_blocks_auto_saves_until_manual_save() {
        let should_fail = Arc::new(AtomicBool::new(true));
        let attempts = Arc::new(AtomicUsize::new(0));
        let save_fn: SaveFn<String> = {
            let should_fail = should_fail.clone();
            let attempts = attempts.clone();
            Arc::new(move |_| {
                let should_fail = should_fail.clone();
                let attempts = attempts.clone();
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if should_fail.load(Ordering::SeqCst) {
                        Err(SyncError::Save("down".to_string()))
                    } else {
                        Ok(())
                    }
                })
            })
        };

        let autosave =
            AutoSave::with_options("v1".to_string(), save_fn, options(100, 1, 100));
        autosave.update("v2".to_string());
        assert!(autosave.save().await.is_err());
        assert_eq!(autosave.state(), SaveState::Failed);
        let after_terminal = attempts.load(Ordering::SeqCst);

        // Further edits must not silently retry from Failed
        autosave.update("v3".to_string());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), after_terminal);
        assert!(autosave.has_unsaved_changes());

        // Manual save restarts the cycle with a fresh budget
        should_fail.store(false, Ordering::SeqCst);
        autosave.save().await.unwrap();
        assert_eq!(autosave.state(), SaveState::Idle);
        assert_eq!(autosave.retry_count(), 0);
        assert!(!autosave.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_saves_share_one_cycle() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let save_fn: SaveFn<String> = {
            let attempts = attempts.clone();
            Arc::new(move |_| {
                let attempts = attempts.clone();
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
            })
        };

        let autosave =
            AutoSave::with_options("v1".to_string(), save_fn, options(2000, 3, 1000));
        autosave.update("v2".to_string());

        let first = tokio::spawn({
            let autosave = autosave.clone();
            async move { autosave.save().await }
        });
        let second = tokio::spawn({
            let autosave = autosave.clone();
            async move { autosave.save().await }
        });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_saved_only_advances_on_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let autosave = AutoSave::with_options(
            "v1".to_string(),
            failing_save(attempts.clone()),
            options(2000, 0, 1000),
        );

        autosave.update("v2".to_string());
        assert!(autosave.save().await.is_err());

        // Diff base unchanged: the edit is still unsaved, not lost
        assert!(autosave.has_unsaved_changes());
        assert!(autosave.last_saved_at().is_none());
        assert_eq!(autosave.data(), "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_save() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let autosave = AutoSave::with_options(
            "v1".to_string(),
            counting_save(attempts.clone()),
            options(500, 3, 1000),
        );

        autosave.update("v2".to_string());
        autosave.shutdown();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert!(matches!(autosave.save().await, Err(SyncError::Closed)));
    }
}
