//! # Optimized State Container
//!
//! Per-field local state with validation, dirty-tracking, and a
//! debounced commit to a remote update function.
//!
//! A [`TrackedValue`] owns the current in-memory value plus the
//! baseline (last value confirmed by the remote store). Accepted edits
//! apply optimistically and schedule a debounced commit; rapid edits
//! inside the window collapse into a single commit carrying the final
//! value. The baseline only advances after a commit succeeds.
//!
//! ```rust,ignore
//! let title = TrackedValue::new("Untitled".to_string(), commit_fn, Duration::from_millis(300))?;
//!
//! title.set("Branding refresh".to_string())?;
//! // ...debounce window elapses, commit_fn fires with the final value
//!
//! title.commit_now().await?; // bypass the debounce
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::debounce::Debouncer;
use crate::errors::SyncError;

/// Remote commit function supplied by the transport layer
pub type CommitFn<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync>;

/// Field validator; false rejects the proposed value
pub type ValidatorFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct TrackedInner<T> {
    value: T,
    baseline: T,
    // Serialized baseline, kept for the change-detection short-circuit
    baseline_json: String,
    has_changes: bool,
    error: Option<String>,
}

/// Dirty-tracked value with a debounced remote commit
#[derive(Clone)]
pub struct TrackedValue<T> {
    inner: Arc<Mutex<TrackedInner<T>>>,
    commit: CommitFn<T>,
    validator: Option<ValidatorFn<T>>,
    debouncer: Debouncer,
}

impl<T> TrackedValue<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a container whose initial value becomes the baseline
    pub fn new(
        initial: T,
        commit: CommitFn<T>,
        debounce_delay: Duration,
    ) -> Result<Self, SyncError> {
        let baseline_json = serde_json::to_string(&initial)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(TrackedInner {
                value: initial.clone(),
                baseline: initial,
                baseline_json,
                has_changes: false,
                error: None,
            })),
            commit,
            validator: None,
            debouncer: Debouncer::new(debounce_delay),
        })
    }

    /// Attach a validator applied to every proposed value
    pub fn with_validator(mut self, validator: ValidatorFn<T>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set a new value.
    ///
    /// Rejected values leave state unchanged and set the error flag.
    /// A value whose serialized form equals the last-committed value is
    /// a no-op: nothing is scheduled and the dirty flag stays clear.
    /// Otherwise the value applies optimistically and a debounced
    /// commit is scheduled with whatever value is current at fire time.
    pub fn set(&self, next: T) -> Result<(), SyncError> {
        if let Some(validator) = &self.validator {
            if !validator(&next) {
                let mut inner = self.inner.lock().unwrap();
                inner.error = Some("Validation failed".to_string());
                return Err(SyncError::Validation(
                    "Value rejected by validator".to_string(),
                ));
            }
        }

        let next_json = serde_json::to_string(&next)?;
        {
            let mut inner = self.inner.lock().unwrap();
            if next_json == inner.baseline_json {
                // No-op: equal to the last committed value
                return Ok(());
            }
            inner.value = next;
            inner.has_changes = true;
            inner.error = None;
        }

        self.schedule_commit();
        Ok(())
    }

    /// Set via an updater over the previous value
    pub fn update<F>(&self, updater: F) -> Result<(), SyncError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let inner = self.inner.lock().unwrap();
            updater(&inner.value)
        };
        self.set(next)
    }

    /// Restore the last committed baseline. Synchronous, no network.
    pub fn reset(&self) {
        self.debouncer.cancel();
        let mut inner = self.inner.lock().unwrap();
        inner.value = inner.baseline.clone();
        inner.has_changes = false;
        inner.error = None;
    }

    /// Bypass the debounce and commit the current value immediately.
    ///
    /// On success the baseline advances and the dirty flag clears. On
    /// failure the error flag is set and the local value is retained;
    /// the caller decides between retrying and [`reset`](Self::reset).
    pub async fn commit_now(&self) -> Result<(), SyncError> {
        self.debouncer.cancel();
        let value = {
            let inner = self.inner.lock().unwrap();
            inner.value.clone()
        };

        match (self.commit)(value.clone()).await {
            Ok(()) => {
                self.reconcile_committed(value);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn get(&self) -> T {
        self.inner.lock().unwrap().value.clone()
    }

    pub fn has_changes(&self) -> bool {
        self.inner.lock().unwrap().has_changes
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    fn schedule_commit(&self) {
        let this = self.clone();
        self.debouncer.call(move || {
            tokio::spawn(async move {
                // Commit whatever value is current at fire time
                let value = this.get();
                tracing::debug!("committing debounced value");
                match (this.commit)(value.clone()).await {
                    Ok(()) => this.reconcile_committed(value),
                    Err(e) => {
                        tracing::warn!(error = %e, "debounced commit failed");
                        this.inner.lock().unwrap().error = Some(e.to_string());
                    }
                }
            });
        });
    }

    // Advance the baseline to a value the remote store confirmed
    fn reconcile_committed(&self, committed: T) {
        let mut inner = self.inner.lock().unwrap();
        if let Ok(json) = serde_json::to_string(&committed) {
            inner.baseline_json = json;
        }
        inner.baseline = committed;
        // Edits may have landed while the commit was in flight
        let current_json = serde_json::to_string(&inner.value).ok();
        let has_changes = match current_json {
            Some(current) => current != inner.baseline_json,
            None => true,
        };
        inner.has_changes = has_changes;
        if !inner.has_changes {
            inner.error = None;
        }
    }
}
