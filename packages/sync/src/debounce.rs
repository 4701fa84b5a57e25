//! # Debounce/Throttle Primitives
//!
//! Generic rate-limiting wrappers used by the rest of the engine.
//!
//! A [`Debouncer`] delays execution until calls pause for a fixed
//! interval; only the last call in a burst executes. A [`Throttler`]
//! runs on the leading edge and silently drops calls arriving inside
//! the interval. Neither retries nor handles errors - that is layered
//! by callers.
//!
//! Both are driven by `tokio::time`, so tests can run them on the
//! paused clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct DebounceShared {
    delay: Duration,
    // Latest-callback cell: the timer always takes the most recent
    // callback from here, never a stale closure. The generation stored
    // alongside lets a timer that raced past its abort detect it has
    // been superseded.
    pending: Mutex<Option<(u64, Callback)>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl Drop for DebounceShared {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

/// Debounced callback scheduler.
///
/// Clones share the same window: a `call` through one clone supersedes
/// a pending callback scheduled through another.
#[derive(Clone)]
pub struct Debouncer {
    shared: Arc<DebounceShared>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            shared: Arc::new(DebounceShared {
                delay,
                pending: Mutex::new(None),
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule `f` to run after the delay, superseding any previously
    /// scheduled callback. Only the last call within a window executes.
    pub fn call<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.pending.lock().unwrap() = Some((generation, Box::new(f)));

        let mut timer = self.shared.timer.lock().unwrap();
        if let Some(handle) = timer.take() {
            handle.abort();
        }

        let shared = self.shared.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.delay).await;
            let callback = {
                let mut pending = shared.pending.lock().unwrap();
                match pending.take() {
                    Some((stored, callback)) if stored == generation => Some(callback),
                    // A newer call owns the cell now; put it back
                    other => {
                        *pending = other;
                        None
                    }
                }
            };
            if let Some(callback) = callback {
                callback();
            }
        }));
    }

    /// Drop the pending callback and cancel its timer.
    pub fn cancel(&self) {
        if let Some(handle) = self.shared.timer.lock().unwrap().take() {
            handle.abort();
        }
        *self.shared.pending.lock().unwrap() = None;
    }

    /// Run the pending callback immediately, bypassing the delay.
    pub fn flush(&self) {
        if let Some(handle) = self.shared.timer.lock().unwrap().take() {
            handle.abort();
        }
        let callback = self.shared.pending.lock().unwrap().take();
        if let Some((_, callback)) = callback {
            callback();
        }
    }

    /// Whether a callback is currently scheduled.
    pub fn is_pending(&self) -> bool {
        self.shared.pending.lock().unwrap().is_some()
    }
}

struct ThrottleShared {
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

/// Leading-edge throttle.
///
/// Executes immediately when at least `interval` has elapsed since the
/// last execution and drops the call otherwise. There is no trailing
/// call, so nothing is left to fire after the owner is gone.
#[derive(Clone)]
pub struct Throttler {
    shared: Arc<ThrottleShared>,
}

impl Throttler {
    pub fn new(interval: Duration) -> Self {
        Self {
            shared: Arc::new(ThrottleShared {
                interval,
                last_run: Mutex::new(None),
            }),
        }
    }

    /// Run `f` if the interval has elapsed. Returns whether it ran.
    pub fn call<F>(&self, f: F) -> bool
    where
        F: FnOnce(),
    {
        let now = Instant::now();
        {
            let mut last_run = self.shared.last_run.lock().unwrap();
            if let Some(prev) = *last_run {
                if now.duration_since(prev) < self.shared.interval {
                    return false;
                }
            }
            *last_run = Some(now);
        }
        f();
        true
    }

    /// Clear the last-execution mark so the next call runs immediately.
    pub fn reset(&self) {
        *self.shared.last_run.lock().unwrap() = None;
    }
}
