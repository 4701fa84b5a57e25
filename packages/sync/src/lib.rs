//! # Atelier Sync
//!
//! Optimistic-update / auto-save synchronization engine for the
//! Atelier admin content editors.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ debounce: rate-limiting primitives          │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ tracked: per-field optimistic state         │
//! │ autosave: debounced save + bounded retry    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ realtime: pending-update queue + batching,  │
//! │ presence, conflict resolution, metrics      │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ remote: ContentChannel boundary             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Baselines advance only on confirmed saves**: never optimistically
//! 2. **Last-write-wins per field**: only the final value of a burst is sent
//! 3. **Failed updates stay pending**: unsaved, never lost
//! 4. **Presence is advisory**: lossy, unordered relative to data
//! 5. **One engine instance per edited entity**: no process-wide state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use atelier_sync::{MemoryChannel, Priority, RealtimeSync};
//!
//! let channel = Arc::new(MemoryChannel::new());
//! let sync = RealtimeSync::new(channel, "service", "svc-42");
//!
//! sync.start_field_editing("title");
//! sync.send_update("title", json!("Branding"), Priority::Medium).await?;
//!
//! // High priority bypasses the debounce entirely
//! sync.send_update("status", json!("published"), Priority::High).await?;
//!
//! sync.cleanup();
//! ```

mod autosave;
mod config;
mod debounce;
mod errors;
mod realtime;
mod remote;
mod tracked;

#[cfg(test)]
mod tests_burst_editing;

pub use autosave::{AutoSave, AutoSaveOptions, CompareFn, SaveFn, SaveState};
pub use config::{AutoSaveConfig, RealtimeConfig, SyncConfig, DEFAULT_CONFIG_NAME};
pub use debounce::{Debouncer, Throttler};
pub use errors::SyncError;
pub use realtime::{
    ConflictResolution, ConnectionStatus, PendingUpdate, Priority, RealtimeOptions, RealtimeSync,
    SyncMetrics,
};
pub use remote::{ContentChannel, EditorInfo, FieldChange, MemoryChannel, SentBatch};
pub use tracked::{CommitFn, TrackedValue, ValidatorFn};
