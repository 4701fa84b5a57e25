//! # Remote Content Channel
//!
//! The engine's boundary to the external content store. The engine
//! only calls [`ContentChannel::subscribe`]/[`ContentChannel::unsubscribe`]
//! at create/cleanup time and never interprets the channel's internal
//! protocol; presence and connectivity are consumed as read-only
//! inputs.
//!
//! [`MemoryChannel`] implements the trait in memory for tests and
//! demos, with settable connectivity and failure injection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SyncError;

/// One entry of a remote change-set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub new_value: Value,
    pub timestamp: i64,
}

/// Presence record for a remote editor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorInfo {
    pub editor_id: String,

    /// Field the editor is currently in, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Abstract channel to the remote content store
pub trait ContentChannel: Send + Sync {
    /// Open the channel for one (content_type, content_id) entity
    fn subscribe(&self, content_type: &str, content_id: &str);

    /// Close the channel
    fn unsubscribe(&self);

    /// Submit a change-set as one batch. Resolves on durable
    /// acceptance; errors on any failure (network, validation,
    /// conflict).
    fn send_batch(
        &self,
        changes: Vec<FieldChange>,
        batch_id: &str,
    ) -> BoxFuture<'static, Result<(), SyncError>>;

    /// Fire-and-forget presence signal; lossy, advisory
    fn signal_editing(&self, field: &str, editing: bool);

    /// Presence list echoed by the remote channel
    fn active_editors(&self) -> Vec<EditorInfo>;

    fn is_connected(&self) -> bool;
}

/// A batch recorded by [`MemoryChannel`]
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub batch_id: String,
    pub changes: Vec<FieldChange>,
}

enum FailureMode {
    None,
    Always(String),
    Next(u32, String),
}

struct MemoryChannelState {
    subscribed: Option<(String, String)>,
    batches: Vec<SentBatch>,
    presence: Vec<(String, bool)>,
    editors: Vec<EditorInfo>,
    connected: bool,
    failure: FailureMode,
    latency: Duration,
}

/// In-memory channel for tests and demos
#[derive(Clone)]
pub struct MemoryChannel {
    state: Arc<Mutex<MemoryChannelState>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryChannelState {
                subscribed: None,
                batches: Vec::new(),
                presence: Vec::new(),
                editors: Vec::new(),
                connected: true,
                failure: FailureMode::None,
                latency: Duration::ZERO,
            })),
        }
    }

    /// Every subsequent batch fails with this message
    pub fn fail_always(&self, message: &str) {
        self.state.lock().unwrap().failure = FailureMode::Always(message.to_string());
    }

    /// The next `count` batches fail, then sends succeed again
    pub fn fail_next(&self, count: u32, message: &str) {
        self.state.lock().unwrap().failure = FailureMode::Next(count, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failure = FailureMode::None;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    /// Simulated network latency per batch
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    pub fn set_active_editors(&self, editors: Vec<EditorInfo>) {
        self.state.lock().unwrap().editors = editors;
    }

    pub fn sent_batches(&self) -> Vec<SentBatch> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn batch_count(&self) -> usize {
        self.state.lock().unwrap().batches.len()
    }

    /// Recorded `(field, editing)` presence signals, in arrival order
    pub fn presence_events(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().presence.clone()
    }

    pub fn subscribed(&self) -> Option<(String, String)> {
        self.state.lock().unwrap().subscribed.clone()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentChannel for MemoryChannel {
    fn subscribe(&self, content_type: &str, content_id: &str) {
        self.state.lock().unwrap().subscribed =
            Some((content_type.to_string(), content_id.to_string()));
    }

    fn unsubscribe(&self) {
        self.state.lock().unwrap().subscribed = None;
    }

    fn send_batch(
        &self,
        changes: Vec<FieldChange>,
        batch_id: &str,
    ) -> BoxFuture<'static, Result<(), SyncError>> {
        let state = self.state.clone();
        let batch_id = batch_id.to_string();
        Box::pin(async move {
            let (latency, outcome) = {
                let mut guard = state.lock().unwrap();
                if !guard.connected {
                    return Err(SyncError::Save("channel disconnected".to_string()));
                }
                let (outcome, next_mode) =
                    match std::mem::replace(&mut guard.failure, FailureMode::None) {
                        FailureMode::None => (Ok(()), FailureMode::None),
                        FailureMode::Always(message) => (
                            Err(SyncError::Save(message.clone())),
                            FailureMode::Always(message),
                        ),
                        FailureMode::Next(0, _) => (Ok(()), FailureMode::None),
                        FailureMode::Next(remaining, message) => (
                            Err(SyncError::Save(message.clone())),
                            if remaining == 1 {
                                FailureMode::None
                            } else {
                                FailureMode::Next(remaining - 1, message)
                            },
                        ),
                    };
                guard.failure = next_mode;
                (guard.latency, outcome)
            };

            if latency > Duration::ZERO {
                tokio::time::sleep(latency).await;
            }
            outcome?;

            state.lock().unwrap().batches.push(SentBatch { batch_id, changes });
            Ok(())
        })
    }

    fn signal_editing(&self, field: &str, editing: bool) {
        self.state
            .lock()
            .unwrap()
            .presence
            .push((field.to_string(), editing));
    }

    fn active_editors(&self) -> Vec<EditorInfo> {
        self.state.lock().unwrap().editors.clone()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}
