//! Drives the sync engine through a short editing session against an
//! in-memory channel.
//!
//! Run with: cargo run -p atelier-sync --example editing_session

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use atelier_sync::{
    AutoSave, AutoSaveOptions, ContentChannel, FieldChange, MemoryChannel, Priority,
    RealtimeSync, SaveFn,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let channel = MemoryChannel::new();
    let sync = RealtimeSync::new(Arc::new(channel.clone()), "service", "svc-42");

    // An editor opens the title field and types a few keystrokes
    sync.start_field_editing("title");
    for text in ["B", "Br", "Brand", "Branding refresh"] {
        sync.send_update("title", json!(text), Priority::Medium)
            .await?;
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
    sync.stop_field_editing("title");

    // The debounced flush collapses the burst into one batch
    tokio::time::sleep(Duration::from_millis(600)).await;
    tracing::info!(batches = channel.batch_count(), "after debounced flush");

    // Publishing is high priority and flushes immediately
    sync.send_update("status", json!("published"), Priority::High)
        .await?;
    tracing::info!(batches = channel.batch_count(), "after publish");

    // Layer the auto-save coordinator over the same channel for the
    // long-form body, riding out two transient failures
    channel.fail_next(2, "gateway timeout");
    let save_fn: SaveFn<String> = {
        let channel = channel.clone();
        Arc::new(move |body: String| {
            let channel = channel.clone();
            Box::pin(async move {
                let change = FieldChange {
                    field: "body".to_string(),
                    new_value: json!(body),
                    timestamp: atelier_common::timestamp_millis(),
                };
                channel
                    .send_batch(vec![change], &atelier_common::unique_id("autosave"))
                    .await
            })
        })
    };
    let autosave = AutoSave::with_options(
        String::new(),
        save_fn,
        AutoSaveOptions {
            retry_delay: Duration::from_millis(200),
            ..Default::default()
        },
    );
    autosave.update("Our studio reworked the entire brand system.".to_string());
    autosave.save().await?;
    tracing::info!(
        saved_at = ?autosave.last_saved_at(),
        "body saved after retries"
    );

    let metrics = sync.metrics();
    tracing::info!(
        status = %metrics.status,
        pending = metrics.pending_updates,
        "session metrics"
    );

    sync.cleanup();
    Ok(())
}
