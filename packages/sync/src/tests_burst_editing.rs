/// Burst Editing Simulation Tests
///
/// These tests simulate real-world editing sessions where fields are
/// typed into keystroke by keystroke. The engine must:
/// 1. Collapse each burst into a single remote commit per field
/// 2. Never lose edits that land while a save is in flight
/// 3. Keep the pending set bounded during sustained bursts
/// 4. Keep presence churn from flooding the channel

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::remote::MemoryChannel;
use crate::realtime::{Priority, RealtimeOptions, RealtimeSync};
use crate::tracked::{CommitFn, TrackedValue};

/// Helper to create an engine over a fresh in-memory channel
fn create_engine(options: RealtimeOptions) -> (MemoryChannel, RealtimeSync) {
    let channel = MemoryChannel::new();
    let sync = RealtimeSync::with_options(
        Arc::new(channel.clone()),
        "blog_post",
        "post-7",
        options,
    );
    (channel, sync)
}

/// Helper to type a string into a field one keystroke at a time
async fn type_into_field(
    sync: &RealtimeSync,
    field: &str,
    text: &str,
    keystroke_gap: Duration,
) {
    for end in 1..=text.len() {
        sync.send_update(field, json!(&text[..end]), Priority::Medium)
            .await
            .unwrap();
        tokio::time::sleep(keystroke_gap).await;
    }
}

#[cfg(test)]
mod burst_editing_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_typing_a_sentence_flushes_once_with_final_text() {
        let (channel, sync) = create_engine(RealtimeOptions {
            update_debounce: Duration::from_millis(500),
            ..Default::default()
        });

        // 12 keystrokes, 50ms apart - all inside the debounce window
        type_into_field(&sync, "title", "Hello Studio", Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        let batches = channel.sent_batches();
        assert_eq!(batches.len(), 1, "burst must collapse into one flush");
        assert_eq!(batches[0].changes.len(), 1);
        assert_eq!(batches[0].changes[0].new_value, json!("Hello Studio"));
        assert_eq!(sync.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_editing_two_fields_in_parallel_dedupes_by_field() {
        let (channel, sync) = create_engine(RealtimeOptions {
            update_debounce: Duration::from_millis(500),
            ..Default::default()
        });

        // Interleaved keystrokes across two fields
        for (title, summary) in [("R", "d"), ("Re", "de"), ("Red", "des"), ("Redo", "desk")] {
            sync.send_update("title", json!(title), Priority::Medium)
                .await
                .unwrap();
            sync.send_update("summary", json!(summary), Priority::Medium)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        tokio::time::sleep(Duration::from_millis(600)).await;

        let batches = channel.sent_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].changes.len(), 2, "one change per field");

        let title = batches[0]
            .changes
            .iter()
            .find(|c| c.field == "title")
            .unwrap();
        let summary = batches[0]
            .changes
            .iter()
            .find(|c| c.field == "summary")
            .unwrap();
        assert_eq!(title.new_value, json!("Redo"));
        assert_eq!(summary.new_value, json!("desk"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_burst_stays_within_pending_bound() {
        let (_channel, sync) = create_engine(RealtimeOptions {
            update_debounce: Duration::from_secs(60),
            max_pending_updates: 5,
            ..Default::default()
        });

        // 20 distinct fields arrive without a flush ever firing
        for i in 0..20 {
            sync.send_update(&format!("field_{}", i), json!(i), Priority::Low)
                .await
                .unwrap();
        }

        assert_eq!(sync.pending_len(), 5);
        // The survivors are the 5 newest entries
        let fields = sync.pending_fields();
        for i in 15..20 {
            assert!(fields.contains(&format!("field_{}", i)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_landing_mid_flush_are_not_lost() {
        let (channel, sync) = create_engine(RealtimeOptions {
            update_debounce: Duration::from_millis(200),
            ..Default::default()
        });
        channel.set_latency(Duration::from_millis(400));

        sync.send_update("body", json!("first paragraph"), Priority::Medium)
            .await
            .unwrap();

        // Flush starts at 200ms; more typing lands while it is in flight
        tokio::time::sleep(Duration::from_millis(300)).await;
        sync.send_update("body", json!("first paragraph, extended"), Priority::Medium)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        let batches = channel.sent_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].changes[0].new_value, json!("first paragraph"));
        assert_eq!(
            batches[1].changes[0].new_value,
            json!("first paragraph, extended")
        );
        assert_eq!(sync.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_churn_is_collapsed() {
        let (channel, sync) = create_engine(RealtimeOptions {
            update_debounce: Duration::from_millis(500),
            ..Default::default()
        });

        // A presence ping per keystroke must not reach the channel
        for end in 1..=10 {
            sync.start_field_editing("title");
            sync.send_update("title", json!("x".repeat(end)), Priority::Medium)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let starts = channel
            .presence_events()
            .iter()
            .filter(|(_, editing)| *editing)
            .count();
        assert_eq!(starts, 1, "10 keystrokes collapse to one presence signal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_value_typing_simulation() {
        let commits = Arc::new(Mutex::new(Vec::new()));
        let commit: CommitFn<String> = {
            let commits = commits.clone();
            Arc::new(move |value: String| {
                let commits = commits.clone();
                Box::pin(async move {
                    commits.lock().unwrap().push(value);
                    Ok(())
                })
            })
        };

        let title = TrackedValue::new(
            "".to_string(),
            commit,
            Duration::from_millis(300),
        )
        .unwrap();

        let text = "Atelier";
        for end in 1..=text.len() {
            title.set(text[..end].to_string()).unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(*commits.lock().unwrap(), vec!["Atelier".to_string()]);
        assert!(!title.has_changes());
        assert_eq!(title.get(), "Atelier");
    }
}
