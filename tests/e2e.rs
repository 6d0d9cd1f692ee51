//! End-to-end engine tests: lifecycle, mirror convergence, monotonic
//! soft-delete, and crash-recovery replay, exercised against the real
//! on-disk stores with the consumer pool running.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;

use genloom::api::{build_state, state::AppState};
use genloom::config::Config;
use genloom::history::{CompletionPayload, CreatePayload, UpdatePatch};
use genloom::model::{GenerationStatus, MediaItem, MediaKind, MirrorTask};
use genloom::query::{ListQuery, SortOrder};

async fn engine() -> (AppState, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.server.data_path = temp_dir.path().join("data");
    config.mirror.workers = 2;
    config.mirror.retry_backoff_ms = 5;
    let state = build_state(config).await.unwrap();
    (state, temp_dir)
}

/// Wait until every queued mirror task has been acknowledged.
async fn drain_mirror_queue(state: &AppState) {
    for _ in 0..200 {
        if state.queue.pending().unwrap().is_empty() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("mirror queue did not drain");
}

fn image(id: &str) -> MediaItem {
    MediaItem::new(MediaKind::Image, id, format!("https://cdn.example/{id}.png"))
}

fn create_payload() -> CreatePayload {
    CreatePayload::builder()
        .prompt("a lighthouse at dusk".to_string())
        .model("img-xl".to_string())
        .generation_type("text-to-image".to_string())
        .build()
}

#[tokio::test]
async fn full_lifecycle_scenario() {
    let (state, _tmp) = engine().await;

    // Create: Generating, private.
    let record = state.history.create("u1", create_payload()).await.unwrap();
    assert_eq!(record.status, GenerationStatus::Generating);
    assert!(!record.is_public);
    let id = record.id.clone();

    // Complete with two images, published.
    let completed = state
        .history
        .mark_completed(
            "u1",
            &id,
            CompletionPayload::builder()
                .images(vec![image("m1"), image("m2")])
                .is_public(true)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(completed.status, GenerationStatus::Completed);
    assert!(completed.is_public);

    drain_mirror_queue(&state).await;
    let mirror = state.store.get_mirror(&id).unwrap().expect("mirror missing");
    assert_eq!(mirror.images.len(), 2);
    assert_eq!(mirror.uid, "u1");

    // Soft delete: mirror gone, record terminal for the feed.
    let deleted = state.history.soft_delete("u1", &id, None).await.unwrap();
    assert!(deleted.is_deleted);
    assert!(!deleted.is_public);

    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&id).unwrap().is_none());

    // And the listing no longer returns it.
    let page = state
        .history
        .list(
            "u1",
            &ListQuery {
                limit: 10,
                sort_order: SortOrder::Asc,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(page.items.iter().all(|r| r.id != id));
}

#[tokio::test]
async fn queue_backstop_converges_without_the_sync_path() {
    // Simulate a failed synchronous propagation: the authoritative store
    // has a published record but the mirror write never happened. The
    // queued task alone must converge the mirror.
    let (state, _tmp) = engine().await;

    let created = state.history.create("u1", create_payload()).await.unwrap();
    drain_mirror_queue(&state).await;

    let mut record = created.clone();
    record.status = GenerationStatus::Completed;
    record.images = vec![image("m1")];
    record.recompute_visibility(true);
    state.store.put_record(Some(&created), &record).unwrap();
    assert!(state.store.get_mirror(&record.id).unwrap().is_none());

    state.broker.enqueue(MirrorTask::upsert(&record)).await.unwrap();
    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&record.id).unwrap().is_some());

    // Same for the remove direction: a stale projection left behind by a
    // failed direct removal is corrected by the backup task.
    let mut gone = record.clone();
    gone.is_deleted = true;
    gone.is_public = false;
    state.store.put_record(Some(&record), &gone).unwrap();

    state
        .broker
        .enqueue(MirrorTask::remove("u1", &record.id))
        .await
        .unwrap();
    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&record.id).unwrap().is_none());
}

#[tokio::test]
async fn soft_delete_is_monotonic_against_later_updates() {
    let (state, _tmp) = engine().await;

    let record = state.history.create("u1", create_payload()).await.unwrap();
    let id = record.id.clone();
    state
        .history
        .mark_completed(
            "u1",
            &id,
            CompletionPayload::builder()
                .images(vec![image("m1")])
                .is_public(true)
                .build(),
        )
        .await
        .unwrap();
    state.history.soft_delete("u1", &id, None).await.unwrap();
    drain_mirror_queue(&state).await;

    // A later update asking for public visibility cannot resurrect it.
    let updated = state
        .history
        .update(
            "u1",
            &id,
            UpdatePatch {
                is_public: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.is_deleted);
    assert!(!updated.is_public);

    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&id).unwrap().is_none());
}

#[tokio::test]
async fn media_removal_escalates_to_full_delete() {
    let (state, _tmp) = engine().await;

    let record = state.history.create("u1", create_payload()).await.unwrap();
    let id = record.id.clone();
    state
        .history
        .mark_completed(
            "u1",
            &id,
            CompletionPayload::builder()
                .images(vec![image("m1"), image("m2")])
                .is_public(true)
                .build(),
        )
        .await
        .unwrap();

    // Removing one of two images keeps the record alive and published.
    let partial = state
        .history
        .soft_delete("u1", &id, Some("m1"))
        .await
        .unwrap();
    assert!(!partial.is_deleted);
    assert_eq!(partial.images.len(), 1);
    assert!(partial.is_public);

    drain_mirror_queue(&state).await;
    let mirror = state.store.get_mirror(&id).unwrap().unwrap();
    assert_eq!(mirror.images.len(), 1);

    // Removing the last one escalates to a full soft-delete.
    let full = state
        .history
        .soft_delete("u1", &id, Some("m2"))
        .await
        .unwrap();
    assert!(full.is_deleted);

    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&id).unwrap().is_none());
}

#[tokio::test]
async fn per_media_visibility_flows_through_update() {
    let (state, _tmp) = engine().await;

    let record = state.history.create("u1", create_payload()).await.unwrap();
    let id = record.id.clone();
    state
        .history
        .mark_completed(
            "u1",
            &id,
            CompletionPayload::builder().images(vec![image("m1")]).build(),
        )
        .await
        .unwrap();
    assert!(state.store.get_mirror(&id).unwrap().is_none());

    // Flag the single media item public: the aggregate follows, even
    // though the document-level flag stays false.
    let patch: UpdatePatch = serde_json::from_value(json!({
        "media": {"id": "m1", "set": {"is_public": true}}
    }))
    .unwrap();
    let updated = state.history.update("u1", &id, patch).await.unwrap();
    assert!(updated.is_public);
    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&id).unwrap().is_some());

    // An explicit false cannot hide it while the item stays public.
    let updated = state
        .history
        .update(
            "u1",
            &id,
            UpdatePatch {
                is_public: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.is_public);

    // Un-flagging the item finally unpublishes.
    let patch: UpdatePatch = serde_json::from_value(json!({
        "media": {"id": "m1", "set": {"is_public": false}}
    }))
    .unwrap();
    let updated = state.history.update("u1", &id, patch).await.unwrap();
    assert!(!updated.is_public);
    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&id).unwrap().is_none());
}

#[tokio::test]
async fn stats_track_the_lifecycle_best_effort() {
    let (state, _tmp) = engine().await;

    let a = state.history.create("u1", create_payload()).await.unwrap();
    let _b = state.history.create("u1", create_payload()).await.unwrap();
    state
        .history
        .mark_completed("u1", &a.id, CompletionPayload::default())
        .await
        .unwrap();

    let stats = state.store.get_stats("u1").unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status["generating"], 1);
    assert_eq!(stats.by_status["completed"], 1);
    assert_eq!(stats.by_type["text-to-image"], 2);

    state.history.soft_delete("u1", &a.id, None).await.unwrap();
    let stats = state.store.get_stats("u1").unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_status["completed"], 0);
}

#[tokio::test]
async fn cache_is_invalidated_on_mutation() {
    let (state, _tmp) = engine().await;

    let record = state.history.create("u1", create_payload()).await.unwrap();
    let id = record.id.clone();

    // Prime the cache.
    let cached = state.history.get("u1", &id).await.unwrap().unwrap();
    assert_eq!(cached.status, GenerationStatus::Generating);

    state
        .history
        .mark_completed("u1", &id, CompletionPayload::default())
        .await
        .unwrap();

    // The mutation invalidated the cached copy.
    let fresh = state.history.get("u1", &id).await.unwrap().unwrap();
    assert_eq!(fresh.status, GenerationStatus::Completed);
}

#[tokio::test]
async fn unacked_tasks_replay_on_restart() {
    let temp_dir = TempDir::new().unwrap();
    let data_path = temp_dir.path().join("data");

    // First process: record published, but the task never got applied
    // (no consumer saw it before the "crash").
    let record_id;
    {
        let mut config = Config::default();
        config.server.data_path = data_path.clone();
        config.mirror.workers = 1;
        let state = build_state(config).await.unwrap();

        let created = state.history.create("u1", create_payload()).await.unwrap();
        drain_mirror_queue(&state).await;

        let mut record = created.clone();
        record.status = GenerationStatus::Completed;
        record.images = vec![image("m1")];
        record.recompute_visibility(true);
        state.store.put_record(Some(&created), &record).unwrap();
        record_id = record.id.clone();

        // Enqueue durably, bypassing the dispatch to simulate the task
        // outliving the process.
        state.queue.enqueue(&MirrorTask::upsert(&record)).unwrap();
        state.queue.flush().unwrap();
        state.store.persist().unwrap();
    }

    // Second process over the same data dir: startup replay applies it.
    // The first instance's worker tasks release the keyspace locks
    // shortly after their channels close, so retry the open briefly.
    let mut state = None;
    for _ in 0..50 {
        let mut config = Config::default();
        config.server.data_path = data_path.clone();
        config.mirror.workers = 1;
        config.mirror.retry_backoff_ms = 5;
        match build_state(config).await {
            Ok(s) => {
                state = Some(s);
                break;
            }
            Err(_) => sleep(Duration::from_millis(50)).await,
        }
    }
    let state = state.expect("could not reopen engine state");

    drain_mirror_queue(&state).await;
    assert!(state.store.get_mirror(&record_id).unwrap().is_some());
}
