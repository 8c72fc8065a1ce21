//! Entity store behavior: confirm-then-mutate, lifecycle and stale-response handling.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{field, field_draft, ScriptedFields};
use farm_sync::contract::{
    error::GatewayError,
    model::{FieldPatch, Job, JobDraft, JobPatch, JobStatus},
};
use farm_sync::domain::{
    ids::LocalId,
    store::{EntityStore, FieldStore, JobStore, StoreSnapshot, STALE_SESSION},
};
use farm_sync::infra::InMemoryGateway;
use tracing_test::traced_test;

fn job_draft(title: &str, status: JobStatus) -> JobDraft {
    let now = Utc::now();
    JobDraft {
        title: title.to_string(),
        description: "South Field".to_string(),
        status,
        start_date: now,
        end_date: now + Duration::days(3),
        location: Some("South Field".to_string()),
        assigned_to_id: None,
    }
}

#[tokio::test]
async fn add_appends_canonical_record_with_remote_id() {
    // Arrange
    let gateway = Arc::new(ScriptedFields::with_ids(&["f-100"]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    assert!(store.is_empty());

    // Act
    let outcome = store.add(field_draft("North Plot")).await;

    // Assert
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.error, None);
    let items = store.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "f-100");
    assert_eq!(items[0].label, "North Plot");
    assert_eq!(items[0].area, 12_000.0);
    assert_eq!(items[0].owner_id.as_deref(), Some("user_1"));
    assert!(!items[0].is_updating);
}

#[tokio::test]
async fn n_successful_adds_yield_n_items_with_remote_ids() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;

    for i in 0..5 {
        let outcome = store.add(field_draft(&format!("Plot {i}"))).await;
        assert!(outcome.is_success());
    }

    let items = store.items();
    assert_eq!(items.len(), 5);
    assert_eq!(gateway.field_count(), 5);
    let mut ids: Vec<_> = items.iter().map(|f| f.id.clone()).collect();
    assert!(ids.iter().all(|id| !LocalId::is_local(id)));
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5, "ids must be unique");
}

#[tokio::test]
async fn invalid_geometry_is_rejected_without_a_network_call() {
    let gateway = Arc::new(ScriptedFields::with_ids(&["f-1"]));
    let store = FieldStore::new(gateway.clone());

    let mut draft = field_draft("Sliver");
    draft.coordinates = vec![vec![[0.0, 0.0], [1.0, 1.0]]];
    let outcome = store.add(draft).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("at least 3 points"));
    assert_eq!(gateway.call_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn failed_add_leaves_items_untouched() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    assert!(store.add(field_draft("Kept")).await.is_success());
    let before = store.items();

    gateway.fail_next(GatewayError::validation("color is required"));
    let outcome = store.add(field_draft("Rejected")).await;

    assert_eq!(outcome.error.as_deref(), Some("Validation error: color is required"));
    assert_eq!(store.items(), before);
}

#[tokio::test]
async fn failed_update_with_not_found_keeps_pre_call_state() {
    // Arrange
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    let before = store.items();
    *gateway.update_error.lock() = Some(GatewayError::not_found("field", "f-1"));

    // Act
    let outcome = store
        .update(
            "f-1",
            FieldPatch {
                label: Some("Renamed".into()),
                ..Default::default()
            },
        )
        .await;

    // Assert
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("field not found: f-1"));
    assert_eq!(store.items(), before);
    assert!(!store.get("f-1").unwrap().is_updating);
}

#[tokio::test]
async fn update_replaces_item_with_canonical_record() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    store.add(field_draft("North")).await;
    let id = store.items()[0].id.clone();

    let outcome = store
        .update(
            &id,
            FieldPatch {
                color: Some("#FF9800".into()),
                ..Default::default()
            },
        )
        .await;

    assert!(outcome.is_success());
    let updated = store.get(&id).unwrap();
    assert_eq!(updated.color, "#FF9800");
    assert_eq!(updated.label, "North");
    assert!(!updated.is_updating);
}

#[tokio::test]
async fn update_of_uncached_id_never_inserts() {
    // remote accepts the update, but the store has never seen the id
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    let before = store.items();

    let outcome = store
        .update(
            "f-999",
            FieldPatch {
                label: Some("Ghost".into()),
                ..Default::default()
            },
        )
        .await;

    assert!(outcome.is_success());
    assert_eq!(store.items(), before);
    assert!(store.get("f-999").is_none());
}

#[tokio::test]
async fn in_flight_update_marks_item_and_always_clears_the_mark() {
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = Arc::new(FieldStore::new(gateway.clone()));
    store.initialize("user_1").await;
    gateway.gate();

    let task = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .update(
                    "f-1",
                    FieldPatch {
                        label: Some("South".into()),
                        ..Default::default()
                    },
                )
                .await
        })
    };
    gateway.wait_for_calls(2).await;
    assert!(store.get("f-1").unwrap().is_updating);

    gateway.release();
    let outcome = task.await.unwrap();

    assert!(outcome.is_success());
    let item = store.get("f-1").unwrap();
    assert_eq!(item.label, "South");
    assert!(!item.is_updating);
}

#[tokio::test]
async fn failed_delete_leaves_items_deep_equal() {
    let gateway = Arc::new(ScriptedFields::listing(vec![
        field("f-1", "North"),
        field("f-2", "South"),
    ]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    let before = store.snapshot();
    *gateway.delete_error.lock() = Some(GatewayError::transport("connection reset"));

    let outcome = store.delete("f-1").await;

    assert!(!outcome.success);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn delete_removes_item_and_is_idempotent_remotely() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    store.add(field_draft("North")).await;
    let id = store.items()[0].id.clone();

    assert!(store.delete(&id).await.is_success());
    assert!(store.is_empty());

    // already gone on the remote: still a success
    assert!(store.delete(&id).await.is_success());
}

#[tokio::test]
async fn clear_is_idempotent_and_resets_to_pristine() {
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;
    assert_eq!(store.len(), 1);

    store.clear();
    let once = store.snapshot();
    store.clear();
    let twice = store.snapshot();

    assert_eq!(once, StoreSnapshot::default());
    assert_eq!(once, twice);
    assert!(!store.is_initialized());
    assert!(!store.is_loading());
}

#[tokio::test]
async fn initialize_clear_initialize_round_trip() {
    let gateway = Arc::new(ScriptedFields::listing(vec![
        field("f-2", "South"),
        field("f-1", "North"),
    ]));
    let store = FieldStore::new(gateway.clone());

    store.initialize("user_1").await;
    let first = store.items();
    store.clear();
    store.initialize("user_1").await;

    assert_eq!(store.items(), first);
    assert!(store.is_initialized());
    assert_eq!(store.load_error(), None);
}

#[traced_test]
#[tokio::test]
async fn failed_initialize_degrades_to_empty_with_load_error() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = JobStore::new(gateway.clone());
    gateway.fail_next(GatewayError::auth("JWT expired"));

    store.initialize("user_1").await;

    let snapshot = store.snapshot();
    assert!(snapshot.items.is_empty());
    assert!(snapshot.is_initialized);
    assert!(!snapshot.is_loading);
    assert_eq!(
        snapshot.load_error.as_deref(),
        Some("Authentication rejected: JWT expired")
    );
    assert!(logs_contain("Initial load failed"));

    // a later successful load clears the error
    store.initialize("user_1").await;
    assert_eq!(store.load_error(), None);
}

#[tokio::test]
async fn list_response_arriving_after_clear_is_discarded() {
    // Arrange
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    gateway.gate();
    let store = Arc::new(FieldStore::new(gateway.clone()));

    // Act
    let task = {
        let store = store.clone();
        tokio::spawn(async move { store.initialize("user_1").await })
    };
    gateway.wait_for_calls(1).await;
    assert!(store.is_loading());
    store.clear();
    gateway.release();
    task.await.unwrap();

    // Assert
    assert_eq!(store.snapshot(), StoreSnapshot::default());
}

#[tokio::test]
async fn create_response_arriving_after_clear_is_discarded() {
    let gateway = Arc::new(ScriptedFields::with_ids(&["f-7"]));
    let store = Arc::new(FieldStore::new(gateway.clone()));
    store.initialize("user_1").await;
    gateway.gate();

    let task = {
        let store = store.clone();
        tokio::spawn(async move { store.add(field_draft("Late")).await })
    };
    gateway.wait_for_calls(2).await;
    store.clear();
    gateway.release();
    let outcome = task.await.unwrap();

    assert_eq!(outcome.error.as_deref(), Some(STALE_SESSION));
    assert!(store.is_empty());
}

#[tokio::test]
async fn remote_echoing_a_placeholder_id_is_refused() {
    let placeholder = LocalId::generate().to_string();
    let gateway = Arc::new(ScriptedFields::with_ids(&[placeholder.as_str()]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;

    let outcome = store.add(field_draft("Echo")).await;

    assert!(!outcome.success);
    assert!(store.is_empty());
}

#[tokio::test]
async fn subscribers_observe_every_change() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = FieldStore::new(gateway.clone());
    let mut rx = store.subscribe();

    store.initialize("user_1").await;
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_initialized);

    store.add(field_draft("North")).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().items.len(), 1);

    store.clear();
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().items.is_empty());
}

#[tokio::test]
async fn staged_draft_is_committed_under_the_remote_id() {
    let gateway = Arc::new(ScriptedFields::with_ids(&["f-200"]));
    let store = FieldStore::new(gateway.clone());
    store.initialize("user_1").await;

    let local = store.stage(field_draft("Draft"));
    assert_eq!(store.pending().len(), 1);
    assert!(store.is_empty());

    let outcome = store.commit(local.as_str()).await;

    assert!(outcome.is_success());
    assert!(store.pending().is_empty());
    assert_eq!(store.items()[0].id, "f-200");
}

#[tokio::test]
async fn failed_commit_keeps_the_draft_staged() {
    // no scripted ids: create fails
    let gateway = Arc::new(ScriptedFields::default());
    let store = FieldStore::new(gateway.clone());

    let local = store.stage(field_draft("Draft"));
    let outcome = store.commit(local.as_str()).await;

    assert!(!outcome.success);
    assert_eq!(store.pending().len(), 1);
    assert!(store.discard(local.as_str()));
    assert!(!store.discard(local.as_str()));
    assert!(!store.commit("local-missing").await.success);
}

#[tokio::test]
async fn job_status_changes_flow_through_the_store() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store: EntityStore<Job> = JobStore::new(gateway.clone());
    store.initialize("user_1").await;
    store.add(job_draft("Harvest Corn", JobStatus::Ongoing)).await;
    store.add(job_draft("Irrigate", JobStatus::Due)).await;

    let due = store.due_jobs();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].title, "Irrigate");

    let id = store.items()[0].id.clone();
    let outcome = store
        .update(
            &id,
            JobPatch {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
        )
        .await;
    assert!(outcome.is_success());
    assert_eq!(store.get(&id).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn blank_job_title_is_rejected_locally() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = JobStore::new(gateway.clone());

    let outcome = store.add(job_draft("   ", JobStatus::Due)).await;

    assert!(!outcome.success);
    assert_eq!(gateway.job_count(), 0);
}

fn relabel(label: &str) -> FieldPatch {
    FieldPatch {
        label: Some(label.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn update_response_arriving_after_clear_is_discarded() {
    // Arrange
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = Arc::new(FieldStore::new(gateway.clone()));
    store.initialize("user_1").await;
    gateway.gate();

    // Act
    let update = {
        let store = store.clone();
        tokio::spawn(async move { store.update("f-1", relabel("Late")).await })
    };
    gateway.wait_for_calls(2).await;
    assert!(store.get("f-1").unwrap().is_updating);

    store.clear();
    let reload = {
        let store = store.clone();
        tokio::spawn(async move { store.initialize("user_1").await })
    };
    gateway.release();
    gateway.release();
    let outcome = update.await.unwrap();
    reload.await.unwrap();

    // Assert
    assert_eq!(outcome.error.as_deref(), Some(STALE_SESSION));
    let current = store.get("f-1").unwrap();
    assert_eq!(current.label, "North");
    assert!(!current.is_updating);
}

#[tokio::test]
async fn delete_response_arriving_after_clear_is_discarded() {
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = Arc::new(FieldStore::new(gateway.clone()));
    store.initialize("user_1").await;
    gateway.gate();

    let delete = {
        let store = store.clone();
        tokio::spawn(async move { store.delete("f-1").await })
    };
    gateway.wait_for_calls(2).await;
    store.clear();
    let reload = {
        let store = store.clone();
        tokio::spawn(async move { store.initialize("user_1").await })
    };
    gateway.release();
    gateway.release();
    let outcome = delete.await.unwrap();
    reload.await.unwrap();

    assert_eq!(outcome.error.as_deref(), Some(STALE_SESSION));
    assert_eq!(store.len(), 1, "a stale delete must not touch the new session");
}

#[tokio::test]
async fn is_updating_stays_set_until_the_last_overlapping_update_settles() {
    // Arrange
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = Arc::new(FieldStore::new(gateway.clone()));
    store.initialize("user_1").await;
    gateway.gate();

    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.update("f-1", relabel("First")).await })
    };
    gateway.wait_for_calls(2).await;
    let second = {
        let store = store.clone();
        tokio::spawn(async move { store.update("f-1", relabel("Second")).await })
    };
    gateway.wait_for_calls(3).await;

    // Act: the first update resolves while the second is still pending
    gateway.release();
    assert!(first.await.unwrap().is_success());

    // Assert
    let mid = store.get("f-1").unwrap();
    assert_eq!(mid.label, "First");
    assert!(mid.is_updating, "second update is still in flight");

    gateway.release();
    assert!(second.await.unwrap().is_success());
    let settled = store.get("f-1").unwrap();
    assert_eq!(settled.label, "Second");
    assert!(!settled.is_updating);
}

#[tokio::test]
async fn failed_overlapping_update_keeps_marker_for_the_other() {
    let gateway = Arc::new(ScriptedFields::listing(vec![field("f-1", "North")]));
    let store = Arc::new(FieldStore::new(gateway.clone()));
    store.initialize("user_1").await;
    gateway.gate();
    *gateway.update_error.lock() = Some(GatewayError::transport("timeout"));

    let failing = {
        let store = store.clone();
        tokio::spawn(async move { store.update("f-1", relabel("Lost")).await })
    };
    gateway.wait_for_calls(2).await;
    let pending = {
        let store = store.clone();
        tokio::spawn(async move { store.update("f-1", relabel("Kept")).await })
    };
    gateway.wait_for_calls(3).await;

    gateway.release();
    assert!(!failing.await.unwrap().is_success());
    assert!(store.get("f-1").unwrap().is_updating);

    *gateway.update_error.lock() = None;
    gateway.release();
    assert!(pending.await.unwrap().is_success());
    assert!(!store.get("f-1").unwrap().is_updating);
}
