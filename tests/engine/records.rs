//! Record sync engine tests — CRUD, live listeners, and unload behavior,
//! driven end to end through `MemoryTree` + `MemoryStore`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tree_sync::remote::memory::MemoryTree;
use tree_sync::remote::{
    ErrorCallback, EventCallback, ListenerHandle, QueryConstraints, RemoteTree, TreeEvent,
    TreeSnapshot,
};
use tree_sync::store::{LocalStore, MemoryStore};
use tree_sync::types::Fanout;
use tree_sync::{OperationOptions, RemoteError, SyncEngine, SyncError};

fn setup() -> (Arc<MemoryTree>, Arc<MemoryStore>, SyncEngine) {
    let tree = Arc::new(MemoryTree::new());
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(tree.clone(), store.clone());
    (tree, store, engine)
}

/// Delegating [`RemoteTree`] that applies one queued write to the backing
/// tree the moment a fetch returns its snapshot, landing the write before
/// whatever the caller does next.
struct RacingTree {
    inner: Arc<MemoryTree>,
    on_fetch: Mutex<Option<(String, Value)>>,
}

impl RacingTree {
    fn new(inner: Arc<MemoryTree>) -> Self {
        Self {
            inner,
            on_fetch: Mutex::new(None),
        }
    }

    fn write_after_next_fetch(&self, path: &str, value: Value) {
        *self.on_fetch.lock() = Some((path.to_string(), value));
    }
}

#[async_trait]
impl RemoteTree for RacingTree {
    fn root_path(&self) -> &str {
        self.inner.root_path()
    }

    fn generate_key(&self) -> String {
        self.inner.generate_key()
    }

    async fn fetch(
        &self,
        path: &str,
        constraints: &QueryConstraints,
    ) -> Result<TreeSnapshot, RemoteError> {
        let snapshot = self.inner.fetch(path, constraints).await?;
        if let Some((p, v)) = self.on_fetch.lock().take() {
            self.inner.set(&p, v);
        }
        Ok(snapshot)
    }

    fn listen(
        &self,
        path: &str,
        constraints: &QueryConstraints,
        event: TreeEvent,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> ListenerHandle {
        self.inner.listen(path, constraints, event, on_event, on_error)
    }

    async fn update(&self, fanout: &Fanout) -> Result<(), RemoteError> {
        self.inner.update(fanout).await
    }
}

// ============================================================================
// create / update
// ============================================================================

#[tokio::test]
async fn create_record_writes_and_attaches_listener() {
    let (tree, _store, engine) = setup();

    let payload = engine
        .create_record(
            "blog-post",
            Some("p1"),
            json!({ "title": "hello" }),
            &OperationOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(payload["id"], json!("p1"));
    assert_eq!(tree.value_at("blogPosts/p1/title"), json!("hello"));
    assert!(engine
        .tracker()
        .is_listener_tracked("blogPosts/p1", TreeEvent::Value));
}

#[tokio::test]
async fn create_record_generates_key_when_missing() {
    let (tree, _store, engine) = setup();

    let payload = engine
        .create_record("post", None, json!({ "title": "a" }), &OperationOptions::default())
        .await
        .unwrap();

    let id = payload["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(tree.value_at(&format!("posts/{id}/title")), json!("a"));
}

#[tokio::test]
async fn create_record_honors_inner_reference_path() {
    let (tree, _store, engine) = setup();

    engine
        .create_record(
            "post",
            Some("p1"),
            json!({ "title": "nested", "_innerReferencePath": "archive/2020" }),
            &OperationOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        tree.value_at("posts/archive/2020/p1/title"),
        json!("nested")
    );
    assert!(engine
        .tracker()
        .is_listener_tracked("posts/archive/2020/p1", TreeEvent::Value));
}

#[tokio::test]
async fn update_record_reuses_the_existing_listener() {
    let (tree, _store, engine) = setup();

    engine
        .create_record("post", Some("p1"), json!({ "title": "v1" }), &OperationOptions::default())
        .await
        .unwrap();
    engine
        .update_record("post", "p1", json!({ "title": "v2" }), &OperationOptions::default())
        .await
        .unwrap();

    assert_eq!(tree.value_at("posts/p1/title"), json!("v2"));
    assert_eq!(engine.tracker().listener_count(), 1);
}

// ============================================================================
// find_record
// ============================================================================

#[tokio::test]
async fn find_record_normalizes_payload() {
    let (tree, _store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "hello" }));

    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();

    assert_eq!(payload["id"], json!("p1"));
    assert_eq!(payload["title"], json!("hello"));
    assert_eq!(payload["_innerReferencePath"], json!(""));
}

#[tokio::test]
async fn find_record_missing_node_rejects() {
    let (_tree, _store, engine) = setup();

    let err = engine
        .find_record("post", "nope", &OperationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

#[tokio::test]
async fn find_record_twice_attaches_one_listener() {
    let (tree, _store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "hello" }));

    engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();

    assert_eq!(engine.tracker().listener_count(), 1);
    assert_eq!(tree.listener_count(), 1);
}

#[tokio::test]
async fn find_record_with_path_override() {
    let (tree, _store, engine) = setup();
    tree.set("drafts/p1", json!({ "title": "wip" }));

    let payload = engine
        .find_record("post", "p1", &OperationOptions::with_path("drafts"))
        .await
        .unwrap();

    assert_eq!(payload["id"], json!("p1"));
    assert!(engine
        .tracker()
        .is_listener_tracked("drafts/p1", TreeEvent::Value));
}

// ============================================================================
// Live listener behavior
// ============================================================================

#[tokio::test]
async fn remote_change_reaches_store_only_after_flush() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "v1" }));
    engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();

    tree.set("posts/p1/title", json!("v2"));
    assert_eq!(store.push_count(), 0, "store must not mutate in-callback");
    assert!(engine.pending_deferred() > 0);

    engine.flush().await;
    assert_eq!(store.push_count(), 1);
    let record = store.peek_record("post", "p1").unwrap();
    assert_eq!(record.data["title"], json!("v2"));
}

#[tokio::test]
async fn node_removal_unloads_idle_record() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "v1" }));
    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    store.push("post", payload);

    tree.set("posts/p1", Value::Null);
    engine.flush().await;
    assert!(store.peek_record("post", "p1").is_none());
    assert_eq!(store.unload_count(), 1);
}

#[tokio::test]
async fn node_removal_spares_record_mid_save() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "v1" }));
    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    store.push("post", payload);
    store.set_saving("post", "p1", true);

    tree.set("posts/p1", Value::Null);
    engine.flush().await;
    assert!(store.peek_record("post", "p1").is_some());
    assert_eq!(store.unload_count(), 0);
}

#[tokio::test]
async fn write_landing_between_fetch_and_listen_is_not_lost() {
    let inner = Arc::new(MemoryTree::new());
    inner.set("posts/p1", json!({ "title": "v1" }));
    let tree = Arc::new(RacingTree::new(Arc::clone(&inner)));
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(tree.clone(), store.clone());

    tree.write_after_next_fetch("posts/p1/title", json!("v2"));
    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    engine.flush().await;

    // The racing write fired before the listener attached; the returned
    // payload must still carry it.
    assert_eq!(payload["title"], json!("v2"));

    // And the listener is live for everything after it.
    store.push("post", payload);
    inner.set("posts/p1/title", json!("v3"));
    engine.flush().await;
    let record = store.peek_record("post", "p1").unwrap();
    assert_eq!(record.data["title"], json!("v3"));
}

#[tokio::test]
async fn removal_landing_between_fetch_and_listen_rejects() {
    let inner = Arc::new(MemoryTree::new());
    inner.set("posts/p1", json!({ "title": "v1" }));
    let tree = Arc::new(RacingTree::new(Arc::clone(&inner)));
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(tree.clone(), store.clone());

    tree.write_after_next_fetch("posts/p1", Value::Null);
    let err = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

#[tokio::test]
async fn listener_error_unloads_the_record() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "v1" }));
    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    store.push("post", payload);

    tree.fail_listeners_at("posts/p1", RemoteError::new("permission revoked"));
    engine.flush().await;
    assert!(store.peek_record("post", "p1").is_none());
    assert_eq!(store.unload_count(), 1);
}

#[tokio::test]
async fn listener_error_spares_record_mid_save() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "v1" }));
    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    store.push("post", payload);
    store.set_saving("post", "p1", true);

    tree.fail_listeners_at("posts/p1", RemoteError::new("permission revoked"));
    engine.flush().await;
    assert!(store.peek_record("post", "p1").is_some());
    assert_eq!(store.unload_count(), 0);
}

// ============================================================================
// find_all
// ============================================================================

#[tokio::test]
async fn find_all_fetches_every_record_and_tracks_collection() {
    let (tree, _store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "first" }));
    tree.set("posts/p2", json!({ "title": "second" }));

    let records = engine.find_all("post").await.unwrap();
    assert_eq!(records.len(), 2);
    let mut ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["p1", "p2"]);

    assert!(engine
        .tracker()
        .is_listener_tracked("posts", TreeEvent::ChildAdded));

    // Second find_all must not attach anything new: 2 value + 1 child_added.
    engine.find_all("post").await.unwrap();
    assert_eq!(engine.tracker().listener_count(), 3);
    assert_eq!(tree.listener_count(), 3);
}

#[tokio::test]
async fn find_all_missing_collection_rejects() {
    let (_tree, _store, engine) = setup();
    let err = engine.find_all("post").await.unwrap_err();
    assert!(matches!(err, SyncError::CollectionNotFound(c) if c == "posts"));
}

#[tokio::test]
async fn find_all_rejects_aggregate_on_any_failure() {
    let (tree, _store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "first" }));
    tree.set("posts/p2", json!(42));

    let err = engine.find_all("post").await.unwrap_err();
    match err {
        SyncError::Aggregate { failed, total, .. } => {
            assert_eq!(failed, 1);
            assert_eq!(total, 2);
        }
        other => panic!("expected aggregate error, got {other}"),
    }
}

#[tokio::test]
async fn find_all_pushes_later_additions_into_store() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "first" }));
    engine.find_all("post").await.unwrap();

    tree.set("posts/p2", json!({ "title": "second" }));
    engine.flush().await;

    assert_eq!(store.loaded_ids("post"), vec!["p2".to_string()]);
}

// ============================================================================
// delete_record
// ============================================================================

#[tokio::test]
async fn delete_record_tombstones_default_path() {
    let (tree, store, engine) = setup();
    tree.set("posts/p1", json!({ "title": "v1" }));
    let payload = engine
        .find_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    store.push("post", payload);

    engine
        .delete_record("post", "p1", &OperationOptions::default())
        .await
        .unwrap();
    assert!(tree.value_at("posts/p1").is_null());

    // The live listener's node-gone branch performs the unload.
    engine.flush().await;
    assert!(store.peek_record("post", "p1").is_none());
}

#[tokio::test]
async fn delete_fanout_merges_include_and_path() {
    let (tree, _store, engine) = setup();
    tree.set("a/1", json!({ "x": 1 }));
    tree.set("b/p1", json!({ "title": "v1" }));

    let mut include = Fanout::new();
    include.insert("a/1".to_string(), Value::Null);
    engine
        .delete_record(
            "post",
            "p1",
            &OperationOptions {
                path: Some("b".to_string()),
                include: Some(include),
            },
        )
        .await
        .unwrap();

    assert!(tree.value_at("a/1").is_null());
    assert!(tree.value_at("b/p1").is_null());
}
