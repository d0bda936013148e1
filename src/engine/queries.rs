//! Query engine: sorted/filtered/paginated views over a collection, with
//! live incremental maintenance for cached queries.
//!
//! A query with a cache identifier stays live: a child-added event defers a
//! fetch-and-append onto the shared result array, a child-removed event
//! drops the matching record by id. Registering a second query under the
//! same cache identifier tears the first one's listeners down before the
//! new ones attach. Pagination is a full refresh with an enlarged limit,
//! re-registered under the same identifier.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::path::parse_model_name;
use crate::remote::reference::{apply_sorting_and_filtering, TreeReference};
use crate::remote::{ErrorCallback, EventCallback, TreeEvent, TreeSnapshot};
use crate::tracker::TrackedQuery;
use crate::types::{OperationOptions, QueryDescriptor};

use super::{EngineInner, SyncEngine};

// ============================================================================
// QueryResults
// ============================================================================

/// The result of a collection query. For cached queries the backing array
/// is shared with the live listeners and keeps updating between flushes;
/// [`records`] returns the current contents.
///
/// [`records`]: QueryResults::records
#[derive(Clone, Debug)]
pub struct QueryResults {
    records: Arc<Mutex<Vec<Value>>>,
    pub cache_id: Option<String>,
}

impl QueryResults {
    /// A snapshot of the current result set, in query order.
    pub fn records(&self) -> Vec<Value> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

// ============================================================================
// Query operations
// ============================================================================

impl SyncEngine {
    /// Single-result query: the descriptor is forced to a one-child window,
    /// then the match delegates to find-one. The caller's `path` is
    /// forwarded only when the descriptor is not already path-qualified.
    /// No match → `NoQueryMatch`.
    pub async fn query_record(
        &self,
        model: &str,
        descriptor: &mut QueryDescriptor,
    ) -> Result<Value> {
        let inner = &self.inner;
        let base = TreeReference::new(
            Arc::clone(&inner.remote),
            descriptor
                .path
                .clone()
                .unwrap_or_else(|| parse_model_name(model)),
        );
        let reference = apply_sorting_and_filtering(base, descriptor, true);
        let snapshot = reference.fetch().await?;

        let Some(key) = snapshot.ordered_keys.first().cloned() else {
            return Err(SyncError::NoQueryMatch(model.to_string()));
        };

        let options = OperationOptions {
            path: record_path_for(descriptor),
            include: None,
        };
        inner.fetch_record(model, &key, &options).await
    }

    /// Multi-result query. Fetches every matching child through find-one
    /// (fail-fast aggregate); with a `cache_id` the result set is kept live
    /// until replaced via the same id or stopped.
    pub async fn query(&self, model: &str, descriptor: &mut QueryDescriptor) -> Result<QueryResults> {
        let inner = &self.inner;
        let base = TreeReference::new(
            Arc::clone(&inner.remote),
            descriptor
                .path
                .clone()
                .unwrap_or_else(|| parse_model_name(model)),
        );
        let reference = apply_sorting_and_filtering(base, descriptor, false);
        let snapshot = reference.fetch().await?;

        let record_path = record_path_for(descriptor);
        let records = if snapshot.exists() {
            inner
                .fetch_children(model, &snapshot.ordered_keys, record_path.as_deref())
                .await?
        } else {
            Vec::new()
        };

        let results = Arc::new(Mutex::new(records));
        if let Some(cache_id) = descriptor.cache_id.clone() {
            inner.attach_live_query(
                &cache_id,
                model,
                descriptor.clone(),
                &reference,
                Arc::clone(&results),
                record_path,
            );
        }

        Ok(QueryResults {
            records: results,
            cache_id: descriptor.cache_id.clone(),
        })
    }

    /// Pagination: detach the live listeners of the query tracked under
    /// `cache_id`, grow whichever limit its descriptor carries by `n`, and
    /// refresh the whole query under the same identifier.
    pub async fn extend_query(&self, cache_id: &str, n: usize) -> Result<QueryResults> {
        let Some(entry) = self.inner.tracker.take_query(cache_id) else {
            return Err(SyncError::QueryNotTracked(cache_id.to_string()));
        };
        let TrackedQuery {
            model,
            mut descriptor,
            results: _,
            handles,
        } = entry;
        for handle in handles {
            handle.detach();
        }

        if let Some(limit) = descriptor.limit_to_first {
            descriptor.limit_to_first = Some(limit + n);
        } else if let Some(limit) = descriptor.limit_to_last {
            descriptor.limit_to_last = Some(limit + n);
        }

        self.query(&model, &mut descriptor).await
    }

    /// Detach a cached query's live listeners without refreshing.
    pub fn stop_query(&self, cache_id: &str) {
        if let Some(entry) = self.inner.tracker.take_query(cache_id) {
            entry.detach();
        }
    }
}

/// The path find-one should inherit from a query descriptor: the caller's
/// override, unless the descriptor marks it as already record-qualified.
fn record_path_for(descriptor: &QueryDescriptor) -> Option<String> {
    if descriptor.is_reference {
        None
    } else {
        descriptor.path.clone()
    }
}

impl EngineInner {
    /// Bind child-added/child-removed listeners to `results` and track them
    /// under `cache_id`, replacing (and detaching) any previous live query
    /// with the same identifier.
    fn attach_live_query(
        self: &Arc<Self>,
        cache_id: &str,
        model: &str,
        descriptor: QueryDescriptor,
        reference: &TreeReference,
        results: Arc<Mutex<Vec<Value>>>,
        record_path: Option<String>,
    ) {
        let on_added: EventCallback = {
            let engine = Arc::clone(self);
            let model = model.to_string();
            let results = Arc::clone(&results);
            Arc::new(move |snapshot: TreeSnapshot| {
                let engine_task = Arc::clone(&engine);
                let model = model.clone();
                let results = Arc::clone(&results);
                let record_path = record_path.clone();
                let key = snapshot.key.clone();
                engine.defer.schedule(async move {
                    let options = OperationOptions {
                        path: record_path,
                        include: None,
                    };
                    match engine_task.fetch_record(&model, &key, &options).await {
                        Ok(payload) => {
                            let mut records = results.lock();
                            let already_present = records
                                .iter()
                                .any(|r| r.get("id").and_then(Value::as_str) == Some(key.as_str()));
                            if !already_present {
                                records.push(payload);
                            }
                        }
                        Err(e) => {
                            warn!(model = %model, id = %key, error = %e,
                                "failed to fetch record added to live query");
                        }
                    }
                });
            })
        };

        let on_removed: EventCallback = {
            let results = Arc::clone(&results);
            Arc::new(move |snapshot: TreeSnapshot| {
                results
                    .lock()
                    .retain(|r| r.get("id").and_then(Value::as_str) != Some(snapshot.key.as_str()));
            })
        };

        let on_error: ErrorCallback = {
            let model = model.to_string();
            let cache_id = cache_id.to_string();
            Arc::new(move |e| {
                warn!(model = %model, cache_id = %cache_id, error = %e,
                    "live query listener errored");
            })
        };

        let added_handle = reference.listen(TreeEvent::ChildAdded, on_added, Arc::clone(&on_error));
        let removed_handle = reference.listen(TreeEvent::ChildRemoved, on_removed, on_error);

        self.tracker.track_query(
            cache_id,
            TrackedQuery {
                model: model.to_string(),
                descriptor,
                results,
                handles: vec![added_handle, removed_handle],
            },
        );
    }
}
