//! Record sync: create/update, find-one, find-all, delete, and the
//! continuous listener that keeps fetched records live.
//!
//! Per-record lifecycle: unfetched → fetching → live → unloaded. A record
//! turns live the first time its value listener attaches (idempotent — a
//! second fetch of the same record attaches nothing). The only removal path
//! is the listener's own node-gone branch: deletes are tombstone writes, and
//! the resulting value event unloads the local copy unless it is mid-save.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SyncError};
use crate::normalize::{inner_reference_path, normalize_snapshot};
use crate::path::{parse_model_name, resolve_path};
use crate::remote::reference::{build_reference, TreeReference};
use crate::remote::{ErrorCallback, EventCallback, TreeEvent, TreeSnapshot};
use crate::store::RecordSnapshot;
use crate::types::OperationOptions;

use super::{EngineInner, SyncEngine};

impl SyncEngine {
    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Persist a new record. With `id = None` the remote key generator
    /// supplies one. Returns the written payload augmented with its id.
    pub async fn create_record(
        &self,
        model: &str,
        id: Option<&str>,
        data: Value,
        options: &OperationOptions,
    ) -> Result<Value> {
        let id = match id {
            Some(id) => id.to_string(),
            None => self.inner.remote.generate_key(),
        };
        self.inner.write_record(model, &id, data, options).await
    }

    /// Persist changes to an existing record. Same atomic fanout write as
    /// create; the caller is responsible for using the same path override
    /// the record was fetched through.
    pub async fn update_record(
        &self,
        model: &str,
        id: &str,
        data: Value,
        options: &OperationOptions,
    ) -> Result<Value> {
        self.inner.write_record(model, id, data, options).await
    }

    /// Remove a record with one atomic tombstone fanout: any caller
    /// `include` map is merged in, then the record's own tombstone at the
    /// override path when given, else at the default convention path.
    ///
    /// The record's live listener is not detached here — its node-gone
    /// branch performs the local unload.
    pub async fn delete_record(
        &self,
        model: &str,
        id: &str,
        options: &OperationOptions,
    ) -> Result<()> {
        let mut fanout = options.include.clone().unwrap_or_default();
        fanout.insert(resolve_path(model, id, options.path.as_deref()), Value::Null);
        self.inner.remote.update(&fanout).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch one record and keep it live. Missing node → `NotFound`.
    pub async fn find_record(
        &self,
        model: &str,
        id: &str,
        options: &OperationOptions,
    ) -> Result<Value> {
        self.inner.fetch_record(model, id, options).await
    }

    /// Fetch every record in the model's collection, fail-fast: if any
    /// individual fetch fails the whole call rejects and no partial result
    /// is surfaced. On success the collection gains a child-added listener
    /// so future additions flow into the local store.
    pub async fn find_all(&self, model: &str) -> Result<Vec<Value>> {
        let inner = &self.inner;
        let collection = build_reference(Arc::clone(&inner.remote), model, None, None);
        let snapshot = collection.fetch().await?;
        if !snapshot.exists() {
            return Err(SyncError::CollectionNotFound(parse_model_name(model)));
        }

        let records = inner
            .fetch_children(model, &snapshot.ordered_keys, None)
            .await?;
        inner.listen_to_collection(model, &collection);
        Ok(records)
    }
}

impl EngineInner {
    pub(crate) async fn write_record(
        self: &Arc<Self>,
        model: &str,
        id: &str,
        data: Value,
        options: &OperationOptions,
    ) -> Result<Value> {
        let snapshot = RecordSnapshot {
            model_name: model.to_string(),
            id: id.to_string(),
            data: data.clone(),
            options: options.clone(),
        };
        let fanout = self
            .serializer
            .serialize(&snapshot, &self.options.inner_reference_path_name);
        self.remote.update(&fanout).await?;

        let record_path = self.record_write_path(model, id, &data, options);
        self.listen_to_record(model, id, &TreeReference::new(Arc::clone(&self.remote), record_path));

        let mut payload = data.as_object().cloned().unwrap_or_default();
        payload.insert("id".to_string(), Value::String(id.to_string()));
        Ok(Value::Object(payload))
    }

    /// The canonical path a written record lives at: the serializer's base
    /// path plus the payload's inner reference path, when present.
    fn record_write_path(
        &self,
        model: &str,
        id: &str,
        data: &Value,
        options: &OperationOptions,
    ) -> String {
        let base = options
            .path
            .clone()
            .unwrap_or_else(|| parse_model_name(model));
        match data
            .get(&self.options.inner_reference_path_name)
            .and_then(Value::as_str)
        {
            Some(inner) if !inner.is_empty() => format!("{base}/{inner}/{id}"),
            _ => format!("{base}/{id}"),
        }
    }

    pub(crate) async fn fetch_record(
        self: &Arc<Self>,
        model: &str,
        id: &str,
        options: &OperationOptions,
    ) -> Result<Value> {
        let reference = build_reference(
            Arc::clone(&self.remote),
            model,
            Some(id),
            options.path.as_deref(),
        );
        let snapshot = reference.fetch().await?;
        if !snapshot.exists() {
            return Err(SyncError::NotFound {
                model: model.to_string(),
                id: id.to_string(),
            });
        }

        self.listen_to_record(model, id, &reference);

        // The listener only sees mutations after it attaches; a write landing
        // between the snapshot and the attach would never be delivered. Read
        // again now that the listener is live and return the reconciled value.
        let snapshot = reference.fetch().await?;
        if !snapshot.exists() {
            self.unload_unless_saving(model, id);
            return Err(SyncError::NotFound {
                model: model.to_string(),
                id: id.to_string(),
            });
        }
        normalize_snapshot(
            &snapshot,
            self.remote.root_path(),
            &self.options.inner_reference_path_name,
        )
    }

    /// Fetch a batch of records by key, fail-fast into an aggregate error.
    /// All fetches settle before the aggregate rejects.
    pub(crate) async fn fetch_children(
        self: &Arc<Self>,
        model: &str,
        keys: &[String],
        path: Option<&str>,
    ) -> Result<Vec<Value>> {
        let options = OperationOptions {
            path: path.map(Into::into),
            include: None,
        };

        let mut records = Vec::with_capacity(keys.len());
        let mut first_error: Option<SyncError> = None;
        let mut failed = 0;
        for key in keys {
            match self.fetch_record(model, key, &options).await {
                Ok(payload) => records.push(payload),
                Err(e) => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(source) => Err(SyncError::Aggregate {
                model: model.to_string(),
                failed,
                total: keys.len(),
                source: Box::new(source),
            }),
            None => Ok(records),
        }
    }

    // -----------------------------------------------------------------------
    // Continuous listeners
    // -----------------------------------------------------------------------

    /// Attach the record's continuous value listener. No-op when the path
    /// already has one — the tracker is the sole race-safe dedup point.
    pub(crate) fn listen_to_record(self: &Arc<Self>, model: &str, id: &str, reference: &TreeReference) {
        let record_path = reference.path().to_string();
        if self.tracker.is_listener_tracked(&record_path, TreeEvent::Value) {
            return;
        }

        self.tracker
            .track_record(model, id, &inner_reference_path(&record_path, ""));

        let on_event: EventCallback = {
            let engine = Arc::clone(self);
            let model = model.to_string();
            let id = id.to_string();
            Arc::new(move |snapshot: TreeSnapshot| {
                if snapshot.exists() {
                    match normalize_snapshot(
                        &snapshot,
                        engine.remote.root_path(),
                        &engine.options.inner_reference_path_name,
                    ) {
                        Ok(payload) => {
                            let store = Arc::clone(&engine.store);
                            let model = model.clone();
                            engine.defer.schedule(async move {
                                let normalized = store.normalize(&model, payload);
                                store.push(&model, normalized);
                            });
                        }
                        Err(e) => {
                            warn!(model = %model, id = %id, error = %e,
                                "dropping remote payload that cannot be normalized");
                        }
                    }
                } else {
                    engine.unload_unless_saving(&model, &id);
                }
            })
        };

        let on_error: ErrorCallback = {
            let engine = Arc::clone(self);
            let model = model.to_string();
            let id = id.to_string();
            Arc::new(move |e| {
                warn!(model = %model, id = %id, error = %e,
                    "record listener errored; treating as removed");
                engine.unload_unless_saving(&model, &id);
            })
        };

        let handle = reference.listen(TreeEvent::Value, on_event, on_error);
        self.tracker
            .track_listener(&record_path, TreeEvent::Value, handle);
    }

    /// Attach the collection's child-added listener. New children are
    /// fetched and pushed into the store on the next flush.
    pub(crate) fn listen_to_collection(self: &Arc<Self>, model: &str, reference: &TreeReference) {
        let collection_path = reference.path().to_string();
        if self
            .tracker
            .is_listener_tracked(&collection_path, TreeEvent::ChildAdded)
        {
            return;
        }

        let on_event: EventCallback = {
            let engine = Arc::clone(self);
            let model = model.to_string();
            Arc::new(move |snapshot: TreeSnapshot| {
                let engine = Arc::clone(&engine);
                let model = model.clone();
                let key = snapshot.key.clone();
                engine.defer.schedule({
                    let engine = Arc::clone(&engine);
                    async move {
                        match engine
                            .fetch_record(&model, &key, &OperationOptions::default())
                            .await
                        {
                            Ok(payload) => {
                                let normalized = engine.store.normalize(&model, payload);
                                engine.store.push(&model, normalized);
                            }
                            Err(e) => {
                                warn!(model = %model, id = %key, error = %e,
                                    "failed to fetch newly added record");
                            }
                        }
                    }
                });
            })
        };

        let on_error: ErrorCallback = {
            let model = model.to_string();
            Arc::new(move |e| {
                warn!(model = %model, error = %e, "collection listener errored");
            })
        };

        let handle = reference.listen(TreeEvent::ChildAdded, on_event, on_error);
        self.tracker
            .track_listener(&collection_path, TreeEvent::ChildAdded, handle);
    }

    /// Unload the local copy unless a save is in flight. Deferred, and the
    /// saving flag is re-checked at apply time — a save that was in flight
    /// when the event arrived may have settled by then.
    fn unload_unless_saving(self: &Arc<Self>, model: &str, id: &str) {
        let store = Arc::clone(&self.store);
        let model = model.to_string();
        let id = id.to_string();
        self.defer.schedule(async move {
            if let Some(record) = store.peek_record(&model, &id) {
                if !record.saving {
                    store.unload_record(&model, &id);
                }
            }
        });
    }
}
