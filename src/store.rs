//! Local store and serializer boundaries, plus the instrumented in-memory
//! store the tests drive.
//!
//! The local store holds normalized records and is mutated only between
//! turns — live listeners route every push through the engine's defer
//! queue, never mutate the store inside the callback that observed the
//! remote change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::path::parse_model_name;
use crate::types::{Fanout, OperationOptions};

// ============================================================================
// LocalStore
// ============================================================================

/// A record as the local store holds it.
#[derive(Debug, Clone)]
pub struct StoreRecord {
    pub id: String,
    pub data: Value,
    /// True while a save for this record is in flight. Records mid-save are
    /// never unloaded by listener teardown.
    pub saving: bool,
}

/// The client-side object store. All methods are synchronous; callers that
/// react to remote events defer these calls to the next turn.
pub trait LocalStore: Send + Sync {
    /// Shape a raw payload into the store's normalized form.
    fn normalize(&self, model: &str, payload: Value) -> Value;

    /// Insert or replace a normalized record.
    fn push(&self, model: &str, payload: Value);

    /// Look up a record without side effects.
    fn peek_record(&self, model: &str, id: &str) -> Option<StoreRecord>;

    /// Drop a record from local state.
    fn unload_record(&self, model: &str, id: &str);
}

// ============================================================================
// RecordSerializer
// ============================================================================

/// A record about to be written, as handed to the serializer.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    pub model_name: String,
    pub id: String,
    pub data: Value,
    pub options: OperationOptions,
}

/// Turns a record snapshot into the fanout of path → value writes that
/// persists it, honoring the inner-path convention.
pub trait RecordSerializer: Send + Sync {
    fn serialize(&self, snapshot: &RecordSnapshot, inner_path_prop: &str) -> Fanout;
}

/// Default serializer: one write at `{base}/{id}`, or
/// `{base}/{inner}/{id}` when the payload carries a non-empty inner
/// reference path. The `id` and inner-path properties are stripped from
/// the written value.
#[derive(Debug, Default)]
pub struct FanoutSerializer;

impl RecordSerializer for FanoutSerializer {
    fn serialize(&self, snapshot: &RecordSnapshot, inner_path_prop: &str) -> Fanout {
        let mut data = snapshot
            .data
            .as_object()
            .cloned()
            .unwrap_or_default();
        data.remove("id");
        let inner = match data.remove(inner_path_prop) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        };

        let base = snapshot
            .options
            .path
            .clone()
            .unwrap_or_else(|| parse_model_name(&snapshot.model_name));
        let path = match inner {
            Some(inner) => format!("{base}/{inner}/{}", snapshot.id),
            None => format!("{base}/{}", snapshot.id),
        };

        let mut fanout = Fanout::new();
        fanout.insert(path, Value::Object(data));
        fanout
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory [`LocalStore`] with call instrumentation for tests: counts
/// pushes and unloads, and lets a test flag a record as mid-save.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, HashMap<String, StoreRecord>>>,
    push_count: AtomicUsize,
    unload_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_count(&self) -> usize {
        self.push_count.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unload_count.load(Ordering::SeqCst)
    }

    /// Flag a record as mid-save (or clear the flag).
    pub fn set_saving(&self, model: &str, id: &str, saving: bool) {
        if let Some(record) = self
            .records
            .lock()
            .get_mut(model)
            .and_then(|ids| ids.get_mut(id))
        {
            record.saving = saving;
        }
    }

    /// All ids currently loaded for a model, sorted.
    pub fn loaded_ids(&self, model: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .lock()
            .get(model)
            .map(|ids| ids.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl LocalStore for MemoryStore {
    fn normalize(&self, _model: &str, payload: Value) -> Value {
        payload
    }

    fn push(&self, model: &str, payload: Value) {
        let Some(id) = payload.get("id").and_then(Value::as_str).map(String::from) else {
            return;
        };
        self.push_count.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .entry(model.to_string())
            .or_default()
            .insert(
                id.clone(),
                StoreRecord {
                    id,
                    data: payload,
                    saving: false,
                },
            );
    }

    fn peek_record(&self, model: &str, id: &str) -> Option<StoreRecord> {
        self.records
            .lock()
            .get(model)
            .and_then(|ids| ids.get(id))
            .cloned()
    }

    fn unload_record(&self, model: &str, id: &str) {
        let removed = self
            .records
            .lock()
            .get_mut(model)
            .and_then(|ids| ids.remove(id));
        if removed.is_some() {
            self.unload_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
