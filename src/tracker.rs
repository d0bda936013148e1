//! SubscriptionTracker — the registry that prevents duplicate live
//! listeners and owns all listener lifecycle state.
//!
//! Three registries, each behind its own `parking_lot::Mutex`:
//!
//!   - listeners: `(path, event) → ListenerHandle`. At most one live
//!     listener of a given type per path; this is the sole deduplication
//!     mechanism across repeated fetches of the same record or collection.
//!   - records: `model → { id → inner reference path }`. Entries are never
//!     evicted — a record that stops being live keeps its entry, only its
//!     listener is gone. Growth is bounded by the number of distinct
//!     records ever fetched.
//!   - queries: `cache_id → TrackedQuery`. One live subscription per cache
//!     identifier; registering a replacement tears the old one down first.
//!
//! The tracker is owned by one engine instance, never shared ambient state,
//! so independent engines can run side by side.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::remote::{ListenerHandle, TreeEvent};
use crate::types::QueryDescriptor;

// ============================================================================
// TrackedQuery
// ============================================================================

/// A live cached query: its descriptor (needed for pagination refresh), the
/// shared result array its listeners append to and remove from, and the
/// cancellation handles for those listeners.
pub struct TrackedQuery {
    pub model: String,
    pub descriptor: QueryDescriptor,
    pub results: Arc<Mutex<Vec<Value>>>,
    pub handles: Vec<ListenerHandle>,
}

impl TrackedQuery {
    /// Detach all live listeners, consuming the entry.
    pub fn detach(self) {
        for handle in self.handles {
            handle.detach();
        }
    }
}

// ============================================================================
// SubscriptionTracker
// ============================================================================

#[derive(Default)]
pub struct SubscriptionTracker {
    listeners: Mutex<HashMap<(String, TreeEvent), ListenerHandle>>,
    records: Mutex<HashMap<String, HashMap<String, String>>>,
    queries: Mutex<HashMap<String, TrackedQuery>>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn is_listener_tracked(&self, key: &str, event: TreeEvent) -> bool {
        self.listeners
            .lock()
            .contains_key(&(key.to_string(), event))
    }

    /// Register a listener handle. Idempotent: when the key is already
    /// tracked the existing handle is kept and the redundant incoming one
    /// is detached, so no duplicate listener stays live.
    pub fn track_listener(&self, key: &str, event: TreeEvent, handle: ListenerHandle) {
        let displaced = {
            let mut listeners = self.listeners.lock();
            match listeners.entry((key.to_string(), event)) {
                std::collections::hash_map::Entry::Occupied(_) => Some(handle),
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(handle);
                    None
                }
            }
        };
        // Detach outside the lock — detach closures may re-enter.
        if let Some(handle) = displaced {
            handle.detach();
        }
    }

    /// Number of tracked listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    pub fn is_record_tracked(&self, model: &str, id: &str) -> bool {
        self.records
            .lock()
            .get(model)
            .is_some_and(|ids| ids.contains_key(id))
    }

    /// Record the inner reference path for a fetched record. Ids merge into
    /// the model's map; re-tracking one record never discards its siblings.
    pub fn track_record(&self, model: &str, id: &str, inner_path: &str) {
        self.records
            .lock()
            .entry(model.to_string())
            .or_default()
            .insert(id.to_string(), inner_path.to_string());
    }

    /// Inner reference path recorded for a tracked record.
    pub fn tracked_inner_path(&self, model: &str, id: &str) -> Option<String> {
        self.records
            .lock()
            .get(model)
            .and_then(|ids| ids.get(id).cloned())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_query_tracked(&self, cache_id: &str) -> bool {
        self.queries.lock().contains_key(cache_id)
    }

    /// Store a live query under its cache identifier. Any previous entry
    /// for the same identifier has its listeners detached first — only one
    /// live subscription per cache identifier, ever.
    pub fn track_query(&self, cache_id: &str, query: TrackedQuery) {
        let previous = self.queries.lock().insert(cache_id.to_string(), query);
        if let Some(previous) = previous {
            previous.detach();
        }
    }

    /// Remove and return a tracked query, leaving its listeners attached.
    /// Callers detach or re-register as appropriate.
    pub fn take_query(&self, cache_id: &str) -> Option<TrackedQuery> {
        self.queries.lock().remove(cache_id)
    }

    /// The shared result array of a tracked query.
    pub fn query_results(&self, cache_id: &str) -> Option<Arc<Mutex<Vec<Value>>>> {
        self.queries
            .lock()
            .get(cache_id)
            .map(|q| Arc::clone(&q.results))
    }
}

// ============================================================================
// Tests
// ============================================================================
