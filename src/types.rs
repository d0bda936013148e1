//! Shared types: query descriptors, operation options, and engine options.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Fanout
// ============================================================================

/// A batch of path → value writes applied atomically in one remote call.
/// `Value::Null` entries are tombstones — the node at that path is removed.
pub type Fanout = BTreeMap<String, Value>;

// ============================================================================
// QueryDescriptor
// ============================================================================

/// Caller-facing query specification over a collection.
///
/// All fields are optional; `order_by` defaults to `"id"` (key ordering)
/// when absent. [`apply_sorting_and_filtering`] mutates the descriptor in
/// place to inject computed defaults — callers must tolerate that.
///
/// [`apply_sorting_and_filtering`]: crate::remote::reference::apply_sorting_and_filtering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryDescriptor {
    /// Field to order by: `"id"` for key ordering, `".value"` for value
    /// ordering, anything else orders by that child field.
    pub order_by: Option<String>,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub equal_to: Option<Value>,
    pub limit_to_first: Option<usize>,
    pub limit_to_last: Option<usize>,
    /// Explicit collection path override.
    pub path: Option<String>,
    /// When true, `path` already points at the record's collection and must
    /// not be forwarded to the per-record fetch.
    pub is_reference: bool,
    /// Caller-supplied cache identifier. Presence turns the query live:
    /// its result set is maintained incrementally until detached.
    pub cache_id: Option<String>,
}

// ============================================================================
// OperationOptions
// ============================================================================

/// Per-operation options for record CRUD.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Collection path override. A record fetched through an override must
    /// be updated and deleted through the same override, never the default.
    pub path: Option<String>,
    /// Extra tombstone fanout merged into a delete write.
    pub include: Option<Fanout>,
}

impl OperationOptions {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            include: None,
        }
    }
}

// ============================================================================
// EngineOptions
// ============================================================================

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Property name under which the inner reference path is stored on
    /// normalized payloads.
    pub inner_reference_path_name: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            inner_reference_path_name: "_innerReferencePath".to_string(),
        }
    }
}
