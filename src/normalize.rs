//! Snapshot normalization — raw remote-tree snapshots become record
//! payloads annotated with their id and inner reference path.

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::remote::TreeSnapshot;

/// The path segment between the immediate parent collection and the record
/// node: strip the tree root prefix, drop the collection-root segment and
/// the record's own key, re-join the remainder.
///
/// `users/u1/profile/p1` with root `users` yields `"profile"`; a flat
/// `posts/p1` yields `""`.
pub fn inner_reference_path(full_path: &str, root_path: &str) -> String {
    let relative = full_path
        .strip_prefix(root_path)
        .unwrap_or(full_path)
        .trim_start_matches('/');

    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() <= 2 {
        return String::new();
    }
    segments[1..segments.len() - 1].join("/")
}

/// Shape a raw snapshot into a record payload: the decoded value object
/// augmented with `id` and the inner reference path under
/// `inner_path_prop`. Non-object values are rejected — augmenting them is
/// undefined.
pub fn normalize_snapshot(
    snapshot: &TreeSnapshot,
    root_path: &str,
    inner_path_prop: &str,
) -> Result<Value> {
    let Some(obj) = snapshot.value.as_object() else {
        return Err(SyncError::InvalidPayload {
            path: snapshot.path.clone(),
        });
    };

    let mut payload = obj.clone();
    payload.insert("id".to_string(), Value::String(snapshot.key.clone()));
    payload.insert(
        inner_path_prop.to_string(),
        Value::String(inner_reference_path(&snapshot.path, root_path)),
    );
    Ok(Value::Object(payload))
}

// ============================================================================
// Tests
// ============================================================================
