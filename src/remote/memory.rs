//! MemoryTree — an in-memory [`RemoteTree`] holding the whole tree as one
//! JSON value.
//!
//! Reads apply ordering/range/limit constraints at fetch time. Writes go
//! through the same atomic fanout path as [`RemoteTree::update`] and then
//! notify listeners. Listener dispatch snapshots the registry under the
//! lock and fires callbacks with the lock released, so a callback can
//! register or detach listeners without deadlocking.
//!
//! Live child events honor range and equality constraints but not
//! `limit_to_*` windows — limits apply to one-shot fetches only.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::types::Fanout;

use super::{
    ErrorCallback, EventCallback, ListenerHandle, OrderBy, QueryConstraints, RemoteTree,
    TreeEvent, TreeSnapshot,
};

// ============================================================================
// Listener registry
// ============================================================================

struct ListenerEntry {
    id: u64,
    path: String,
    constraints: QueryConstraints,
    event: TreeEvent,
    on_event: EventCallback,
    on_error: ErrorCallback,
}

// ============================================================================
// MemoryTree
// ============================================================================

pub struct MemoryTree {
    root_path: String,
    data: Mutex<Value>,
    listeners: std::sync::Arc<Mutex<Vec<ListenerEntry>>>,
    next_listener_id: AtomicU64,
    next_key: AtomicU64,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::with_root("")
    }

    /// A tree whose snapshot paths are prefixed with `root_path`.
    pub fn with_root(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            data: Mutex::new(Value::Object(Map::new())),
            listeners: std::sync::Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            next_key: AtomicU64::new(1),
        }
    }

    /// Write a single node, firing listeners. Test seeding helper — shares
    /// the fanout write path.
    pub fn set(&self, path: &str, value: Value) {
        let mut fanout = Fanout::new();
        fanout.insert(path.to_string(), value);
        self.apply_fanout(&fanout);
    }

    /// Number of currently attached listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Dispatch a subscription error to every listener attached at `path`,
    /// as a backend losing read permission on that node would. Callbacks
    /// collected under the lock, fired outside it. Test helper.
    pub fn fail_listeners_at(&self, path: &str, error: RemoteError) {
        let callbacks: Vec<ErrorCallback> = self
            .listeners
            .lock()
            .iter()
            .filter(|entry| entry.path == path)
            .map(|entry| entry.on_error.clone())
            .collect();
        for callback in callbacks {
            callback(error.clone());
        }
    }

    /// Current value at `path` (`Value::Null` when missing). Test helper.
    pub fn value_at(&self, path: &str) -> Value {
        let data = self.data.lock();
        node_at(&data, path).cloned().unwrap_or(Value::Null)
    }

    fn full_path(&self, path: &str) -> String {
        if self.root_path.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.root_path)
        }
    }

    fn snapshot_from(&self, tree: &Value, path: &str, constraints: &QueryConstraints) -> TreeSnapshot {
        let node = node_at(tree, path).cloned().unwrap_or(Value::Null);
        let key = path.rsplit('/').next().unwrap_or("").to_string();

        match node.as_object() {
            Some(obj) if !obj.is_empty() => {
                let children = apply_constraints(obj, constraints);
                let ordered_keys: Vec<String> = children.iter().map(|(k, _)| k.clone()).collect();
                let mut value = Map::new();
                for (k, v) in children {
                    value.insert(k, v);
                }
                TreeSnapshot {
                    key,
                    path: self.full_path(path),
                    value: Value::Object(value),
                    ordered_keys,
                }
            }
            _ => TreeSnapshot {
                key,
                path: self.full_path(path),
                value: node,
                ordered_keys: Vec::new(),
            },
        }
    }

    fn apply_fanout(&self, fanout: &Fanout) {
        let before = {
            let mut data = self.data.lock();
            let before = data.clone();
            for (path, value) in fanout {
                write_at(&mut data, path, value.clone());
            }
            before
        };

        let changed: Vec<&str> = fanout.keys().map(String::as_str).collect();
        self.notify(&before, &changed);
    }

    /// Fire listeners affected by the changed paths. Callbacks run with no
    /// lock held.
    fn notify(&self, before: &Value, changed: &[&str]) {
        let after = self.data.lock().clone();

        // (callback, snapshot) pairs collected under the registry lock.
        let mut pending: Vec<(EventCallback, TreeSnapshot)> = Vec::new();
        {
            let listeners = self.listeners.lock();
            for entry in listeners.iter() {
                if !changed.iter().any(|p| paths_related(p, &entry.path)) {
                    continue;
                }
                match entry.event {
                    TreeEvent::Value => {
                        let snap = self.snapshot_from(&after, &entry.path, &QueryConstraints::default());
                        pending.push((entry.on_event.clone(), snap));
                    }
                    TreeEvent::ChildAdded | TreeEvent::ChildRemoved => {
                        let before_keys = matching_child_keys(before, &entry.path, &entry.constraints);
                        let after_keys = matching_child_keys(&after, &entry.path, &entry.constraints);

                        if entry.event == TreeEvent::ChildAdded {
                            for key in &after_keys {
                                if !before_keys.contains(key) {
                                    let child_path = format!("{}/{key}", entry.path);
                                    let snap = self.snapshot_from(&after, &child_path, &QueryConstraints::default());
                                    pending.push((entry.on_event.clone(), snap));
                                }
                            }
                        } else {
                            for key in &before_keys {
                                if !after_keys.contains(key) {
                                    let child_path = format!("{}/{key}", entry.path);
                                    // Removed children snapshot their last value.
                                    let snap = self.snapshot_from(before, &child_path, &QueryConstraints::default());
                                    pending.push((entry.on_event.clone(), snap));
                                }
                            }
                        }
                    }
                }
            }
        }

        for (callback, snapshot) in pending {
            callback(snapshot);
        }
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTree for MemoryTree {
    fn root_path(&self) -> &str {
        &self.root_path
    }

    fn generate_key(&self) -> String {
        let n = self.next_key.fetch_add(1, AtomicOrdering::Relaxed);
        format!("-K{n:016x}")
    }

    async fn fetch(
        &self,
        path: &str,
        constraints: &QueryConstraints,
    ) -> Result<TreeSnapshot, RemoteError> {
        let tree = self.data.lock().clone();
        Ok(self.snapshot_from(&tree, path, constraints))
    }

    fn listen(
        &self,
        path: &str,
        constraints: &QueryConstraints,
        event: TreeEvent,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::Relaxed);
        self.listeners.lock().push(ListenerEntry {
            id,
            path: path.to_string(),
            constraints: constraints.clone(),
            event,
            on_event,
            on_error,
        });

        let listeners = std::sync::Arc::clone(&self.listeners);
        ListenerHandle::new(move || {
            listeners.lock().retain(|entry| entry.id != id);
        })
    }

    async fn update(&self, fanout: &Fanout) -> Result<(), RemoteError> {
        self.apply_fanout(fanout);
        Ok(())
    }
}

// ============================================================================
// Tree navigation
// ============================================================================

fn node_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn write_at(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    write_segments(root, &segments, value);
}

fn write_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((key, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Some(obj) = node.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            obj.remove(*key);
        } else {
            obj.insert((*key).to_string(), value);
        }
        return;
    }

    let child = obj
        .entry((*key).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    write_segments(child, rest, value);

    // Empty branches are pruned, matching tombstone semantics.
    if child.as_object().is_some_and(Map::is_empty) {
        obj.remove(*key);
    }
}

// ============================================================================
// Ordering & constraints
// ============================================================================

/// The value a child sorts and ranges by under the given ordering.
fn order_value(key: &str, child: &Value, order: &OrderBy) -> Value {
    match order {
        OrderBy::Key => Value::String(key.to_string()),
        OrderBy::Value => child.clone(),
        OrderBy::Child(field) => get_field(child, field).cloned().unwrap_or(Value::Null),
    }
}

/// Get a nested value using a dot-separated field path.
fn get_field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Tree-store type ranking: null < bool < number < string < everything else.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        _ => 4,
    }
}

fn compare_order_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        _ => Ordering::Equal,
    }
}

/// Order, filter, and limit a node's children.
fn apply_constraints(obj: &Map<String, Value>, c: &QueryConstraints) -> Vec<(String, Value)> {
    let mut children: Vec<(String, Value)> = obj
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    children.sort_by(|(ka, va), (kb, vb)| {
        compare_order_values(&order_value(ka, va, &c.order), &order_value(kb, vb, &c.order))
            .then_with(|| ka.cmp(kb))
    });

    if let Some(eq) = &c.equal_to {
        children.retain(|(k, v)| order_value(k, v, &c.order) == *eq);
    } else {
        if let Some(start) = &c.start_at {
            children.retain(|(k, v)| {
                compare_order_values(&order_value(k, v, &c.order), start) != Ordering::Less
            });
        }
        if let Some(end) = &c.end_at {
            children.retain(|(k, v)| {
                compare_order_values(&order_value(k, v, &c.order), end) != Ordering::Greater
            });
        }
    }

    if let Some(n) = c.limit_to_first {
        children.truncate(n);
    }
    if let Some(n) = c.limit_to_last {
        if children.len() > n {
            children.drain(..children.len() - n);
        }
    }

    children
}

/// Child keys of `path` that match the listener's range constraints.
/// Limits are deliberately ignored for live events.
fn matching_child_keys(tree: &Value, path: &str, c: &QueryConstraints) -> Vec<String> {
    let unwindowed = QueryConstraints {
        limit_to_first: None,
        limit_to_last: None,
        ..c.clone()
    };
    match node_at(tree, path).and_then(Value::as_object) {
        Some(obj) => apply_constraints(obj, &unwindowed)
            .into_iter()
            .map(|(k, _)| k)
            .collect(),
        None => Vec::new(),
    }
}

/// Whether a write at `changed` affects a listener at `listened`.
fn paths_related(changed: &str, listened: &str) -> bool {
    changed == listened
        || changed.starts_with(&format!("{listened}/"))
        || listened.starts_with(&format!("{changed}/"))
}

// ============================================================================
// Tests
// ============================================================================
