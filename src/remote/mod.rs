//! The remote-tree boundary: trait, snapshots, query constraints, and
//! listener cancellation handles.
//!
//! The remote database is an external collaborator. This module specifies
//! its surface: a path-addressed tree with one-shot reads, continuous event
//! subscriptions, ordering/filtering operators, an atomic multi-path
//! `update`, and a unique-key generator. [`memory::MemoryTree`] is the
//! in-crate implementation used throughout the tests.
//!
//! # Modules
//!
//! - [`reference`] — [`reference::TreeReference`] handles and descriptor →
//!   constraint translation.
//! - [`memory`] — the in-memory remote tree.

pub mod memory;
pub mod reference;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::types::Fanout;

// ============================================================================
// Events and callbacks
// ============================================================================

/// Event types a continuous listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeEvent {
    /// The node's value changed (fires for the node and anything beneath it).
    Value,
    /// A child appeared under the node.
    ChildAdded,
    /// A child disappeared from under the node.
    ChildRemoved,
}

/// Callback invoked with a snapshot on every matching event.
pub type EventCallback = Arc<dyn Fn(TreeSnapshot) + Send + Sync>;

/// Callback invoked when the subscription itself errors.
pub type ErrorCallback = Arc<dyn Fn(RemoteError) + Send + Sync>;

// ============================================================================
// ListenerHandle
// ============================================================================

/// An explicit cancellation handle for one continuous listener.
///
/// Detaching is synchronous and immediate; once detached the callback never
/// fires again. Dropping the handle without calling [`detach`] leaves the
/// listener live — lifecycle ownership belongs to the subscription tracker,
/// not to scope.
///
/// [`detach`]: ListenerHandle::detach
pub struct ListenerHandle {
    detach: Box<dyn FnOnce() + Send + Sync>,
}

impl ListenerHandle {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Box::new(detach),
        }
    }

    /// Stop the listener. Consumes the handle.
    pub fn detach(self) {
        (self.detach)();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ListenerHandle")
    }
}

// ============================================================================
// TreeSnapshot
// ============================================================================

/// A raw remote-tree snapshot: key, full path (including the tree root
/// prefix), decoded value, and — for collection reads — the child keys in
/// query order.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// Last path segment — the node's own key.
    pub key: String,
    /// Full reference path, root prefix included.
    pub path: String,
    /// Decoded value; `Value::Null` when the node does not exist.
    pub value: Value,
    /// Child keys in the order produced by the applied constraints.
    /// Empty for leaf nodes.
    pub ordered_keys: Vec<String>,
}

impl TreeSnapshot {
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Value of a direct child, if present.
    pub fn child_value(&self, key: &str) -> Option<&Value> {
        self.value.as_object().and_then(|obj| obj.get(key))
    }
}

// ============================================================================
// QueryConstraints
// ============================================================================

/// Ordering applied to a collection read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OrderBy {
    /// Order by child key.
    #[default]
    Key,
    /// Order by child value (leaf collections).
    Value,
    /// Order by a child field, dotted paths allowed.
    Child(String),
}

/// Ordering, range, and limit operators for one collection read or
/// subscription. Range operators compare against the ordering value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryConstraints {
    pub order: OrderBy,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub equal_to: Option<Value>,
    pub limit_to_first: Option<usize>,
    pub limit_to_last: Option<usize>,
}

// ============================================================================
// RemoteTree
// ============================================================================

/// The remote hierarchical real-time database.
///
/// Paths are slash-delimited and relative to the tree root; snapshots carry
/// the full path with [`root_path`] prepended. `update` applies its fanout
/// atomically — all paths succeed or none do.
///
/// [`root_path`]: RemoteTree::root_path
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// Root prefix present on every snapshot path. May be empty.
    fn root_path(&self) -> &str;

    /// Generate a collection-unique, lexicographically increasing key.
    fn generate_key(&self) -> String;

    /// One-shot read of the node at `path` with `constraints` applied.
    async fn fetch(
        &self,
        path: &str,
        constraints: &QueryConstraints,
    ) -> Result<TreeSnapshot, RemoteError>;

    /// Attach a continuous listener. Fires on every subsequent matching
    /// mutation until the returned handle is detached.
    fn listen(
        &self,
        path: &str,
        constraints: &QueryConstraints,
        event: TreeEvent,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> ListenerHandle;

    /// Atomic multi-path write. `Value::Null` entries remove their node.
    async fn update(&self, fanout: &Fanout) -> Result<(), RemoteError>;
}
