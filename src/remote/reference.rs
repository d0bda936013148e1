//! TreeReference — a resolved handle on a remote-tree location, plus the
//! descriptor → constraint translation used by the query engine.

use std::sync::Arc;

use crate::error::RemoteError;
use crate::path::resolve_path;
use crate::types::QueryDescriptor;

use super::{
    ErrorCallback, EventCallback, ListenerHandle, OrderBy, QueryConstraints, RemoteTree,
    TreeEvent, TreeSnapshot,
};

// ============================================================================
// TreeReference
// ============================================================================

/// A live handle on a remote-tree location, parameterized by the
/// sort/filter/pagination constraints that apply to reads through it.
#[derive(Clone)]
pub struct TreeReference {
    tree: Arc<dyn RemoteTree>,
    path: String,
    constraints: QueryConstraints,
}

impl TreeReference {
    pub fn new(tree: Arc<dyn RemoteTree>, path: impl Into<String>) -> Self {
        Self {
            tree,
            path: path.into(),
            constraints: QueryConstraints::default(),
        }
    }

    /// Root-relative path of this reference.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn constraints(&self) -> &QueryConstraints {
        &self.constraints
    }

    /// A child reference, without constraints.
    pub fn child(&self, segment: &str) -> TreeReference {
        TreeReference::new(Arc::clone(&self.tree), format!("{}/{segment}", self.path))
    }

    /// One-shot read through this reference's constraints.
    pub async fn fetch(&self) -> Result<TreeSnapshot, RemoteError> {
        self.tree.fetch(&self.path, &self.constraints).await
    }

    /// Attach a continuous listener through this reference's constraints.
    pub fn listen(
        &self,
        event: TreeEvent,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> ListenerHandle {
        self.tree
            .listen(&self.path, &self.constraints, event, on_event, on_error)
    }
}

impl std::fmt::Debug for TreeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeReference")
            .field("path", &self.path)
            .field("constraints", &self.constraints)
            .finish()
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Build a reference for a record (or, with `id = None`, its collection),
/// honoring an explicit path override.
pub fn build_reference(
    tree: Arc<dyn RemoteTree>,
    model_name: &str,
    id: Option<&str>,
    path: Option<&str>,
) -> TreeReference {
    let resolved = match id {
        Some(id) => resolve_path(model_name, id, path),
        None => match path {
            Some(p) => p.to_string(),
            None => crate::path::parse_model_name(model_name),
        },
    };
    TreeReference::new(tree, resolved)
}

/// Apply a descriptor's ordering, range, and limit operators to `reference`.
///
/// The descriptor is mutated in place: a missing `order_by` is set to
/// `"id"`, and `force_single_result` rewrites the limit fields so that
/// exactly one of them is `1` — an already-present `limit_to_last` is
/// preferred, otherwise `limit_to_first = 1` is injected.
///
/// Operators are applied in the fixed order start_at, end_at, equal_to,
/// limit_to_first, limit_to_last.
pub fn apply_sorting_and_filtering(
    mut reference: TreeReference,
    descriptor: &mut QueryDescriptor,
    force_single_result: bool,
) -> TreeReference {
    if descriptor.order_by.is_none() {
        descriptor.order_by = Some("id".to_string());
    }

    let order = match descriptor.order_by.as_deref() {
        Some(".value") => OrderBy::Value,
        Some("id") | None => OrderBy::Key,
        Some(field) => OrderBy::Child(field.to_string()),
    };

    if force_single_result {
        if descriptor.limit_to_last.is_some() {
            descriptor.limit_to_last = Some(1);
            descriptor.limit_to_first = None;
        } else {
            descriptor.limit_to_first = Some(1);
            descriptor.limit_to_last = None;
        }
    }

    reference.constraints = QueryConstraints {
        order,
        start_at: descriptor.start_at.clone(),
        end_at: descriptor.end_at.clone(),
        equal_to: descriptor.equal_to.clone(),
        limit_to_first: descriptor.limit_to_first,
        limit_to_last: descriptor.limit_to_last,
    };
    reference
}

// ============================================================================
// Tests
// ============================================================================
