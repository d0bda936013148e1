//! tree-sync — record/query synchronization core for a hierarchical
//! real-time remote tree.
//!
//! The crate keeps a client-side object store in step with a remote
//! tree-shaped database that pushes change notifications over a persistent
//! connection. It maps typed records to and from tree paths, keeps live
//! subscriptions so remote mutations re-enter local state exactly once,
//! deduplicates overlapping subscriptions, and maintains paginated,
//! sorted, filtered query results incrementally.
//!
//! # Modules
//!
//! - [`path`] — canonical path resolution from model names.
//! - [`remote`] — the remote-tree boundary: [`remote::RemoteTree`],
//!   references, constraints, and the in-memory [`remote::memory::MemoryTree`].
//! - [`normalize`] — raw snapshot → record payload shaping.
//! - [`tracker`] — subscription registries and cancellation handles.
//! - [`store`] — local store and serializer boundaries.
//! - [`defer`] — the apply-after-current-turn queue.
//! - [`engine`] — the record sync engine and query engine.

pub mod defer;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod path;
pub mod remote;
pub mod store;
pub mod tracker;
pub mod types;

pub use engine::SyncEngine;
pub use error::{RemoteError, Result, SyncError};
pub use types::{EngineOptions, OperationOptions, QueryDescriptor};
