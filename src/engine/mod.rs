//! SyncEngine — orchestrates record CRUD and queries against the remote
//! tree and wires the subscription tracker so every fetched record keeps
//! receiving live updates until unloaded.
//!
//! # Threading model
//!
//! `SyncEngine` wraps an `Arc<EngineInner>`; listener callbacks capture a
//! cloned inner handle, never `&self`. All registry state lives behind
//! `parking_lot` mutexes inside the tracker and defer queue, and no lock is
//! ever held across an `.await`. Store mutations triggered by listeners go
//! through the defer queue and are applied on [`flush`], never inside the
//! callback that observed the remote change.
//!
//! # Modules
//!
//! - [`records`] — create/find/find-all/delete and the continuous record
//!   listener.
//! - [`queries`] — single- and multi-result queries, live cached result
//!   maintenance, pagination.
//!
//! [`flush`]: SyncEngine::flush

pub mod queries;
pub mod records;

pub use queries::QueryResults;

use std::sync::Arc;

use crate::defer::DeferQueue;
use crate::remote::RemoteTree;
use crate::store::{FanoutSerializer, LocalStore, RecordSerializer};
use crate::tracker::SubscriptionTracker;
use crate::types::EngineOptions;

// ============================================================================
// SyncEngine
// ============================================================================

pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) remote: Arc<dyn RemoteTree>,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) serializer: Arc<dyn RecordSerializer>,
    pub(crate) tracker: SubscriptionTracker,
    pub(crate) defer: DeferQueue,
    pub(crate) options: EngineOptions,
}

impl SyncEngine {
    /// An engine with the default serializer and options.
    pub fn new(remote: Arc<dyn RemoteTree>, store: Arc<dyn LocalStore>) -> Self {
        Self::with_options(
            remote,
            store,
            Arc::new(FanoutSerializer),
            EngineOptions::default(),
        )
    }

    pub fn with_options(
        remote: Arc<dyn RemoteTree>,
        store: Arc<dyn LocalStore>,
        serializer: Arc<dyn RecordSerializer>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                remote,
                store,
                serializer,
                tracker: SubscriptionTracker::new(),
                defer: DeferQueue::new(),
                options,
            }),
        }
    }

    /// The engine's subscription registries.
    pub fn tracker(&self) -> &SubscriptionTracker {
        &self.inner.tracker
    }

    /// Apply all store mutations deferred by live listeners since the last
    /// flush, to a fixpoint.
    pub async fn flush(&self) {
        self.inner.defer.drain().await;
    }

    /// Number of deferred tasks waiting for the next flush.
    pub fn pending_deferred(&self) -> usize {
        self.inner.defer.pending()
    }
}
