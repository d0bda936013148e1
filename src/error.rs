use thiserror::Error;

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Error surfaced by the remote tree — write failures, listener errors,
/// transport problems. Wraps whatever message the remote surface reported.
#[derive(Debug, Clone, Error)]
#[error("Remote operation failed: {message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Record not found: {model}/{id}")]
    NotFound { model: String, id: String },

    #[error("Collection \"{0}\" does not exist on the remote tree")]
    CollectionNotFound(String),

    #[error("No record matched the query for \"{0}\"")]
    NoQueryMatch(String),

    #[error("No live query is tracked under cache id \"{0}\"")]
    QueryNotTracked(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Fetch batch failed for \"{model}\": {failed} of {total} records errored")]
    Aggregate {
        model: String,
        failed: usize,
        total: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Cannot normalize non-object payload at {path}")]
    InvalidPayload { path: String },
}

/// Convenience alias — the default error type is `SyncError`.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
