//! Error taxonomy
//!
//! One enum for everything the core can fail with. Component modules may
//! define narrower internal error types (`VectorSearchError`) and convert
//! into this one with `#[from]`.

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors the core can return.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Empty content, salience out of range, unknown source, unknown type, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stored dimension pin does not match the requested dimension. Fatal:
    /// the caller must discard the handle.
    #[error("dimension mismatch: store is pinned at {stored}, requested {requested}")]
    DimensionMismatch {
        /// Dimension recorded in the store.
        stored: usize,
        /// Dimension the caller asked for.
        requested: usize,
    },

    /// A contradiction, run, or claim id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation that requires a particular state was attempted from the
    /// wrong state (rollback of an already-rolled-back run, supersede of a
    /// nonexistent episode, etc).
    #[error("state violation: {0}")]
    StateViolation(String),

    /// An operation requires a capability (LLM adapter) that was not
    /// configured.
    #[error("missing capability: {0}")]
    MissingCapability(String),

    /// Embedding or LLM adapter failure.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Underlying storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O error opening or migrating the store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector index error.
    #[error("vector index error: {0}")]
    VectorIndex(String),
}
