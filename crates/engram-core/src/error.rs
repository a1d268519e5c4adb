//! Error taxonomy for the engine.

/// Errors raised by `engram-core` operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// `remember` was invoked without a configured language-model collaborator.
    #[error("remember requires a language model collaborator")]
    NoLlm,

    /// The language-model collaborator raised, or its output was unusable
    /// after the single retry §6 describes.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The store adapter raised, or persisted state was found corrupted.
    #[error("store error: {0}")]
    Store(String),

    /// Invalid configuration, fatal to `Engine` construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Cosine similarity was applied to vectors of different length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the first vector.
        expected: usize,
        /// Dimension of the second vector.
        actual: usize,
    },

    /// A `beforeStore` hook vetoed admission. `beforeStore` is the only hook
    /// that can produce this error; every other `before*` hook swallows its
    /// own rejection instead of raising it.
    #[error("hook rejected operation: {0}")]
    HookRejected(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngramError>;
