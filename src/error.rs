//! Error types for the fastfair crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by pool and tree operations.
///
/// Internal retry conditions (a writer observing a deleted node, or a key
/// that migrated right across a split) are handled by re-descending from
/// the root and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool file could not be created or opened. Fatal at `open`.
    #[error("pool '{}' unavailable: {source}", path.display())]
    PoolUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not carry a valid pool header.
    #[error("'{}' is not a fastfair pool (bad magic or version)", path.display())]
    InvalidPool { path: PathBuf },

    /// The pool has no room left for another allocation.
    ///
    /// Surfaced to the caller; the tree itself stays usable.
    #[error("pool out of space (requested {requested} bytes)")]
    OutOfSpace { requested: usize },

    /// An I/O error outside of pool open.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
