//! Errors surfaced by the materializer.

use std::path::PathBuf;

/// Errors produced while restoring or cloning a space.
#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    /// An I/O error occurred on a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the failing operation acted on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A filesystem primitive (tree walk, `.meta` read/write, atomic
    /// rename) failed.
    #[error(transparent)]
    Fs(#[from] holotree_fs::FsError),
    /// Acquiring the per-space lock failed or timed out.
    #[error(transparent)]
    Lock(#[from] holotree_lock::LockError),
    /// Reading, opening, or recording a back-reference against the library
    /// failed.
    #[error(transparent)]
    Library(#[from] holotree_library::LibraryError),
    /// Reading or decoding a catalog failed.
    #[error(transparent)]
    Catalog(#[from] holotree_catalog::CatalogError),
}

impl SpaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SpaceError::Io { path: path.into(), source }
    }
}
