//! Errors surfaced by the build pipeline.

use std::path::PathBuf;

/// Errors produced while building, staging, or promoting an environment.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    /// An I/O error occurred on a specific path, outside of the primitives
    /// already wrapped by [`holotree_fs::FsError`] (e.g. spawning a
    /// subprocess, or writing the plan file).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path or command the failing operation acted on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A filesystem primitive (directory creation, atomic write, tree walk)
    /// failed.
    #[error(transparent)]
    Fs(#[from] holotree_fs::FsError),
    /// Acquiring the build lock failed or timed out.
    #[error(transparent)]
    Lock(#[from] holotree_lock::LockError),
    /// Promoting a staged object into the library failed.
    #[error(transparent)]
    Library(#[from] holotree_library::LibraryError),
    /// Publishing the resulting catalog failed.
    #[error(transparent)]
    Catalog(#[from] holotree_catalog::CatalogError),
    /// The solver exited non-zero without tripping the corruption detector.
    #[error("solver exited with status {0}")]
    SolverFailed(i32),
    /// All three corruption signals latched during the solver run; the
    /// staged target was discarded and the failure is not worth retrying
    /// with the same cache.
    #[error("solver cache appears corrupted; staged environment discarded")]
    SolverUnsafe,
    /// The pip-style installer exited non-zero.
    #[error("installer exited with status {0}")]
    InstallerFailed(i32),
    /// A post-install command exited non-zero.
    #[error("post-install command '{command}' exited with status {status}")]
    PostInstallFailed {
        /// The command line that failed, verbatim.
        command: String,
        /// Its exit status.
        status: i32,
    },
    /// Capturing the activation environment exited non-zero.
    #[error("activation capture exited with status {0}")]
    ActivationFailed(i32),
    /// The activator printed something that was not a JSON object of
    /// string values.
    #[error("activation output was not a JSON object of strings: {0}")]
    ActivationOutputInvalid(#[from] serde_json::Error),
}

impl BuilderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuilderError::Io {
            path: path.into(),
            source,
        }
    }
}
