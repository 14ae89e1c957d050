//! The aggregate error type returned by [`crate::materialize`].

use holotree_hash::Blueprint;

/// Everything that can go wrong composing a blueprint, building it, or
/// materializing a space, flattened into one enum so callers have a single
/// `match` surface instead of threading through five sub-crate error types.
#[derive(Debug, thiserror::Error)]
pub enum HolotreeError {
    /// Parsing or merging the contributing descriptor files failed.
    #[error(transparent)]
    Compose(#[from] holotree_descriptor::ComposeError),
    /// A filesystem primitive failed outside any more specific sub-crate.
    #[error(transparent)]
    Fs(#[from] holotree_fs::FsError),
    /// Acquiring a lock failed or timed out.
    #[error(transparent)]
    Lock(#[from] holotree_lock::LockError),
    /// Reading or writing the library failed.
    #[error(transparent)]
    Library(#[from] holotree_library::LibraryError),
    /// Reading or writing a catalog failed.
    #[error(transparent)]
    Catalog(#[from] holotree_catalog::CatalogError),
    /// The build pipeline failed.
    #[error(transparent)]
    Build(#[from] holotree_builder::BuilderError),
    /// Materializing a space failed.
    #[error(transparent)]
    Space(#[from] holotree_space::SpaceError),
    /// Reading the stats journal failed.
    #[error(transparent)]
    Journal(#[from] holotree_journal::JournalError),
    /// The catalog had no entry for this blueprint and the context forbids
    /// building one (`no_build`).
    #[error("blueprint {0} is not in the catalog and building is disabled")]
    BuildDisabled(Blueprint),
}
