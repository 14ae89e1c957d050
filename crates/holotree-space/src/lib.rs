#![deny(missing_docs)]

//! The materializer (holotree space): restores a working environment
//! directory from a catalog, preferring a warm template clone over a full
//! library restore, and records back-references with the library as it
//! goes.
//!
//! A space directory lives at
//! `<holotree_root>/<blueprint>_<controller>_<space_name>/`, with a
//! sibling `<...>.meta` sidecar holding its expected pristine digest.
//! [`Materializer::restore`] always checks pristineness against that
//! sidecar (never against a fresh library re-hash — that's the library's
//! own `sweep`/`verify` job), keeping restore cost O(files) rather than
//! O(bytes) for the common already-pristine case.

mod clone;
mod error;
mod mode;

pub use clone::default_clone_workers;
pub use error::SpaceError;
pub use mode::MaterializeMode;

use holotree_catalog::{Catalog, LinkKind};
use holotree_hash::Blueprint;
use holotree_journal::{EventKind, JournalEvent, Outcome as JournalOutcome};
use holotree_library::Library;
use holotree_lock::Locker;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

/// The tagged result of a [`Materializer::restore`] call, mirroring the
/// `{hit, dirty, miss, failure}` outcome taxonomy of §9 (`failure` is
/// modeled as `Err` rather than a variant here, since it never reaches a
/// caller holding a `RestoreReport`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The space was already pristine; nothing but a `.meta` touch and a
    /// digest walk happened.
    Hit,
    /// The space was rebuilt from a pristine template clone.
    DirtyHit,
    /// The space was rebuilt directly from the catalog (no usable
    /// template existed, or the template clone came out dirty).
    MissAfterBuild,
}

/// The result of a successful restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// The absolute path of the now-pristine space.
    pub space_path: PathBuf,
    /// Which of the three paths served the request.
    pub outcome: RestoreOutcome,
}

/// Restores spaces from catalogs and templates rooted under
/// `holotree_root`/`hololib_root`, using `mode` to turn catalog/template
/// entries into files and a bounded worker pool for template clone
/// fan-out.
pub struct Materializer {
    holotree_root: PathBuf,
    hololib_root: PathBuf,
    journal_root: PathBuf,
    mode: MaterializeMode,
    clone_workers: usize,
    deny_list: Vec<String>,
}

impl Materializer {
    /// Constructs a materializer. `clone_workers` is typically
    /// [`default_clone_workers`]; `deny_list` is typically
    /// [`holotree_fs::DEFAULT_DENY_LIST`].
    pub fn new(
        holotree_root: impl Into<PathBuf>,
        hololib_root: impl Into<PathBuf>,
        journal_root: impl Into<PathBuf>,
        mode: MaterializeMode,
        clone_workers: usize,
        deny_list: &[&str],
    ) -> Self {
        Materializer {
            holotree_root: holotree_root.into(),
            hololib_root: hololib_root.into(),
            journal_root: journal_root.into(),
            mode,
            clone_workers,
            deny_list: deny_list.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn deny_list_refs(&self) -> Vec<&str> {
        self.deny_list.iter().map(|s| s.as_str()).collect()
    }

    /// The directory a space for `(blueprint, controller, space_name)`
    /// lives at, whether or not it currently exists.
    pub fn space_dir(&self, blueprint: Blueprint, controller: &str, space_name: &str) -> PathBuf {
        self.holotree_root
            .join(format!("{}_{}_{}", blueprint.to_hex(), controller, space_name))
    }

    fn space_meta_path(&self, blueprint: Blueprint, controller: &str, space_name: &str) -> PathBuf {
        let mut name = self.space_dir(blueprint, controller, space_name).into_os_string();
        name.push(".meta");
        PathBuf::from(name)
    }

    fn template_dir(&self, blueprint: Blueprint) -> PathBuf {
        self.hololib_root.join("templates").join(blueprint.to_hex())
    }

    fn template_meta_path(&self, blueprint: Blueprint) -> PathBuf {
        self.hololib_root.join("templates").join(format!("{}.meta", blueprint.to_hex()))
    }

    /// Restores `(catalog.blueprint, controller, space_name)`, preferring
    /// (in order) an already-pristine live space, a pristine template
    /// clone, and finally a full restore from `catalog`'s entries.
    /// Concurrent calls for the same `(controller, space_name)` serialize
    /// on a per-space lock acquired internally; concurrent calls for
    /// different spaces proceed in parallel.
    pub async fn restore(
        &self,
        locker: &Locker,
        library: &Library,
        catalog: &Catalog,
        controller: &str,
        space_name: &str,
    ) -> Result<RestoreReport, SpaceError> {
        let start = Instant::now();
        let space_id = format!("{controller}_{space_name}");
        let lock_name = format!("space_{space_id}");
        let _guard = locker.acquire(&lock_name, Some(holotree_lock::DEFAULT_MAX_WAIT)).await?;

        let result = self
            .restore_locked(library, catalog, controller, space_name, &space_id)
            .await;

        let outcome = match &result {
            Ok(report) => match report.outcome {
                RestoreOutcome::Hit => JournalOutcome::Hit,
                RestoreOutcome::DirtyHit => JournalOutcome::Dirty,
                RestoreOutcome::MissAfterBuild => JournalOutcome::Miss,
            },
            Err(_) => JournalOutcome::Failure,
        };
        let event = JournalEvent::new(
            SystemTime::now(),
            EventKind::SpaceUsed,
            Some(catalog.blueprint),
            Some(space_name.to_string()),
            Some(controller.to_string()),
            start.elapsed().as_millis() as u64,
            outcome,
        );
        if let Err(err) = holotree_journal::append(&self.journal_root, &event) {
            tracing::warn!(error = %err, "failed to append stats journal event");
        }

        result
    }

    async fn restore_locked(
        &self,
        library: &Library,
        catalog: &Catalog,
        controller: &str,
        space_name: &str,
        space_id: &str,
    ) -> Result<RestoreReport, SpaceError> {
        let space_path = self.space_dir(catalog.blueprint, controller, space_name);
        let meta_path = self.space_meta_path(catalog.blueprint, controller, space_name);
        let deny_list = self.deny_list_refs();

        if space_path.is_dir() && holotree_fs::is_pristine(&space_path, &meta_path, &deny_list)? {
            holotree_fs::touch(&meta_path, SystemTime::now())?;
            tracing::debug!(space = %space_id, blueprint = %catalog.blueprint, "restore hit: space already pristine");
            return Ok(RestoreReport { space_path, outcome: RestoreOutcome::Hit });
        }

        if space_path.exists() {
            tracing::debug!(space = %space_id, "discarding dirty or stale space before rebuild");
            holotree_fs::rename_and_remove(&space_path)?;
        }

        if let Some(report) = self.try_template_clone(library, catalog, &space_path, &meta_path, space_id)? {
            return Ok(report);
        }

        self.restore_from_catalog(library, catalog, &space_path, &meta_path, space_id)?;
        Ok(RestoreReport {
            space_path,
            outcome: RestoreOutcome::MissAfterBuild,
        })
    }

    fn try_template_clone(
        &self,
        library: &Library,
        catalog: &Catalog,
        space_path: &Path,
        meta_path: &Path,
        space_id: &str,
    ) -> Result<Option<RestoreReport>, SpaceError> {
        let template_dir = self.template_dir(catalog.blueprint);
        let template_meta = self.template_meta_path(catalog.blueprint);
        let deny_list = self.deny_list_refs();

        if !template_dir.is_dir() || !holotree_fs::is_pristine(&template_dir, &template_meta, &deny_list)? {
            return Ok(None);
        }

        clone::clone_tree(&template_dir, space_path, &deny_list, self.mode, self.clone_workers)?;

        let expected = holotree_fs::read_meta(&template_meta)?
            .expect("is_pristine already confirmed the template meta sidecar exists");
        let actual = holotree_fs::compute_tree_digest(space_path, &deny_list)?;
        if actual != expected {
            tracing::warn!(
                blueprint = %catalog.blueprint,
                "template clone came out dirty, discarding and falling back to catalog restore"
            );
            holotree_fs::rename_and_remove(space_path)?;
            return Ok(None);
        }

        holotree_fs::write_meta(meta_path, &actual)?;
        for entry in &catalog.entries {
            if matches!(entry.kind, LinkKind::File) {
                library.add_user(&entry.object_hash, space_id, catalog.blueprint)?;
            }
        }
        tracing::debug!(space = %space_id, blueprint = %catalog.blueprint, "restore dirty-hit: served from template clone");
        Ok(Some(RestoreReport {
            space_path: space_path.to_path_buf(),
            outcome: RestoreOutcome::DirtyHit,
        }))
    }

    fn restore_from_catalog(
        &self,
        library: &Library,
        catalog: &Catalog,
        space_path: &Path,
        meta_path: &Path,
        space_id: &str,
    ) -> Result<(), SpaceError> {
        holotree_fs::ensure_dir(space_path, 0o777)?;
        for entry in &catalog.entries {
            let dest = space_path.join(&entry.relative_path);
            match &entry.kind {
                LinkKind::Dir => holotree_fs::ensure_dir(&dest, entry.mode.max(0o755))?,
                LinkKind::Symlink(target) => {
                    if let Some(parent) = dest.parent() {
                        holotree_fs::ensure_dir(parent, 0o777)?;
                    }
                    mode::symlink_file(Path::new(target), &dest)?;
                }
                LinkKind::File => {
                    if let Some(parent) = dest.parent() {
                        holotree_fs::ensure_dir(parent, 0o777)?;
                    }
                    let source = library.object_path(&entry.object_hash);
                    mode::materialize_file(self.mode, &source, &dest, entry.mode)?;
                    library.add_user(&entry.object_hash, space_id, catalog.blueprint)?;
                }
            }
        }

        let deny_list = self.deny_list_refs();
        let digest = holotree_fs::compute_tree_digest(space_path, &deny_list)?;
        holotree_fs::write_meta(meta_path, &digest)?;
        tracing::debug!(space = %space_id, blueprint = %catalog.blueprint, "restore miss-after-build: served from catalog");
        Ok(())
    }
}
