//! Configuration injected into every [`crate::materialize`] call: the
//! on-disk roots, the caller's identity, and the pass-through knobs listed
//! in the on-disk layout's configuration surface (`no-build`, `lockless`,
//! `live-only`, `stage-only`, `shared-holotree`, plus the solver/pip
//! network options).

use holotree_builder::{ActivateInvocation, Builder, PipInvocation, SolverInvocation};
use holotree_lock::{LockOwner, Locker};
use holotree_space::MaterializeMode;
use std::path::{Path, PathBuf};

/// Everything a [`crate::materialize`] call needs that isn't specific to
/// one request: where the cache lives, who's asking, and how the build and
/// restore stages should behave.
pub struct HolotreeContext {
    /// Root directory holding one subdirectory per materialized space.
    pub holotree_root: PathBuf,
    /// Root directory holding `library/`, `catalog/`, `templates/`,
    /// `pids/`, and `locks/`.
    pub hololib_root: PathBuf,
    /// Root directory holding the stats journal's newline-delimited log.
    pub journal_root: PathBuf,
    /// The OS user's home directory, used only to derive
    /// [`holotree_hash::user_home_identity`] — kept separate from the cache
    /// roots above since `shared_holotree` repoints those without changing
    /// whose identity a space belongs to.
    pub user_home: PathBuf,
    /// OS user name recorded against locks this context acquires.
    pub user: String,
    /// Opaque controller tag identifying the calling tool (an IDE, a CI
    /// runner, a CLI invocation).
    pub controller: String,
    /// Target platform, e.g. `"linux"`.
    pub platform: String,
    /// Target architecture, e.g. `"x86_64"`.
    pub arch: String,
    /// Recorded as a catalog's `creator` metadata field.
    pub creator: String,
    /// How restored files are materialized: copy, hardlink, or symlink.
    pub materialize_mode: MaterializeMode,
    /// Worker count for the template-clone fan-out.
    pub clone_workers: usize,
    /// `no-build`: a cache miss returns [`crate::HolotreeError::BuildDisabled`]
    /// instead of invoking the builder.
    pub no_build: bool,
    /// `lockless`: use an in-process [`Locker`] that never touches the
    /// filesystem, for single-user test and CLI-dry-run scenarios.
    pub lockless: bool,
    /// `live-only`: after a fresh build, skip the template-to-space copy
    /// and hand back the template directory itself rather than a separate
    /// live space.
    pub live_only: bool,
    /// `stage-only`: publish the catalog and template but never
    /// materialize a live space at all, for cache-warming callers that
    /// only want the build side effect.
    pub stage_only: bool,
    /// `shared-holotree`: the cache roots are a machine-wide shared
    /// location rather than a per-user one; newly created roots get
    /// world-writable permissions via [`holotree_fs::make_shared`].
    pub shared_holotree: bool,
    /// Solver invocation configuration (`conda-url`, `verify-ssl`,
    /// `channel-alias` flow through here).
    pub solver: SolverInvocation,
    /// Pip invocation configuration (`pypi-url`, `pypi-trusted-host`,
    /// `verify-ssl` flow through here).
    pub pip: PipInvocation,
    /// Activation capture invocation configuration.
    pub activate: ActivateInvocation,
}

impl HolotreeContext {
    /// Builds a context rooted at `cache_root`, which owns the
    /// `holotree/`, `hololib/`, and `journals/` subdirectories, per the
    /// on-disk layout. `user_home` drives the per-OS-user space identity
    /// and is independent of `cache_root` (a `shared_holotree` cache root
    /// is still partitioned per user underneath it).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache_root: &Path,
        user_home: &Path,
        user: impl Into<String>,
        controller: impl Into<String>,
        platform: impl Into<String>,
        arch: impl Into<String>,
        solver: SolverInvocation,
        pip: PipInvocation,
        activate: ActivateInvocation,
    ) -> Self {
        HolotreeContext {
            holotree_root: cache_root.join("holotree"),
            hololib_root: cache_root.join("hololib"),
            journal_root: cache_root.join("journals"),
            user_home: user_home.to_path_buf(),
            user: user.into(),
            controller: controller.into(),
            platform: platform.into(),
            arch: arch.into(),
            creator: format!("holotree/{}", env!("CARGO_PKG_VERSION")),
            materialize_mode: MaterializeMode::Hardlink,
            clone_workers: holotree_space::default_clone_workers(),
            no_build: false,
            lockless: false,
            live_only: false,
            stage_only: false,
            shared_holotree: false,
            solver,
            pip,
            activate,
        }
    }

    /// Creates the cache root directories if missing, widening their
    /// permissions when `shared_holotree` is set.
    pub fn ensure_layout(&self) -> Result<(), holotree_fs::FsError> {
        holotree_fs::ensure_dir(&self.holotree_root, 0o777)?;
        holotree_fs::ensure_dir(&self.hololib_root, 0o777)?;
        holotree_fs::ensure_dir(&self.journal_root, 0o777)?;
        if self.shared_holotree {
            holotree_fs::make_shared(&self.holotree_root)?;
            holotree_fs::make_shared(&self.hololib_root)?;
            holotree_fs::make_shared(&self.journal_root)?;
        }
        Ok(())
    }

    /// The controller identity a space directory is actually keyed on:
    /// the raw controller tag plus a short fingerprint of the OS user's
    /// home directory, so two OS users sharing one `controller` value
    /// (e.g. both "vscode") still land in distinct space directories.
    pub fn controller_identity(&self) -> String {
        format!("{}_{}", self.controller, holotree_hash::user_home_identity(&self.user_home))
    }

    fn lock_owner(&self, space: &str) -> LockOwner {
        LockOwner {
            user: self.user.clone(),
            controller: self.controller.clone(),
            space: space.to_string(),
        }
    }

    /// Builds the [`Locker`] a [`crate::materialize`] call should use for
    /// `space_name`, honoring `lockless`.
    pub fn locker(&self, space_name: &str) -> Locker {
        let owner = self.lock_owner(space_name);
        if self.lockless {
            Locker::new_lockless(owner)
        } else {
            Locker::new(&self.hololib_root, owner)
        }
    }

    /// Builds the [`Builder`] a [`crate::materialize`] call should use,
    /// sharing this context's solver/pip/activate configuration.
    pub fn builder(&self) -> Builder {
        Builder::new(
            &self.hololib_root,
            self.solver.clone(),
            self.pip.clone(),
            self.activate.clone(),
            self.creator.clone(),
        )
    }

    /// Builds the [`holotree_space::Materializer`] a [`crate::materialize`]
    /// call should use, sharing this context's cache roots and
    /// materialization mode.
    pub fn materializer(&self) -> holotree_space::Materializer {
        holotree_space::Materializer::new(
            &self.holotree_root,
            &self.hololib_root,
            &self.journal_root,
            self.materialize_mode,
            self.clone_workers,
            holotree_fs::DEFAULT_DENY_LIST,
        )
    }

    /// The template directory a blueprint's build promotes into, per the
    /// `templates/<blueprint>/` layout shared with `holotree-builder`'s
    /// `promote` stage and `holotree-space`'s warm-clone fast path.
    pub fn template_dir(&self, blueprint: holotree_hash::Blueprint) -> PathBuf {
        self.hololib_root.join("templates").join(blueprint.to_hex())
    }
}
