#![deny(missing_docs)]

//! The build pipeline: drives the external solver/installer against a
//! composed descriptor, captures activation, and promotes the result into
//! the holotree library, catalog, and template store.
//!
//! A build runs under the cache-wide `"robocorp"` lock (`robocorp.lck`),
//! distinct from the library's own `"global"` lock — two builds for
//! different blueprints still serialize against each other, matching the
//! on-disk layout's single build lock rather than one per blueprint, since
//! the external solver's own package cache is itself a process-wide
//! shared resource.
//!
//! A build that fails without being marked fatal is retried exactly once,
//! with the solver forced to debug verbosity and its repodata cache
//! disabled, so a transient failure gets a second chance against fresh
//! metadata and a failure that repeats leaves a maximally detailed trail.

mod activate;
mod corruption;
mod error;
mod pip;
mod plan;
mod post_install;
mod promote;
mod reporter;
mod solver;
mod subprocess;

pub use activate::{ActivateInvocation, ACTIVATE_FILE_NAME};
pub use corruption::CorruptionScanner;
pub use error::BuilderError;
pub use pip::PipInvocation;
pub use plan::BuildPlan;
pub use reporter::{BuildReporter, BuildStage, NoopReporter};
pub use solver::SolverInvocation;

use holotree_hash::Blueprint;
use holotree_library::Library;
use holotree_lock::Locker;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The name the cache-wide build lock is acquired under. Distinct from
/// the library's own `"global"` lock (`holotree/global.lck`): this one
/// guards the external solver's shared package cache, not the library's
/// object store.
pub const BUILD_LOCK_NAME: &str = "robocorp";

/// Everything one build attempt needs besides its pipeline configuration:
/// the already-merged, already-canonicalized descriptor content and the
/// blueprint it produced.
pub struct BuildRequest<'a> {
    /// Canonical descriptor YAML, already merged from every contributing
    /// file. Written to a sibling file and handed to the solver as its
    /// environment specification.
    pub descriptor_yaml: &'a [u8],
    /// The `pip:` requirement lines, already merged and deduplicated.
    pub pip_requirements: &'a [String],
    /// Post-install command lines, in merge order, duplicates preserved.
    pub post_install: &'a [String],
    /// The blueprint this descriptor composed to.
    pub blueprint: Blueprint,
    /// Target platform, e.g. `linux`.
    pub platform: String,
    /// Target architecture, e.g. `x86_64`.
    pub arch: String,
}

/// Drives the full build pipeline for one blueprint: solve, pip install,
/// post-install, activate, promote — with the one-shot forced-debug retry
/// envelope around the whole attempt.
pub struct Builder {
    hololib_root: PathBuf,
    work_root: PathBuf,
    solver: SolverInvocation,
    pip: PipInvocation,
    activate: ActivateInvocation,
    creator: String,
}

impl Builder {
    /// Constructs a builder. `hololib_root` is the cache root that owns
    /// `library/`, `catalog/`, and `templates/`; staging happens under
    /// `hololib_root/templates/.work` so the final promote is a same
    /// filesystem rename.
    pub fn new(
        hololib_root: impl Into<PathBuf>,
        solver: SolverInvocation,
        pip: PipInvocation,
        activate: ActivateInvocation,
        creator: impl Into<String>,
    ) -> Self {
        let hololib_root = hololib_root.into();
        let work_root = hololib_root.join("templates").join(".work");
        Builder {
            hololib_root,
            work_root,
            solver,
            pip,
            activate,
            creator: creator.into(),
        }
    }

    /// Runs one full build, under the cache-wide build lock, with the
    /// one-shot retry envelope. `locker` and `library` are injected rather
    /// than owned by this struct so a single process-wide instance of each
    /// can be shared across builds, restores, and sweeps.
    pub async fn build(
        &self,
        locker: &Locker,
        library: &Library,
        request: &BuildRequest<'_>,
        reporter: &dyn BuildReporter,
    ) -> Result<(), BuilderError> {
        let _guard = locker.acquire(BUILD_LOCK_NAME, None).await?;
        tracing::info!(blueprint = %request.blueprint, "starting build");

        let result = match self.attempt(library, request, &self.solver, reporter).await {
            Ok(()) => Ok(()),
            Err(first_err @ (BuilderError::SolverFailed(_)
            | BuilderError::InstallerFailed(_)
            | BuilderError::PostInstallFailed { .. }
            | BuilderError::ActivationFailed(_))) => {
                tracing::warn!(blueprint = %request.blueprint, error = %first_err, "build attempt failed, retrying with forced debug verbosity");
                reporter.on_retry("first attempt failed, retrying with forced debug verbosity");
                let retry_solver = self.solver.forced_retry();
                match self.attempt(library, request, &retry_solver, reporter).await {
                    Ok(()) => Ok(()),
                    Err(_) => Err(first_err),
                }
            }
            Err(other) => Err(other),
        };

        match &result {
            Ok(()) => tracing::info!(blueprint = %request.blueprint, "build succeeded"),
            Err(e) => tracing::error!(blueprint = %request.blueprint, error = %e, "build failed"),
        }
        result
    }

    async fn attempt(
        &self,
        library: &Library,
        request: &BuildRequest<'_>,
        solver: &SolverInvocation,
        reporter: &dyn BuildReporter,
    ) -> Result<(), BuilderError> {
        holotree_fs::ensure_dir(&self.work_root, 0o777)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}-", request.blueprint.to_hex()))
            .tempdir_in(&self.work_root)
            .map_err(|e| BuilderError::io(&self.work_root, e))?;
        let target_dir = staging.path().to_path_buf();

        let descriptor_path = sibling_descriptor_path(&target_dir);
        fs_err::write(&descriptor_path, request.descriptor_yaml)
            .map_err(|e| BuilderError::io(&descriptor_path, e))?;

        let mut plan = BuildPlan::open(&target_dir)?;

        let handle = reporter.on_stage_start(BuildStage::Solve);
        solver.run(&descriptor_path, &target_dir, &mut plan)?;
        reporter.on_stage_complete(handle);

        let handle = reporter.on_stage_start(BuildStage::Pip);
        self.pip.run(request.pip_requirements, &target_dir, &mut plan)?;
        reporter.on_stage_complete(handle);

        post_install::run_post_install(request.post_install, &target_dir, &mut plan, reporter)?;

        let handle = reporter.on_stage_start(BuildStage::Activate);
        self.activate.run(&target_dir, &mut plan)?;
        reporter.on_stage_complete(handle);

        let handle = reporter.on_stage_start(BuildStage::Promote);
        let plan_dest = promoted_plan_path(&self.hololib_root, request.blueprint);
        // `promote` renames `target_dir` away, so the plan file (its
        // sibling, not its child) must be relocated first.
        plan.promote(&plan_dest)?;
        promote::promote(
            &self.hololib_root,
            library,
            &target_dir,
            request.blueprint,
            &request.platform,
            &request.arch,
            &self.creator,
            SystemTime::now(),
        )?;
        let _ = fs_err::remove_file(&descriptor_path);
        let _ = fs_err::remove_file(pip::sibling_requirements_path(&target_dir));
        // `target_dir` no longer exists on disk (promote renamed it away);
        // detach the `TempDir` guard so its drop doesn't try to clean up a
        // path it no longer owns.
        let _ = staging.into_path();
        reporter.on_stage_complete(handle);

        Ok(())
    }
}

fn sibling_descriptor_path(target_dir: &Path) -> PathBuf {
    let mut name = target_dir.as_os_str().to_owned();
    name.push(".descriptor.yaml");
    PathBuf::from(name)
}

fn promoted_plan_path(hololib_root: &Path, blueprint: Blueprint) -> PathBuf {
    hololib_root.join("templates").join(format!("{}.plan", blueprint.to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use holotree_hash::Fingerprint;
    use holotree_lock::LockOwner;

    fn test_owner() -> LockOwner {
        LockOwner {
            user: "tester".to_string(),
            controller: "ci".to_string(),
            space: "-".to_string(),
        }
    }

    #[tokio::test]
    async fn build_fails_cleanly_when_solver_binary_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let hololib_root = dir.path().join("hololib");

        let solver = SolverInvocation {
            binary: PathBuf::from("/does/not/exist/micromamba"),
            channel_alias: None,
            verify_ssl: true,
            repodata_ttl: 900,
            forced_debug: false,
        };
        let pip = PipInvocation {
            binary: PathBuf::from("/does/not/exist/pip"),
            index_url: None,
            trusted_host: None,
            verify_ssl: true,
            cache_dir: None,
            find_links: None,
        };
        let activate = ActivateInvocation {
            binary: PathBuf::from("/does/not/exist/activate"),
        };
        let builder = Builder::new(&hololib_root, solver, pip, activate, "holotree/0.1.0");

        let locker = Locker::new_lockless(test_owner());
        let library = Library::new(&hololib_root);
        let request = BuildRequest {
            descriptor_yaml: b"name: demo\n",
            pip_requirements: &[],
            post_install: &[],
            blueprint: Blueprint::from_fingerprint(Fingerprint::of("missing-binary")),
            platform: "linux".to_string(),
            arch: "x86_64".to_string(),
        };

        let err = builder
            .build(&locker, &library, &request, &NoopReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::Io { .. }));
    }

    /// A solver run that trips the three-signal corruption detector must
    /// not be retried: spec.md classifies `SolverUnsafe` as non-retryable,
    /// since repeating against the same corrupted package cache wouldn't
    /// help.
    #[cfg(unix)]
    #[tokio::test]
    async fn solver_unsafe_is_not_retried() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let hololib_root = dir.path().join("hololib");
        let counter_path = dir.path().join("solver-calls");

        let script_path = dir.path().join("fake-solver.sh");
        {
            let mut script = fs_err::File::create(&script_path).unwrap();
            writeln!(
                script,
                "#!/bin/sh\nprintf x >> '{counter}'\necho 'SafetyError: pkgs appears to be corrupted'\nexit 0\n",
                counter = counter_path.display(),
            )
            .unwrap();
        }
        let mut perms = fs_err::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs_err::set_permissions(&script_path, perms).unwrap();

        let solver = SolverInvocation {
            binary: script_path,
            channel_alias: None,
            verify_ssl: true,
            repodata_ttl: 900,
            forced_debug: false,
        };
        let pip = PipInvocation {
            binary: PathBuf::from("/does/not/exist/pip"),
            index_url: None,
            trusted_host: None,
            verify_ssl: true,
            cache_dir: None,
            find_links: None,
        };
        let activate = ActivateInvocation {
            binary: PathBuf::from("/does/not/exist/activate"),
        };
        let builder = Builder::new(&hololib_root, solver, pip, activate, "holotree/0.1.0");

        let locker = Locker::new_lockless(test_owner());
        let library = Library::new(&hololib_root);
        let request = BuildRequest {
            descriptor_yaml: b"name: demo\n",
            pip_requirements: &[],
            post_install: &[],
            blueprint: Blueprint::from_fingerprint(Fingerprint::of("corrupted-cache")),
            platform: "linux".to_string(),
            arch: "x86_64".to_string(),
        };

        let err = builder
            .build(&locker, &library, &request, &NoopReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::SolverUnsafe));

        let calls = fs_err::read_to_string(&counter_path).unwrap();
        assert_eq!(calls, "x", "solver must run exactly once, ran {} time(s)", calls.len());
    }
}
