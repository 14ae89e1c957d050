//! Named, cross-process exclusive locks for the holotree environment cache.
//!
//! Locks cover global library mutations (`global.lck`), space restores for a
//! given `(controller, space)`, and configuration persistence. While a lock
//! is held, a PID marker file is written under `hololib/pids/` so that a
//! concurrent process (or an operator running diagnostics) can see who is
//! holding it; a background task emits a "still waiting" message on a
//! growing backoff while a caller blocks on acquisition.
//!
//! A configuration flag may select a lockless mode for single-user test
//! scenarios. [`LockGuard`] is the single RAII type returned by both modes;
//! which underlying behavior it performs is an implementation detail the
//! caller never needs to match on, the way `rattler_shell::shell::ShellEnum`
//! hides per-shell behavior behind one enum rather than a trait object.

use fs4::fs_std::FileExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Errors surfaced by lock acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock could not be acquired before `max_wait` elapsed.
    #[error("timed out waiting for lock {0:?}")]
    Timeout(PathBuf),
    /// An I/O error occurred while opening the lock file or the PID marker.
    #[error("I/O error on lock {path}: {source}")]
    Io {
        /// The lock file path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Default wait bound for short-lived locks (space restore, catalog writes).
/// The build lock has no default bound; callers pass `None` explicitly for
/// that case.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Whether lock acquisition uses real OS advisory locks or is a no-op,
/// selected once via [`Locker::new`]/[`Locker::new_lockless`] and never
/// toggled per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Real,
    Lockless,
}

/// Identifies the caller holding a lock, embedded in its PID marker filename
/// as `<timestamp>_<user>_<controller>_<space>_<pid>_<basename>`.
#[derive(Debug, Clone)]
pub struct LockOwner {
    /// OS user name (or best-effort fallback) of the lock holder.
    pub user: String,
    /// Opaque controller tag (e.g. an IDE vs a CI agent).
    pub controller: String,
    /// The space name, or `"-"` for locks not scoped to a space (e.g. the
    /// global build lock).
    pub space: String,
}

/// Acquires and releases named locks under a shared `hololib/pids` root.
pub struct Locker {
    pids_dir: PathBuf,
    locks_dir: PathBuf,
    mode: LockMode,
    owner: LockOwner,
}

impl Locker {
    /// Constructs a locker backed by real OS advisory file locks.
    pub fn new(root: &Path, owner: LockOwner) -> Self {
        Locker {
            pids_dir: root.join("pids"),
            locks_dir: root.join("locks"),
            mode: LockMode::Real,
            owner,
        }
    }

    /// Constructs a locker whose `acquire` calls always succeed immediately
    /// and never touch the filesystem, for single-user test scenarios.
    pub fn new_lockless(owner: LockOwner) -> Self {
        Locker {
            pids_dir: PathBuf::new(),
            locks_dir: PathBuf::new(),
            mode: LockMode::Lockless,
            owner,
        }
    }

    /// Acquires the named exclusive lock, waiting up to `max_wait` (`None`
    /// means wait indefinitely). While waiting, a background task logs a
    /// "still waiting" warning on a growing backoff: 5s, 15s, 45s, ...
    pub async fn acquire(&self, name: &str, max_wait: Option<Duration>) -> Result<LockGuard, LockError> {
        match self.mode {
            LockMode::Lockless => Ok(LockGuard::noop()),
            LockMode::Real => self.acquire_real(name, max_wait).await,
        }
    }

    async fn acquire_real(&self, name: &str, max_wait: Option<Duration>) -> Result<LockGuard, LockError> {
        fs_err::create_dir_all(&self.locks_dir)
            .map_err(|e| LockError::Io { path: self.locks_dir.clone(), source: e })?;
        fs_err::create_dir_all(&self.pids_dir)
            .map_err(|e| LockError::Io { path: self.pids_dir.clone(), source: e })?;

        let lock_path = self.locks_dir.join(format!("{name}.lck"));
        let name_owned = name.to_string();
        let notify_path = lock_path.clone();

        let notifier = tokio::spawn(backoff_notifier(notify_path));
        let deadline = max_wait.map(|d| Instant::now() + d);

        let file = loop {
            let candidate = open_lock_file(&lock_path)?;
            if candidate.try_lock_exclusive().map_err(|e| LockError::Io {
                path: lock_path.clone(),
                source: e,
            })? {
                break candidate;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    notifier.abort();
                    return Err(LockError::Timeout(lock_path));
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        };
        notifier.abort();

        let pid_marker = self.write_pid_marker(&name_owned)?;
        Ok(LockGuard::real(file, pid_marker))
    }

    fn write_pid_marker(&self, basename: &str) -> Result<PathBuf, LockError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let pid = std::process::id();
        let marker_name = format!(
            "{timestamp}_{}_{}_{}_{pid}_{basename}",
            self.owner.user, self.owner.controller, self.owner.space
        );
        let marker_path = self.pids_dir.join(marker_name);
        fs_err::write(&marker_path, pid.to_string())
            .map_err(|e| LockError::Io { path: marker_path.clone(), source: e })?;
        Ok(marker_path)
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, LockError> {
    std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| LockError::Io { path: path.to_path_buf(), source: e })
}

async fn backoff_notifier(lock_path: PathBuf) {
    let mut delay = Duration::from_secs(5);
    loop {
        tokio::time::sleep(delay).await;
        tracing::info!("still waiting on lock {}", lock_path.display());
        delay = delay.saturating_mul(3);
    }
}

/// An acquired lock. Dropping it releases the lock; calling
/// [`LockGuard::release`] does the same thing explicitly and is safe to call
/// more than once.
pub struct LockGuard {
    inner: LockGuardInner,
    released: AtomicBool,
}

enum LockGuardInner {
    Real {
        file: std::fs::File,
        pid_marker: PathBuf,
    },
    Noop,
}

impl LockGuard {
    fn real(file: std::fs::File, pid_marker: PathBuf) -> Self {
        LockGuard {
            inner: LockGuardInner::Real { file, pid_marker },
            released: AtomicBool::new(false),
        }
    }

    fn noop() -> Self {
        LockGuard {
            inner: LockGuardInner::Noop,
            released: AtomicBool::new(false),
        }
    }

    /// Releases the lock. A second call is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let LockGuardInner::Real { file, pid_marker } = &self.inner {
            let _ = file.unlock();
            let _ = fs_err::remove_file(pid_marker);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            LockGuardInner::Real { pid_marker, .. } => f
                .debug_struct("LockGuard")
                .field("pid_marker", pid_marker)
                .finish(),
            LockGuardInner::Noop => f.debug_struct("LockGuard").field("mode", &"lockless").finish(),
        }
    }
}

/// A stale-vs-pending classification for a PID marker, surfaced by
/// diagnostics. Markers older than 12 hours are reported as stale
/// (informational) rather than pending, since the holding process very
/// likely crashed without releasing the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidMarkerStatus {
    /// The marker is recent; its process is presumably still running.
    Pending,
    /// The marker is older than 12 hours.
    Stale,
}

/// The threshold beyond which a PID marker is reported as stale rather than
/// pending.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(12 * 60 * 60);

/// Classifies a PID marker's age, given its file modification time and the
/// current time.
pub fn classify_marker_age(modified: SystemTime, now: SystemTime) -> PidMarkerStatus {
    match now.duration_since(modified) {
        Ok(age) if age >= STALE_THRESHOLD => PidMarkerStatus::Stale,
        _ => PidMarkerStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn owner_for_test(space: &str) -> LockOwner {
        LockOwner {
            user: "tester".to_string(),
            controller: "ci".to_string(),
            space: space.to_string(),
        }
    }

    #[tokio::test]
    async fn lockless_mode_never_touches_disk() {
        let locker = Locker::new_lockless(owner_for_test("alpha"));
        let guard = locker.acquire("global", None).await.unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn real_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::new(dir.path(), owner_for_test("alpha"));

        let guard = locker.acquire("global", Some(Duration::from_millis(200))).await.unwrap();
        let pids: Vec<_> = std::fs::read_dir(dir.path().join("pids"))
            .unwrap()
            .collect();
        assert_eq!(pids.len(), 1);

        drop(guard);

        // After release, a second acquire must succeed quickly.
        let guard2 = locker.acquire("global", Some(Duration::from_millis(200))).await.unwrap();
        drop(guard2);
    }

    #[tokio::test]
    async fn double_release_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let locker = Locker::new(dir.path(), owner_for_test("alpha"));
        let guard = locker.acquire("global", None).await.unwrap();
        guard.release();
        guard.release();
    }

    #[test]
    fn classify_marker_age_flags_stale_after_twelve_hours() {
        let now = SystemTime::now();
        let recent = now - Duration::from_secs(60);
        let old = now - Duration::from_secs(13 * 60 * 60);
        assert_eq!(classify_marker_age(recent, now), PidMarkerStatus::Pending);
        assert_eq!(classify_marker_age(old, now), PidMarkerStatus::Stale);
    }
}
