//! Filesystem primitives shared across the holotree environment cache:
//! shared-mode directory creation, atomic writes, the `rename_and_remove`
//! deletion idiom, and the canonical (deterministic, deny-listed) tree walk
//! used both for pristine-digest computation and for promoting a staged
//! build into the library.
//!
//! These helpers are intentionally dumb: they take explicit paths and modes
//! rather than reading any ambient configuration, per the "no process-wide
//! singletons" design note — callers (locker, library, materializer) own the
//! policy, this crate only owns the syscalls.

use fs_err as fs;
use holotree_hash::Sha256Hash;
use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Errors surfaced by the filesystem primitives. All of these indicate an
/// I/O failure on a specific path; none of them are retryable by this crate,
/// only by the caller (e.g. the builder's retry envelope).
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Wraps a lower level I/O error, annotating it with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that the failing operation was acting on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FsError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The path segments ignored by the canonical tree walk, per the data model's
/// content-digest definition. Callers that need a different policy should
/// supply their own deny list to [`walk_ordered`]; this is the default.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "__pycache__",
    ".vscode",
    ".ipynb_checkpoints",
    ".virtual_documents",
    "__MACOSX",
];

/// Idempotently ensures `path` exists as a directory with the given mode,
/// creating any missing parent directories along the way.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<(), FsError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| FsError::io(path, e))?;
    set_unix_mode(path, mode)?;
    Ok(())
}

/// Writes `bytes` to `path` atomically: the content is written to a sibling
/// `path.tmp` file, fsynced, and then renamed into place. A reader either
/// sees the old content or the full new content, never a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: u32) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent, 0o777)?;
    }
    let tmp_path = sibling_tmp_path(path);
    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| FsError::io(&tmp_path, e))?;
        file.write_all(bytes).map_err(|e| FsError::io(&tmp_path, e))?;
        file.file().sync_all().map_err(|e| FsError::io(&tmp_path, e))?;
    }
    set_unix_mode(&tmp_path, mode)?;
    fs::rename(&tmp_path, path).map_err(|e| FsError::io(path, e))?;
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Renames `path` to a randomized sibling name and then recursively removes
/// it. This two-step dance exists because on Windows a file that is still
/// memory-mapped or open elsewhere cannot be unlinked directly, but it *can*
/// be renamed; renaming first and deleting the renamed copy avoids "file
/// busy" failures that a direct recursive delete would hit.
pub fn rename_and_remove(path: &Path) -> Result<(), FsError> {
    if !path.exists() {
        return Ok(());
    }
    let randomized = random_sibling(path);
    fs::rename(path, &randomized).map_err(|e| FsError::io(path, e))?;
    tracing::debug!(from = %path.display(), to = %randomized.display(), "renamed before recursive delete");
    if randomized.is_dir() {
        fs::remove_dir_all(&randomized).map_err(|e| FsError::io(&randomized, e))?;
    } else {
        fs::remove_file(&randomized).map_err(|e| FsError::io(&randomized, e))?;
    }
    Ok(())
}

fn random_sibling(path: &Path) -> PathBuf {
    let suffix: String = {
        let mut rng = rand::rng();
        (0..8)
            .map(|_| {
                let n: u8 = rng.random_range(0..16);
                std::char::from_digit(u32::from(n), 16).unwrap()
            })
            .collect()
    };
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Updates the access and modification time of `path` to `when`, creating
/// the file first if it does not exist. Used to bump a catalog's
/// `last_used_at` and a space's `.meta` freshness without rewriting content.
pub fn touch(path: &Path, when: SystemTime) -> Result<(), FsError> {
    if !path.exists() {
        fs::File::create(path).map_err(|e| FsError::io(path, e))?;
    }
    let ft = filetime::FileTime::from_system_time(when);
    filetime::set_file_times(path, ft, ft).map_err(|e| FsError::io(path, e))
}

/// Returns true iff the mode bits of `path` include world read/write/execute,
/// i.e. the directory is usable as a shared cache root by any OS user.
#[cfg(unix)]
pub fn is_shared_dir(path: &Path) -> Result<bool, FsError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).map_err(|e| FsError::io(path, e))?;
    Ok(meta.permissions().mode() & 0o007 == 0o007)
}

/// Windows has no equivalent "world" bit; shared holotree roots are modeled
/// as always-accessible there.
#[cfg(not(unix))]
pub fn is_shared_dir(_path: &Path) -> Result<bool, FsError> {
    Ok(true)
}

/// Adds world read/write/execute bits to `path`'s existing mode.
#[cfg(unix)]
pub fn make_shared(path: &Path) -> Result<(), FsError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).map_err(|e| FsError::io(path, e))?;
    let mut perms = meta.permissions();
    perms.set_mode(perms.mode() | 0o007);
    fs::set_permissions(path, perms).map_err(|e| FsError::io(path, e))
}

#[cfg(not(unix))]
pub fn make_shared(_path: &Path) -> Result<(), FsError> {
    Ok(())
}

#[cfg(unix)]
fn set_unix_mode(path: &Path, mode: u32) -> Result<(), FsError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| FsError::io(path, e))
}

#[cfg(not(unix))]
fn set_unix_mode(_path: &Path, _mode: u32) -> Result<(), FsError> {
    Ok(())
}

/// One entry of the canonical tree walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walk root, using `/` separators regardless of
    /// platform, so digests are stable across operating systems.
    pub relative_path: String,
    /// The absolute path on disk, for callers that need to open the file.
    pub absolute_path: PathBuf,
    /// Unix mode bits (`0` on platforms without a concept of mode bits).
    pub mode: u32,
    /// True if this entry is itself a directory (no content to hash).
    pub is_dir: bool,
    /// True if this entry is a symlink; its target is not read here, callers
    /// that need the target call `std::fs::read_link`.
    pub is_symlink: bool,
}

/// Walks `root` in deterministic pre-order, children sorted lexicographically
/// by byte value, skipping any path segment present in `deny_list`. This is
/// the single walk implementation shared by pristine-digest computation and
/// the builder's promote step, so both agree on what counts as "the tree".
pub fn walk_ordered<'a>(
    root: &'a Path,
    deny_list: &'a [&'a str],
) -> impl Iterator<Item = Result<WalkEntry, FsError>> + 'a {
    WalkDir::new(root)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(move |entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !deny_list.contains(&name))
                .unwrap_or(true)
        })
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.path() == root => None,
            Ok(entry) => Some(to_walk_entry(root, &entry)),
            Err(err) => Some(Err(FsError::io(
                err.path().unwrap_or(root).to_path_buf(),
                std::io::Error::other(err.to_string()),
            ))),
        })
}

fn to_walk_entry(root: &Path, entry: &walkdir::DirEntry) -> Result<WalkEntry, FsError> {
    let absolute_path = entry.path().to_path_buf();
    let relative_path = entry
        .path()
        .strip_prefix(root)
        .expect("walk entries are always under root")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    let metadata = entry
        .metadata()
        .map_err(|e| FsError::io(&absolute_path, std::io::Error::other(e.to_string())))?;
    let mode = unix_mode(&metadata);

    Ok(WalkEntry {
        relative_path,
        absolute_path,
        mode,
        is_dir: metadata.is_dir(),
        is_symlink: metadata.is_symlink(),
    })
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &std::fs::Metadata) -> u32 {
    0
}

/// Computes the pristine tree digest of `root` by walking it with
/// [`walk_ordered`] and folding the resulting `(path, mode, content_hash)`
/// stream. Directories contribute their mode with the zero hash; symlinks
/// contribute their target bytes in place of a content hash, so a retargeted
/// symlink changes the digest without requiring a content read.
pub fn compute_tree_digest(root: &Path, deny_list: &[&str]) -> Result<Sha256Hash, FsError> {
    let mut hashes: Vec<(String, u32, Sha256Hash)> = Vec::new();
    for entry in walk_ordered(root, deny_list) {
        let entry = entry?;
        let content_hash = if entry.is_symlink {
            let target = fs::read_link(&entry.absolute_path).map_err(|e| FsError::io(&entry.absolute_path, e))?;
            holotree_hash::compute_bytes_digest::<holotree_hash::Sha256>(target.to_string_lossy().as_bytes())
        } else if entry.is_dir {
            Sha256Hash::default()
        } else {
            holotree_hash::compute_file_digest::<holotree_hash::Sha256>(&entry.absolute_path)
                .map_err(|e| FsError::io(&entry.absolute_path, e))?
        };
        hashes.push((entry.relative_path, entry.mode, content_hash));
    }
    let borrowed: Vec<(&str, u32, &Sha256Hash)> = hashes.iter().map(|(p, m, h)| (p.as_str(), *m, h)).collect();
    Ok(holotree_hash::tree_digest(borrowed))
}

/// Writes a `.meta` sidecar holding the raw 32-byte expected digest of the
/// tree it sits next to. `meta_path` must be a sibling of the tree root, not
/// a path inside it, or the sidecar would perturb the digest it records.
pub fn write_meta(meta_path: &Path, digest: &Sha256Hash) -> Result<(), FsError> {
    atomic_write(meta_path, digest.as_slice(), 0o644)
}

/// Reads a `.meta` sidecar's expected digest. Returns `Ok(None)` if the file
/// does not exist, and an error if it exists but is not exactly 32 bytes.
pub fn read_meta(meta_path: &Path) -> Result<Option<Sha256Hash>, FsError> {
    if !meta_path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(meta_path).map_err(|e| FsError::io(meta_path, e))?;
    if bytes.len() != 32 {
        return Err(FsError::io(
            meta_path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "meta sidecar is not 32 bytes"),
        ));
    }
    let mut digest = Sha256Hash::default();
    digest.copy_from_slice(&bytes);
    Ok(Some(digest))
}

/// Returns true iff `root`'s current tree digest matches the digest stored
/// in `meta_path`'s sidecar. A missing sidecar is treated as not pristine.
pub fn is_pristine(root: &Path, meta_path: &Path, deny_list: &[&str]) -> Result<bool, FsError> {
    let expected = match read_meta(meta_path)? {
        Some(digest) => digest,
        None => {
            tracing::debug!(root = %root.display(), "no .meta sidecar, not pristine");
            return Ok(false);
        }
    };
    let actual = compute_tree_digest(root, deny_list)?;
    if actual != expected {
        tracing::warn!(root = %root.display(), "tree digest mismatch, not pristine");
    }
    Ok(actual == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn atomic_write_produces_final_content_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        atomic_write(&path, b"hello", 0o644).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(!sibling_tmp_path(&path).exists());
    }

    #[test]
    fn atomic_write_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        atomic_write(&path, b"first", 0o644).unwrap();
        atomic_write(&path, b"second", 0o644).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn rename_and_remove_deletes_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("space");
        fs::create_dir_all(target.join("nested")).unwrap();
        fs::write(target.join("nested/file.txt"), b"x").unwrap();
        rename_and_remove(&target).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn rename_and_remove_is_noop_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        rename_and_remove(&missing).unwrap();
    }

    #[test]
    fn touch_creates_missing_file_and_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");
        let when = SystemTime::now() - Duration::from_secs(3600);
        touch(&path, when).unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        let delta = mtime
            .duration_since(when)
            .unwrap_or_else(|e| e.duration());
        assert!(delta < Duration::from_secs(2));
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir(&nested, 0o755).unwrap();
        ensure_dir(&nested, 0o755).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn walk_ordered_is_deterministic_and_skips_denied_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__/skip.pyc"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/b.py"), b"b").unwrap();
        fs::write(dir.path().join("pkg/a.py"), b"a").unwrap();

        let entries: Vec<_> = walk_ordered(dir.path(), DEFAULT_DENY_LIST)
            .map(|e| e.unwrap().relative_path)
            .collect();

        assert_eq!(entries, vec!["pkg", "pkg/a.py", "pkg/b.py"]);
    }

    #[test]
    fn tree_digest_changes_when_a_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        let before = compute_tree_digest(dir.path(), DEFAULT_DENY_LIST).unwrap();
        fs::write(dir.path().join("a.txt"), b"two").unwrap();
        let after = compute_tree_digest(dir.path(), DEFAULT_DENY_LIST).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn meta_round_trips_and_reports_pristine() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("space");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"content").unwrap();
        // The sidecar lives beside the tree, never inside it, so writing it
        // cannot perturb the digest it records.
        let meta_path = parent.path().join("space.meta");

        assert!(!is_pristine(&root, &meta_path, DEFAULT_DENY_LIST).unwrap());

        let digest = compute_tree_digest(&root, DEFAULT_DENY_LIST).unwrap();
        write_meta(&meta_path, &digest).unwrap();
        assert_eq!(read_meta(&meta_path).unwrap(), Some(digest));
        assert!(is_pristine(&root, &meta_path, DEFAULT_DENY_LIST).unwrap());

        fs::write(root.join("a.txt"), b"tampered").unwrap();
        assert!(!is_pristine(&root, &meta_path, DEFAULT_DENY_LIST).unwrap());
    }
}
