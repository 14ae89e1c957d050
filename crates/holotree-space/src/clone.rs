//! Clones a pristine template into a fresh space directory using a bounded
//! fan-out of worker threads, per §4.8: "a fan-out of worker threads
//! (default ≈ `max(2, ncpu-1)`)". The clone is a plain filesystem copy of
//! the template tree using the materializer's own [`MaterializeMode`] (the
//! template itself already holds real files, not library references, so
//! hardlinking a clone from it links against the template's inodes rather
//! than the library's).

use crate::error::SpaceError;
use crate::mode::{materialize_file, symlink_file, MaterializeMode};
use fs_err as fs;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::Path;

/// Returns the default worker count for template cloning:
/// `max(2, available_parallelism - 1)`, leaving one core free for the
/// caller's own thread.
pub fn default_clone_workers() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    cpus.saturating_sub(1).max(2)
}

fn build_pool(workers: usize) -> Result<ThreadPool, SpaceError> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| SpaceError::io(Path::new("clone-worker-pool"), std::io::Error::other(e)))
}

/// Clones every entry of `source` (already known to be pristine) into
/// `dest`, which must not exist yet. Directories are created sequentially
/// first so every file's parent exists before the fan-out starts; files
/// and symlinks are then materialized in parallel across `workers`
/// threads.
pub fn clone_tree(
    source: &Path,
    dest: &Path,
    deny_list: &[&str],
    mode: MaterializeMode,
    workers: usize,
) -> Result<(), SpaceError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut symlinks = Vec::new();

    for entry in holotree_fs::walk_ordered(source, deny_list) {
        let entry = entry?;
        if entry.is_symlink {
            symlinks.push(entry);
        } else if entry.is_dir {
            dirs.push(entry);
        } else {
            files.push(entry);
        }
    }

    holotree_fs::ensure_dir(dest, 0o777)?;
    for dir in &dirs {
        let target = dest.join(&dir.relative_path);
        holotree_fs::ensure_dir(&target, dir.mode.max(0o755))?;
    }

    let pool = build_pool(workers)?;
    let file_errors: Vec<SpaceError> = pool.install(|| {
        use rayon::prelude::*;
        files
            .par_iter()
            .filter_map(|entry| {
                let target = dest.join(&entry.relative_path);
                materialize_file(mode, &entry.absolute_path, &target, entry.mode).err()
            })
            .collect()
    });
    if let Some(err) = file_errors.into_iter().next() {
        return Err(err);
    }

    for symlink in &symlinks {
        let link_target = fs::read_link(&symlink.absolute_path).map_err(|e| SpaceError::io(&symlink.absolute_path, e))?;
        let dest_path = dest.join(&symlink.relative_path);
        symlink_file(&link_target, &dest_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_files_directories_and_symlinks() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("template");
        fs::create_dir_all(source.join("bin")).unwrap();
        fs::write(source.join("bin/python"), b"binary-bytes").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("python", source.join("bin/python3")).unwrap();

        let dest = root.path().join("space");
        clone_tree(&source, &dest, holotree_fs::DEFAULT_DENY_LIST, MaterializeMode::Copy, 2).unwrap();

        assert_eq!(fs::read(dest.join("bin/python")).unwrap(), b"binary-bytes");
        #[cfg(unix)]
        assert_eq!(std::fs::read_link(dest.join("bin/python3")).unwrap(), Path::new("python"));
    }

    #[test]
    fn default_clone_workers_is_never_below_two() {
        assert!(default_clone_workers() >= 2);
    }
}
