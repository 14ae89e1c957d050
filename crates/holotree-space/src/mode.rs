//! How a materialized file comes into existence: a byte copy, a hard
//! link into the library, or a symlink to the library object. All three
//! preserve the entry's recorded mode bits; hardlink additionally detects
//! a cross-device link attempt and falls back to copy, since the library
//! and the space directory are not guaranteed to share a filesystem.

use crate::error::SpaceError;
use fs_err as fs;
use std::path::Path;

/// How catalog entries are turned into files on disk during a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeMode {
    /// Bytewise copy. Safest across filesystems; always works, always
    /// costs the full read+write.
    Copy,
    /// Hard link into the library object. Zero-copy; the default when the
    /// library and the space share a filesystem. Falls back to [`Copy`]
    /// transparently on `EXDEV`.
    Hardlink,
    /// Symlink to the library object, used when the library lives on a
    /// read-only or explicitly shared mount that the space itself cannot
    /// write hard links against.
    Symlink,
}

/// Materializes a single regular file at `dest` from the library object at
/// `source`, using `mode`. A [`MaterializeMode::Hardlink`] attempt that
/// fails with `EXDEV` (source and destination on different filesystems)
/// transparently falls back to a byte copy rather than surfacing an
/// error.
pub fn materialize_file(mode: MaterializeMode, source: &Path, dest: &Path, file_mode: u32) -> Result<(), SpaceError> {
    match mode {
        MaterializeMode::Copy => copy_file(source, dest, file_mode),
        MaterializeMode::Symlink => symlink_file(source, dest),
        MaterializeMode::Hardlink => match fs::hard_link(source, dest) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => copy_file(source, dest, file_mode),
            Err(e) => Err(SpaceError::io(dest, e)),
        },
    }
}

fn copy_file(source: &Path, dest: &Path, file_mode: u32) -> Result<(), SpaceError> {
    fs::copy(source, dest).map_err(|e| SpaceError::io(dest, e))?;
    set_mode(dest, file_mode)
}

/// Creates a symlink at `dest` pointing at `target`, read verbatim from
/// the source tree and never followed, per the fs primitives' "symlinks
/// are preserved through copy/clone" contract.
#[cfg(unix)]
pub fn symlink_file(target: &Path, dest: &Path) -> Result<(), SpaceError> {
    std::os::unix::fs::symlink(target, dest).map_err(|e| SpaceError::io(dest, e))
}

/// Creates a symlink at `dest` pointing at `target`, read verbatim from
/// the source tree and never followed, per the fs primitives' "symlinks
/// are preserved through copy/clone" contract.
#[cfg(windows)]
pub fn symlink_file(target: &Path, dest: &Path) -> Result<(), SpaceError> {
    std::os::windows::fs::symlink_file(target, dest).map_err(|e| SpaceError::io(dest, e))
}

#[cfg(unix)]
fn is_cross_device(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(error: &std::io::Error) -> bool {
    // Windows has no stable `ErrorKind` for this case yet; treat every
    // hard-link failure as a cross-device condition and fall back to copy
    // rather than surfacing spurious restore failures.
    let _ = error;
    true
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SpaceError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| SpaceError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SpaceError> {
    Ok(())
}
