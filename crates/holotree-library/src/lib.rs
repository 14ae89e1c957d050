#![deny(missing_docs)]

//! The content-addressed library (hololib): a pool of file objects shared
//! across every catalog, keyed by the SHA-256 of their content and sharded
//! by the first two hex digits (`library/<xx>/<rest>`).
//!
//! The library is append-only outside of an explicit [`Library::sweep`] or a
//! corruption reclaim in [`Library::verify`]; every mutating operation is
//! expected to be called while the caller holds the global library lock
//! (`holotree-lock`'s `global.lck`) — this crate does not take that lock
//! itself, matching the "config/locks injected by the caller" design note.

use dashmap::DashMap;
use fs_err as fs;
use holotree_hash::{shard_hex, Blueprint, HashingWriter, Sha256, Sha256Hash};
use rayon::prelude::*;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Errors surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// An I/O error occurred on a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the failing operation acted on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An object's content no longer matches its address; the object has
    /// been deleted and every catalog that referenced it should be treated
    /// as a cache miss.
    #[error("library object {0:x} failed re-digest and was reclaimed")]
    Integrity(Sha256Hash),
    /// A filesystem primitive (directory creation, atomic write) failed.
    #[error(transparent)]
    Fs(#[from] holotree_fs::FsError),
}

impl LibraryError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LibraryError::Io { path: path.into(), source }
    }
}

/// Mode applied to stored objects: read-only for owner and group, readable
/// by everyone. The library exclusively owns object bytes; nothing but a
/// sweep or a corruption reclaim may remove or replace them, so write bits
/// are dropped immediately after a successful store.
const OBJECT_MODE: u32 = 0o444;

/// Counts produced by a garbage-collect sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Number of objects that were found reachable and left in place.
    pub kept: usize,
    /// Number of objects that were unreachable and removed.
    pub removed: usize,
}

/// The content-addressed object store.
pub struct Library {
    root: PathBuf,
    existence_cache: DashMap<String, ()>,
    users: DashMap<String, DashMap<(String, Blueprint), ()>>,
}

impl Library {
    /// Opens (without creating) a library rooted at `hololib_root`. The
    /// actual object pool lives at `hololib_root/library`.
    pub fn new(hololib_root: impl Into<PathBuf>) -> Self {
        Library {
            root: hololib_root.into(),
            existence_cache: DashMap::new(),
            users: DashMap::new(),
        }
    }

    fn library_dir(&self) -> PathBuf {
        self.root.join("library")
    }

    fn temp_dir(&self) -> PathBuf {
        self.library_dir().join(".tmp")
    }

    fn used_dir(&self) -> PathBuf {
        self.root.join("used")
    }

    /// Returns the on-disk path an object with the given hash would live
    /// at, whether or not it currently exists.
    pub fn object_path(&self, hash: &Sha256Hash) -> PathBuf {
        let (shard, rest) = shard_hex(hash);
        self.library_dir().join(shard).join(rest)
    }

    /// Returns whether an object with the given hash is present, consulting
    /// (and populating) an in-memory existence cache keyed by hex digest so
    /// repeated lookups for the same hash don't re-stat the filesystem.
    pub fn has(&self, hash: &Sha256Hash) -> bool {
        let key = format!("{hash:x}");
        if self.existence_cache.contains_key(&key) {
            return true;
        }
        let present = self.object_path(hash).is_file();
        if present {
            self.existence_cache.insert(key, ());
        }
        present
    }

    /// Streams `reader`'s content into the library, hashing it on the fly,
    /// and returns the resulting object hash. If an object with that hash
    /// already exists, the newly written bytes are discarded and the
    /// existing object is left untouched — this is the deduplication path.
    pub fn store_from_reader(&self, mut reader: impl Read) -> Result<Sha256Hash, LibraryError> {
        holotree_fs::ensure_dir(&self.temp_dir(), 0o777)?;
        let temp_file = tempfile::NamedTempFile::new_in(self.temp_dir())
            .map_err(|e| LibraryError::io(self.temp_dir(), e))?;
        let (file, temp_path) = temp_file.into_parts();
        let mut writer = HashingWriter::<_, Sha256>::new(file);

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| LibraryError::io(temp_path.to_path_buf(), e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| LibraryError::io(temp_path.to_path_buf(), e))?;
        }
        let (file, hash) = writer.finalize();
        file.sync_all().map_err(|e| LibraryError::io(temp_path.to_path_buf(), e))?;
        drop(file);

        self.persist_temp(temp_path, &hash)?;
        Ok(hash)
    }

    /// Promotes an already-written temp file into the library at the
    /// location its content hash maps to, hard-linking when possible and
    /// falling back to a rename. If the destination already exists the temp
    /// file is simply discarded (another ingest already won the race).
    pub fn store_from_path(&self, tempfile_path: &Path, hash: &Sha256Hash) -> Result<(), LibraryError> {
        let dest = self.object_path(hash);
        if let Some(parent) = dest.parent() {
            holotree_fs::ensure_dir(parent, 0o777)?;
        }

        match fs::hard_link(tempfile_path, &dest) {
            Ok(()) => {
                let _ = fs::remove_file(tempfile_path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(tempfile_path);
            }
            Err(_) => match fs::rename(tempfile_path, &dest) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let _ = fs::remove_file(tempfile_path);
                }
                Err(e) => return Err(LibraryError::io(&dest, e)),
            },
        }

        set_readonly(&dest)?;
        self.existence_cache.insert(format!("{hash:x}"), ());
        Ok(())
    }

    /// Adopts a file that must keep existing at `path` (e.g. a file inside
    /// a staged tree that is about to become a template) into the library,
    /// without consuming it the way [`Library::store_from_path`] does.
    /// Hard-links when possible; falls back to copying the bytes when the
    /// source and the library live on different filesystems, since a file
    /// that must survive in place cannot be renamed away.
    pub fn adopt(&self, path: &Path, hash: &Sha256Hash) -> Result<(), LibraryError> {
        let dest = self.object_path(hash);
        if let Some(parent) = dest.parent() {
            holotree_fs::ensure_dir(parent, 0o777)?;
        }

        match fs::hard_link(path, &dest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(()),
            Err(_) => match fs::copy(path, &dest) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(()),
                Err(e) => return Err(LibraryError::io(&dest, e)),
            },
        }

        set_readonly(&dest)?;
        self.existence_cache.insert(format!("{hash:x}"), ());
        Ok(())
    }

    fn persist_temp(&self, temp_path: tempfile::TempPath, hash: &Sha256Hash) -> Result<(), LibraryError> {
        let dest = self.object_path(hash);
        if let Some(parent) = dest.parent() {
            holotree_fs::ensure_dir(parent, 0o777)?;
        }
        match temp_path.persist_noclobber(&dest) {
            Ok(_) => {}
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(LibraryError::io(&dest, err.error)),
        }
        set_readonly(&dest)?;
        self.existence_cache.insert(format!("{hash:x}"), ());
        Ok(())
    }

    /// Opens an object for reading.
    pub fn open(&self, hash: &Sha256Hash) -> Result<fs::File, LibraryError> {
        let path = self.object_path(hash);
        fs::File::open(&path).map_err(|e| LibraryError::io(path, e))
    }

    /// Records that `space_id` (materializing `blueprint`) references
    /// `object_hash`. Besides the in-memory back-reference index, this
    /// touches the on-disk marker `used/<blueprint>/<space_id>` so that a
    /// space's set of referenced objects can be inspected without replaying
    /// the in-memory state of a running process.
    pub fn add_user(
        &self,
        object_hash: &Sha256Hash,
        space_id: &str,
        blueprint: Blueprint,
    ) -> Result<(), LibraryError> {
        self.users
            .entry(format!("{object_hash:x}"))
            .or_default()
            .insert((space_id.to_string(), blueprint), ());

        let marker_dir = self.used_dir().join(blueprint.to_hex());
        holotree_fs::ensure_dir(&marker_dir, 0o777)?;
        let marker_path = marker_dir.join(space_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&marker_path)
            .map_err(|e| LibraryError::io(&marker_path, e))?;
        writeln!(file, "{object_hash:x}").map_err(|e| LibraryError::io(&marker_path, e))?;
        Ok(())
    }

    /// Removes `space_id`'s reference to `object_hash`, across every
    /// blueprint it was recorded under. Returns `true` if the object has no
    /// remaining users in the in-memory index, i.e. it is now a candidate
    /// for reclaim on the next [`Library::sweep`].
    pub fn remove_user(&self, object_hash: &Sha256Hash, space_id: &str) -> bool {
        let key = format!("{object_hash:x}");
        let became_empty = match self.users.get(&key) {
            Some(entry) => {
                entry.retain(|owner, _| owner.0 != space_id);
                entry.is_empty()
            }
            None => true,
        };
        if became_empty {
            self.users.remove(&key);
        }
        became_empty
    }

    /// Re-digests the bytes stored at `hash`. On a mismatch the object is
    /// deleted immediately and an [`LibraryError::Integrity`] is returned;
    /// callers must treat every catalog that referenced this hash as a
    /// cache miss from this point on.
    pub fn verify(&self, hash: &Sha256Hash) -> Result<(), LibraryError> {
        let path = self.object_path(hash);
        let actual = holotree_hash::compute_file_digest::<Sha256>(&path).map_err(|e| LibraryError::io(&path, e))?;
        if &actual != hash {
            let _ = fs::remove_file(&path);
            self.existence_cache.remove(&format!("{hash:x}"));
            return Err(LibraryError::Integrity(*hash));
        }
        Ok(())
    }

    /// Removes every object not present in `reachable` (typically derived
    /// by the caller walking every catalog's entries), returning how many
    /// objects were kept and how many were removed. The reachable set is
    /// computed by the caller rather than this crate, per the design note
    /// that no in-memory reference graph is persisted here: the library
    /// itself holds no notion of "which catalogs exist".
    pub fn sweep(&self, reachable: &HashSet<Sha256Hash>) -> Result<SweepStats, LibraryError> {
        let library_dir = self.library_dir();
        if !library_dir.is_dir() {
            return Ok(SweepStats { kept: 0, removed: 0 });
        }

        let shard_dirs: Vec<PathBuf> = fs::read_dir(&library_dir)
            .map_err(|e| LibraryError::io(&library_dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_dir() && p.file_name().and_then(|n| n.to_str()) != Some(".tmp"))
            .collect();

        let kept = AtomicUsize::new(0);
        let removed = AtomicUsize::new(0);

        shard_dirs.par_iter().for_each(|shard_dir| {
            let Ok(entries) = std::fs::read_dir(shard_dir) else {
                return;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let Some(shard) = shard_dir.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(rest) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let full_hex = format!("{shard}{rest}");
                let is_reachable = holotree_hash::parse_digest_from_hex::<Sha256>(&full_hex)
                    .map(|hash| reachable.contains(&hash))
                    .unwrap_or(false);
                if is_reachable {
                    kept.fetch_add(1, Ordering::Relaxed);
                } else {
                    if std::fs::remove_file(&path).is_ok() {
                        removed.fetch_add(1, Ordering::Relaxed);
                        self.existence_cache.remove(&full_hex);
                    }
                    tracing::debug!(path = %path.display(), "swept unreferenced library object");
                }
            }
        });

        Ok(SweepStats {
            kept: kept.load(Ordering::Relaxed),
            removed: removed.load(Ordering::Relaxed),
        })
    }
}

fn set_readonly(path: &Path) -> Result<(), LibraryError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(OBJECT_MODE))
            .map_err(|e| LibraryError::io(path, e))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn library() -> (tempfile::TempDir, Library) {
        let dir = tempfile::tempdir().unwrap();
        let lib = Library::new(dir.path());
        (dir, lib)
    }

    #[test]
    fn store_from_reader_then_has_and_open() {
        let (_dir, lib) = library();
        let hash = lib.store_from_reader(Cursor::new(b"hello world")).unwrap();
        assert!(lib.has(&hash));

        let mut file = lib.open(&hash).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn store_from_reader_deduplicates_identical_content() {
        let (_dir, lib) = library();
        let h1 = lib.store_from_reader(Cursor::new(b"same")).unwrap();
        let h2 = lib.store_from_reader(Cursor::new(b"same")).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn object_addressing_invariant_holds() {
        let (_dir, lib) = library();
        let hash = lib.store_from_reader(Cursor::new(b"addressed content")).unwrap();
        let path = lib.object_path(&hash);
        let recomputed = holotree_hash::compute_file_digest::<Sha256>(&path).unwrap();
        assert_eq!(recomputed, hash);
    }

    #[test]
    fn verify_detects_and_reclaims_corruption() {
        let (_dir, lib) = library();
        let hash = lib.store_from_reader(Cursor::new(b"pristine")).unwrap();
        let path = lib.object_path(&hash);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        }
        fs::write(&path, b"corrupted!").unwrap();

        let err = lib.verify(&hash).unwrap_err();
        assert!(matches!(err, LibraryError::Integrity(h) if h == hash));
        assert!(!path.exists());
        assert!(!lib.has(&hash));
    }

    #[test]
    fn sweep_removes_unreachable_objects_and_keeps_reachable_ones() {
        let (_dir, lib) = library();
        let keep = lib.store_from_reader(Cursor::new(b"keep me")).unwrap();
        let drop_hash = lib.store_from_reader(Cursor::new(b"drop me")).unwrap();

        let mut reachable = HashSet::new();
        reachable.insert(keep);

        let stats = lib.sweep(&reachable).unwrap();
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.removed, 1);
        assert!(lib.object_path(&keep).exists());
        assert!(!lib.object_path(&drop_hash).exists());
    }

    #[test]
    fn adopt_leaves_the_source_file_in_place() {
        let (dir, lib) = library();
        let source = dir.path().join("source.txt");
        fs::write(&source, b"template content").unwrap();
        let hash = holotree_hash::compute_file_digest::<Sha256>(&source).unwrap();

        lib.adopt(&source, &hash).unwrap();

        assert!(source.exists(), "adopt must not consume its source");
        assert!(lib.has(&hash));
        let mut file = lib.open(&hash).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "template content");
    }

    #[test]
    fn add_user_then_remove_user_reports_emptiness() {
        let (_dir, lib) = library();
        let hash = lib.store_from_reader(Cursor::new(b"referenced")).unwrap();
        let fingerprint = holotree_hash::Fingerprint::of("blueprint-a");
        let blueprint = Blueprint::from_fingerprint(fingerprint);

        lib.add_user(&hash, "space-1", blueprint).unwrap();
        let marker = lib.used_dir().join(blueprint.to_hex()).join("space-1");
        assert!(marker.exists());

        let now_empty = lib.remove_user(&hash, "space-1");
        assert!(now_empty);
    }
}
