#![deny(missing_docs)]

//! Catalog manifests for the holotree environment cache: a self-describing
//! binary record mapping one [`Blueprint`] to the ordered listing of files
//! (with content hashes) that make up the environment it names.
//!
//! A catalog is written once, atomically, and mutated afterwards only by
//! [`bump_used`] rewriting its `last_used_at` timestamp. This crate never
//! reaches into `holotree-library` directly — [`write`] takes a predicate
//! closure instead of a `Library` reference, the same decoupling used by
//! the library crate's own `sweep`, so the catalog/library dependency edge
//! stays one-directional (callers own wiring the two together).

use holotree_fs::atomic_write;
use holotree_hash::{Blueprint, Sha256Hash};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Errors surfaced while reading or writing catalogs.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// An I/O error occurred on a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the failing operation acted on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A filesystem primitive failed.
    #[error(transparent)]
    Fs(#[from] holotree_fs::FsError),
    /// The catalog file's bytes are not a valid catalog record.
    #[error("malformed catalog at {path}: {reason}")]
    Malformed {
        /// The file that failed to decode.
        path: PathBuf,
        /// Human-readable reason, naming the field that failed to parse.
        reason: String,
    },
    /// `write` was asked to publish an entry whose object hash is not yet
    /// present in the library.
    #[error("refusing to publish catalog: object {hash:x} referenced by '{path}' is not in the library")]
    UnpublishedObject {
        /// The relative path of the offending entry.
        path: String,
        /// The object hash that failed the `library.has` check.
        hash: Sha256Hash,
    },
}

impl CatalogError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CatalogError::Io { path: path.into(), source }
    }
}

/// How one catalog entry should be materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// A regular file.
    File,
    /// A directory; carries no content hash of its own.
    Dir,
    /// A symlink; the string is the link target, recorded verbatim.
    Symlink(String),
}

impl LinkKind {
    fn tag(&self) -> u8 {
        match self {
            LinkKind::File => 1,
            LinkKind::Symlink(_) => 2,
            LinkKind::Dir => 3,
        }
    }
}

/// One file, directory, or symlink belonging to an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Path relative to the space root, `/`-separated.
    pub relative_path: String,
    /// Content address in the library. Meaningless for directories, where
    /// it is the all-zero hash.
    pub object_hash: Sha256Hash,
    /// Unix mode bits.
    pub mode: u32,
    /// What kind of filesystem node this entry restores as.
    pub kind: LinkKind,
}

/// Creation/usage metadata carried alongside a catalog's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMetadata {
    /// Identifies the tool version that produced this catalog.
    pub creator: String,
    /// When this catalog was first published.
    pub created_at: SystemTime,
    /// When this catalog was last restored from, bumped by [`bump_used`].
    pub last_used_at: SystemTime,
}

/// A fully parsed catalog: a blueprint's file listing plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    /// The blueprint this catalog was published for.
    pub blueprint: Blueprint,
    /// Target platform, e.g. `linux`, `windows`, `darwin`.
    pub platform: String,
    /// Target architecture, e.g. `x86_64`, `aarch64`.
    pub arch: String,
    /// Entries sorted by relative path.
    pub entries: Vec<CatalogEntry>,
    /// Creation and usage metadata.
    pub metadata: CatalogMetadata,
}

/// Non-identifying summary returned by [`list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSummary {
    /// The blueprint this catalog was published for.
    pub blueprint: Blueprint,
    /// Target platform.
    pub platform: String,
    /// Target architecture.
    pub arch: String,
    /// Age of the catalog since `created_at`, relative to `now`.
    pub age: Duration,
    /// Time since `last_used_at`, relative to `now`.
    pub since_last_used: Duration,
}

const MAGIC: &[u8; 8] = b"HOLOCAT\0";
const FORMAT_VERSION: u32 = 1;

/// Returns the on-disk path a catalog for `(blueprint, platform, arch)`
/// would live at, whether or not it currently exists.
pub fn catalog_path(hololib_root: &Path, blueprint: Blueprint, platform: &str, arch: &str) -> PathBuf {
    hololib_root
        .join("catalog")
        .join(format!("{}.{}.{}", blueprint.to_hex(), platform, arch))
}

/// Looks up the catalog for `(blueprint, platform, arch)`, returning `None`
/// on a cache miss (no such file) rather than an error.
pub fn lookup(
    hololib_root: &Path,
    blueprint: Blueprint,
    platform: &str,
    arch: &str,
) -> Result<Option<Catalog>, CatalogError> {
    let path = catalog_path(hololib_root, blueprint, platform, arch);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).map_err(|e| CatalogError::io(&path, e))?;
    decode_catalog(&bytes, &path).map(Some)
}

/// Publishes a catalog after confirming every entry's object hash passes
/// `has_object` (the caller's `Library::has`, injected to avoid a direct
/// dependency on `holotree-library`). Entries are sorted by relative path
/// before writing, satisfying the catalog-determinism invariant regardless
/// of the order the caller built them in.
pub fn write(
    hololib_root: &Path,
    blueprint: Blueprint,
    platform: &str,
    arch: &str,
    mut entries: Vec<CatalogEntry>,
    metadata: CatalogMetadata,
    has_object: impl Fn(&Sha256Hash) -> bool,
) -> Result<(), CatalogError> {
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    for entry in &entries {
        if matches!(entry.kind, LinkKind::File) && !has_object(&entry.object_hash) {
            return Err(CatalogError::UnpublishedObject {
                path: entry.relative_path.clone(),
                hash: entry.object_hash,
            });
        }
    }

    let catalog = Catalog {
        blueprint,
        platform: platform.to_string(),
        arch: arch.to_string(),
        entries,
        metadata,
    };

    let path = catalog_path(hololib_root, blueprint, platform, arch);
    let bytes = encode_catalog(&catalog);
    atomic_write(&path, &bytes, 0o644)?;
    tracing::debug!(blueprint = %blueprint, entries = catalog.entries.len(), "published catalog");
    Ok(())
}

/// Rewrites a catalog's `last_used_at` to `when`, leaving every other field
/// untouched. Used for LRU-ish reporting only; never drives eviction.
pub fn bump_used(
    hololib_root: &Path,
    blueprint: Blueprint,
    platform: &str,
    arch: &str,
    when: SystemTime,
) -> Result<(), CatalogError> {
    let path = catalog_path(hololib_root, blueprint, platform, arch);
    let bytes = std::fs::read(&path).map_err(|e| CatalogError::io(&path, e))?;
    let mut catalog = decode_catalog(&bytes, &path)?;
    catalog.metadata.last_used_at = when;
    let bytes = encode_catalog(&catalog);
    atomic_write(&path, &bytes, 0o644)?;
    Ok(())
}

/// Lists every catalog under `hololib_root`, with ages computed relative to
/// `now`.
pub fn list(hololib_root: &Path, now: SystemTime) -> Result<Vec<CatalogSummary>, CatalogError> {
    let catalog_dir = hololib_root.join("catalog");
    if !catalog_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut summaries = Vec::new();
    for entry in std::fs::read_dir(&catalog_dir).map_err(|e| CatalogError::io(&catalog_dir, e))? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let bytes = std::fs::read(&path).map_err(|e| CatalogError::io(&path, e))?;
        let catalog = decode_catalog(&bytes, &path)?;
        summaries.push(CatalogSummary {
            blueprint: catalog.blueprint,
            platform: catalog.platform,
            arch: catalog.arch,
            age: now
                .duration_since(catalog.metadata.created_at)
                .unwrap_or_default(),
            since_last_used: now
                .duration_since(catalog.metadata.last_used_at)
                .unwrap_or_default(),
        });
    }
    summaries.sort_by(|a, b| a.blueprint.to_hex().cmp(&b.blueprint.to_hex()));
    Ok(summaries)
}

/// Encodes a catalog to its on-disk byte representation. Exposed directly
/// (rather than only through [`write`]) so round-trip invariants can be
/// tested without touching a filesystem.
pub fn encode_catalog(catalog: &Catalog) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(catalog.blueprint.to_hex().as_bytes());
    write_lp_string(&mut buf, &catalog.platform);
    write_lp_string(&mut buf, &catalog.arch);
    write_lp_string(&mut buf, &catalog.metadata.creator);
    buf.extend_from_slice(&system_time_to_secs(catalog.metadata.created_at).to_le_bytes());
    buf.extend_from_slice(&system_time_to_secs(catalog.metadata.last_used_at).to_le_bytes());

    buf.extend_from_slice(&(catalog.entries.len() as u32).to_le_bytes());
    for entry in &catalog.entries {
        write_lp_string(&mut buf, &entry.relative_path);
        buf.extend_from_slice(entry.object_hash.as_slice());
        buf.extend_from_slice(&entry.mode.to_le_bytes());
        buf.push(entry.kind.tag());
        if let LinkKind::Symlink(target) = &entry.kind {
            write_lp_string(&mut buf, target);
        }
    }
    buf
}

/// Decodes a catalog from its on-disk byte representation. `source_path` is
/// only used to annotate error messages.
pub fn decode_catalog(bytes: &[u8], source_path: &Path) -> Result<Catalog, CatalogError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let malformed = |reason: &str| CatalogError::Malformed {
        path: source_path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut magic = [0u8; 8];
    cursor.read_exact(&mut magic).map_err(|_| malformed("truncated magic"))?;
    if &magic != MAGIC {
        return Err(malformed("bad magic"));
    }

    let version = read_u32(&mut cursor).map_err(|_| malformed("truncated version"))?;
    if version != FORMAT_VERSION {
        return Err(malformed(&format!("unsupported format version {version}")));
    }

    let mut blueprint_hex = [0u8; 16];
    cursor
        .read_exact(&mut blueprint_hex)
        .map_err(|_| malformed("truncated blueprint"))?;
    let blueprint_hex = std::str::from_utf8(&blueprint_hex).map_err(|_| malformed("blueprint is not utf-8"))?;
    let blueprint = parse_blueprint_hex(blueprint_hex).ok_or_else(|| malformed("blueprint is not valid hex"))?;

    let platform = read_lp_string(&mut cursor).map_err(|_| malformed("truncated platform"))?;
    let arch = read_lp_string(&mut cursor).map_err(|_| malformed("truncated arch"))?;
    let creator = read_lp_string(&mut cursor).map_err(|_| malformed("truncated creator"))?;
    let created_at = secs_to_system_time(read_u64(&mut cursor).map_err(|_| malformed("truncated created_at"))?);
    let last_used_at = secs_to_system_time(read_u64(&mut cursor).map_err(|_| malformed("truncated last_used_at"))?);

    let entry_count = read_u32(&mut cursor).map_err(|_| malformed("truncated entry count"))?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let relative_path = read_lp_string(&mut cursor).map_err(|_| malformed("truncated entry path"))?;
        let mut hash = Sha256Hash::default();
        cursor
            .read_exact(&mut hash)
            .map_err(|_| malformed("truncated entry hash"))?;
        let mode = read_u32(&mut cursor).map_err(|_| malformed("truncated entry mode"))?;
        let mut tag = [0u8; 1];
        cursor
            .read_exact(&mut tag)
            .map_err(|_| malformed("truncated entry kind"))?;
        let kind = match tag[0] {
            1 => LinkKind::File,
            3 => LinkKind::Dir,
            2 => {
                let target = read_lp_string(&mut cursor).map_err(|_| malformed("truncated symlink target"))?;
                LinkKind::Symlink(target)
            }
            other => return Err(malformed(&format!("unknown entry kind tag {other}"))),
        };
        entries.push(CatalogEntry {
            relative_path,
            object_hash: hash,
            mode,
            kind,
        });
    }

    Ok(Catalog {
        blueprint,
        platform,
        arch,
        entries,
        metadata: CatalogMetadata {
            creator,
            created_at,
            last_used_at,
        },
    })
}

fn write_lp_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_lp_string(cursor: &mut std::io::Cursor<&[u8]>) -> std::io::Result<String> {
    let len = read_u32(cursor)?;
    let mut bytes = vec![0u8; len as usize];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn read_u32(cursor: &mut std::io::Cursor<&[u8]>) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(cursor: &mut std::io::Cursor<&[u8]>) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn system_time_to_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn secs_to_system_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn parse_blueprint_hex(hex: &str) -> Option<Blueprint> {
    Blueprint::from_hex(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_catalog() -> Catalog {
        let blueprint = Blueprint::from_fingerprint(holotree_hash::Fingerprint::of("sample"));
        let hash = holotree_hash::compute_bytes_digest::<holotree_hash::Sha256>(b"contents");
        Catalog {
            blueprint,
            platform: "linux".to_string(),
            arch: "x86_64".to_string(),
            entries: vec![
                CatalogEntry {
                    relative_path: "bin/python".to_string(),
                    object_hash: hash,
                    mode: 0o755,
                    kind: LinkKind::File,
                },
                CatalogEntry {
                    relative_path: "lib".to_string(),
                    object_hash: Sha256Hash::default(),
                    mode: 0o755,
                    kind: LinkKind::Dir,
                },
                CatalogEntry {
                    relative_path: "bin/python3".to_string(),
                    object_hash: Sha256Hash::default(),
                    mode: 0o777,
                    kind: LinkKind::Symlink("python".to_string()),
                },
            ],
            metadata: CatalogMetadata {
                creator: "holotree/0.1.0".to_string(),
                created_at: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
                last_used_at: UNIX_EPOCH + Duration::from_secs(1_700_000_500),
            },
        }
    }

    #[test]
    fn round_trips_through_encode_and_decode() {
        let catalog = sample_catalog();
        let bytes = encode_catalog(&catalog);
        let decoded = decode_catalog(&bytes, Path::new("catalog-under-test")).unwrap();
        assert_eq!(decoded, catalog);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = encode_catalog(&sample_catalog());
        bytes[0] = b'X';
        let err = decode_catalog(&bytes, Path::new("bad")).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed { .. }));
    }

    #[test]
    fn write_then_lookup_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = sample_catalog();
        write(
            dir.path(),
            catalog.blueprint,
            &catalog.platform,
            &catalog.arch,
            catalog.entries.clone(),
            catalog.metadata.clone(),
            |_hash| true,
        )
        .unwrap();

        let found = lookup(dir.path(), catalog.blueprint, &catalog.platform, &catalog.arch)
            .unwrap()
            .unwrap();
        assert_eq!(found.entries.len(), 3);
        assert_eq!(found.entries[0].relative_path, "bin/python");
    }

    #[test]
    fn lookup_misses_return_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint = Blueprint::from_fingerprint(holotree_hash::Fingerprint::of("absent"));
        let found = lookup(dir.path(), blueprint, "linux", "x86_64").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn write_refuses_unpublished_objects() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = sample_catalog();
        let err = write(
            dir.path(),
            catalog.blueprint,
            &catalog.platform,
            &catalog.arch,
            catalog.entries.clone(),
            catalog.metadata.clone(),
            |_hash| false,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnpublishedObject { .. }));
    }

    #[test]
    fn bump_used_updates_only_last_used_at() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = sample_catalog();
        write(
            dir.path(),
            catalog.blueprint,
            &catalog.platform,
            &catalog.arch,
            catalog.entries.clone(),
            catalog.metadata.clone(),
            |_hash| true,
        )
        .unwrap();

        let new_time = UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        bump_used(dir.path(), catalog.blueprint, &catalog.platform, &catalog.arch, new_time).unwrap();

        let reloaded = lookup(dir.path(), catalog.blueprint, &catalog.platform, &catalog.arch)
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.metadata.last_used_at, new_time);
        assert_eq!(reloaded.metadata.created_at, catalog.metadata.created_at);
    }

    #[test]
    fn entries_are_sorted_by_relative_path_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = sample_catalog();
        write(
            dir.path(),
            catalog.blueprint,
            &catalog.platform,
            &catalog.arch,
            catalog.entries.clone(),
            catalog.metadata.clone(),
            |_hash| true,
        )
        .unwrap();

        let found = lookup(dir.path(), catalog.blueprint, &catalog.platform, &catalog.arch)
            .unwrap()
            .unwrap();
        let paths: Vec<_> = found.entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["bin/python", "bin/python3", "lib"]);
    }

    #[test]
    fn list_reports_age_relative_to_now() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = sample_catalog();
        write(
            dir.path(),
            catalog.blueprint,
            &catalog.platform,
            &catalog.arch,
            catalog.entries.clone(),
            catalog.metadata.clone(),
            |_hash| true,
        )
        .unwrap();

        let now = catalog.metadata.created_at + Duration::from_secs(86_400);
        let summaries = list(dir.path(), now).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].age, Duration::from_secs(86_400));
    }
}
