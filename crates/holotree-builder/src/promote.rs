//! Promotes a staged, fully-built environment into the library, the
//! catalog, and the template store.
//!
//! Promotion walks the staged tree exactly once with the same
//! [`holotree_fs::walk_ordered`] used by pristine-digest computation, so
//! the catalog's entry listing and the tree's `.meta` digest are always
//! computed over an identical view of the tree. Regular files are
//! [`holotree_library::Library::adopt`]ed (hard-linked, source left in
//! place) rather than consumed, because the staged directory itself is
//! kept afterwards as the template used for every future restore of this
//! blueprint.

use crate::error::BuilderError;
use holotree_catalog::{CatalogEntry, CatalogMetadata, LinkKind};
use holotree_fs::DEFAULT_DENY_LIST;
use holotree_hash::{Blueprint, Sha256Hash};
use holotree_library::Library;
use std::fs as stdfs;
use std::path::Path;
use std::time::SystemTime;

/// Where templates are published, rooted under the same `hololib_root` as
/// the catalog and library: `hololib_root/templates/<blueprint>/`, with a
/// sibling `<blueprint>.meta` digest file.
pub fn template_dir(hololib_root: &Path, blueprint: Blueprint) -> std::path::PathBuf {
    hololib_root.join("templates").join(blueprint.to_hex())
}

fn template_meta_path(hololib_root: &Path, blueprint: Blueprint) -> std::path::PathBuf {
    hololib_root
        .join("templates")
        .join(format!("{}.meta", blueprint.to_hex()))
}

/// Walks `staged_dir`, adopts every regular file into `library`, publishes
/// a catalog for `(blueprint, platform, arch)`, and finally turns the
/// staged directory itself into the blueprint's template by renaming it
/// into place and writing its `.meta` sidecar as a sibling file.
pub fn promote(
    hololib_root: &Path,
    library: &Library,
    staged_dir: &Path,
    blueprint: Blueprint,
    platform: &str,
    arch: &str,
    creator: &str,
    now: SystemTime,
) -> Result<(), BuilderError> {
    let mut entries = Vec::new();

    for entry in holotree_fs::walk_ordered(staged_dir, DEFAULT_DENY_LIST) {
        let entry = entry?;
        let kind = if entry.is_symlink {
            let target = stdfs::read_link(&entry.absolute_path).map_err(|e| BuilderError::io(&entry.absolute_path, e))?;
            LinkKind::Symlink(target.to_string_lossy().into_owned())
        } else if entry.is_dir {
            LinkKind::Dir
        } else {
            LinkKind::File
        };

        let object_hash = if matches!(kind, LinkKind::File) {
            let hash = holotree_hash::compute_file_digest::<holotree_hash::Sha256>(&entry.absolute_path)
                .map_err(|e| BuilderError::io(&entry.absolute_path, e))?;
            library.adopt(&entry.absolute_path, &hash)?;
            hash
        } else {
            Sha256Hash::default()
        };

        entries.push(CatalogEntry {
            relative_path: entry.relative_path,
            object_hash,
            mode: entry.mode,
            kind,
        });
    }

    let metadata = CatalogMetadata {
        creator: creator.to_string(),
        created_at: now,
        last_used_at: now,
    };
    holotree_catalog::write(
        hololib_root,
        blueprint,
        platform,
        arch,
        entries,
        metadata,
        |hash| library.has(hash),
    )?;

    let digest = holotree_fs::compute_tree_digest(staged_dir, DEFAULT_DENY_LIST)?;
    let meta_path = template_meta_path(hololib_root, blueprint);
    let dest = template_dir(hololib_root, blueprint);
    holotree_fs::rename_and_remove(&dest)?;
    if let Some(parent) = dest.parent() {
        holotree_fs::ensure_dir(parent, 0o777)?;
    }
    stdfs::rename(staged_dir, &dest).map_err(|e| BuilderError::io(&dest, e))?;
    holotree_fs::write_meta(&meta_path, &digest)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use holotree_hash::Fingerprint;

    #[test]
    fn promotes_staged_tree_into_library_catalog_and_template() {
        let dir = tempfile::tempdir().unwrap();
        let hololib_root = dir.path().join("hololib");
        let staged = dir.path().join("stage");
        stdfs::create_dir_all(staged.join("bin")).unwrap();
        stdfs::write(staged.join("bin/python"), b"#!/bin/sh\necho hi\n").unwrap();

        let library = Library::new(&hololib_root);
        let blueprint = Blueprint::from_fingerprint(Fingerprint::of("promote-test"));
        let now = SystemTime::now();

        promote(&hololib_root, &library, &staged, blueprint, "linux", "x86_64", "holotree/0.1.0", now).unwrap();

        let catalog = holotree_catalog::lookup(&hololib_root, blueprint, "linux", "x86_64")
            .unwrap()
            .unwrap();
        assert_eq!(catalog.entries.len(), 2);

        let template = template_dir(&hololib_root, blueprint);
        assert!(template.join("bin/python").is_file());
        assert!(!staged.exists(), "staged dir is renamed away, not copied");

        let meta_path = template_meta_path(&hololib_root, blueprint);
        assert!(holotree_fs::is_pristine(&template, &meta_path, DEFAULT_DENY_LIST).unwrap());
    }

    #[test]
    fn adopted_files_are_deduplicated_in_the_library() {
        let dir = tempfile::tempdir().unwrap();
        let hololib_root = dir.path().join("hololib");
        let staged = dir.path().join("stage");
        stdfs::create_dir_all(staged.join("lib")).unwrap();
        stdfs::write(staged.join("lib/a.txt"), b"same bytes").unwrap();
        stdfs::write(staged.join("lib/b.txt"), b"same bytes").unwrap();

        let library = Library::new(&hololib_root);
        let blueprint = Blueprint::from_fingerprint(Fingerprint::of("dedup-test"));
        promote(&hololib_root, &library, &staged, blueprint, "linux", "x86_64", "holotree/0.1.0", SystemTime::now()).unwrap();

        let catalog = holotree_catalog::lookup(&hololib_root, blueprint, "linux", "x86_64")
            .unwrap()
            .unwrap();
        let hashes: std::collections::HashSet<_> = catalog
            .entries
            .iter()
            .filter(|e| matches!(e.kind, LinkKind::File))
            .map(|e| e.object_hash)
            .collect();
        assert_eq!(hashes.len(), 1, "identical file content shares one library object");
    }
}
