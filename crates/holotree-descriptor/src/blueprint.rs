//! Blueprint derivation: the stable fingerprint identity of a canonicalized
//! descriptor.

use crate::canonical::canonical_yaml;
use crate::descriptor::{Descriptor, MergeError, ParseError};
use holotree_hash::Fingerprint;

pub use holotree_hash::Blueprint;

/// Computes the blueprint of a descriptor by fingerprinting its canonical
/// YAML.
pub fn blueprint_of(descriptor: &Descriptor) -> Blueprint {
    Blueprint::from_fingerprint(Fingerprint::of(canonical_yaml(descriptor)))
}

/// Errors surfaced while composing a final blueprint from a list of
/// descriptor files. Both variants carry the offending file's name so an
/// operator can find the mistake without re-running anything.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// One of the descriptor files failed to parse.
    #[error("failed to parse descriptor '{file}': {source}")]
    Parse {
        /// The file that failed to parse.
        file: String,
        /// The underlying parse error.
        #[source]
        source: ParseError,
    },
    /// Merging two descriptors in the fold produced a conflict.
    #[error("failed to merge descriptor '{file}': {source}")]
    Merge {
        /// The file whose merge into the running accumulator failed.
        file: String,
        /// The underlying merge error.
        #[source]
        source: MergeError,
    },
    /// No descriptor files were given; there is nothing to fold or
    /// fingerprint.
    #[error("at least one descriptor file is required to compose a blueprint")]
    NoDescriptors,
}

/// Parses each `(file_name, contents)` pair in order, folds them left to
/// right with [`Descriptor::merge`], and fingerprints the result. This is
/// the single entry point external callers use to go from "one or more
/// descriptor files" to "a blueprint", matching the `§2` data flow exactly.
///
/// No I/O is performed: callers own reading the files from disk.
pub fn compose_final_blueprint(
    files: &[(String, Vec<u8>)],
) -> Result<(Descriptor, Blueprint), ComposeError> {
    let mut iter = files.iter();
    let (first_name, first_bytes) = iter.next().ok_or(ComposeError::NoDescriptors)?;
    let mut accumulator = Descriptor::parse(first_bytes).map_err(|source| ComposeError::Parse {
        file: first_name.clone(),
        source,
    })?;

    for (name, bytes) in iter {
        let next = Descriptor::parse(bytes).map_err(|source| ComposeError::Parse {
            file: name.clone(),
            source,
        })?;
        accumulator = accumulator.merge(next).map_err(|source| ComposeError::Merge {
            file: name.clone(),
            source,
        })?;
    }

    let blueprint = blueprint_of(&accumulator);
    Ok((accumulator, blueprint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, yaml: &str) -> (String, Vec<u8>) {
        (name.to_string(), yaml.as_bytes().to_vec())
    }

    #[test]
    fn fingerprint_determinism_survives_double_canonicalization() {
        let d = Descriptor::parse(b"name: demo\ndependencies:\n  - python=3.10\n").unwrap();
        let once = blueprint_of(&d);
        let reparsed = Descriptor::parse(&canonical_yaml(&d)).unwrap();
        let twice = blueprint_of(&reparsed);
        assert_eq!(once, twice);
    }

    #[test]
    fn compose_final_blueprint_is_deterministic_across_key_order() {
        let files_a = vec![file(
            "env.yaml",
            "# leading comment\nname: demo\nchannels: [conda-forge]\ndependencies:\n  - python=3.10\n",
        )];
        let files_b = vec![file(
            "env.yaml",
            "channels: [conda-forge]\ndependencies:\n  - python=3.10\nname: demo\n",
        )];
        let (_, bp_a) = compose_final_blueprint(&files_a).unwrap();
        let (_, bp_b) = compose_final_blueprint(&files_b).unwrap();
        assert_eq!(bp_a, bp_b);
        assert_eq!(bp_a.to_hex().len(), 16);
    }

    #[test]
    fn compose_final_blueprint_surfaces_merge_conflict_with_file_name() {
        let files = vec![
            file("base.yaml", "dependencies:\n  - numpy=1.24\n"),
            file("overlay.yaml", "dependencies:\n  - numpy=1.25\n"),
        ];
        let err = compose_final_blueprint(&files).unwrap_err();
        match err {
            ComposeError::Merge { file, .. } => assert_eq!(file, "overlay.yaml"),
            other => panic!("expected a merge error, got {other:?}"),
        }
    }

    #[test]
    fn compose_final_blueprint_surfaces_parse_error_with_file_name() {
        let files = vec![file("broken.yaml", "name: [unterminated\n")];
        let err = compose_final_blueprint(&files).unwrap_err();
        match err {
            ComposeError::Parse { file, .. } => assert_eq!(file, "broken.yaml"),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn compose_final_blueprint_rejects_empty_file_list() {
        let err = compose_final_blueprint(&[]).unwrap_err();
        assert!(matches!(err, ComposeError::NoDescriptors));
    }

    #[test]
    fn merge_associativity_under_canonical_form() {
        let a = Descriptor::parse(b"channels: [conda-forge]\ndependencies:\n  - python=3.10\n").unwrap();
        let b = Descriptor::parse(b"channels: [bioconda]\ndependencies:\n  - numpy=1.24\n").unwrap();
        let c = Descriptor::parse(b"name: demo\ndependencies:\n  - attrs\n").unwrap();

        let left_assoc = a.clone().merge(b.clone()).unwrap().merge(c.clone()).unwrap();
        let right_assoc = a.merge(b.merge(c).unwrap()).unwrap();

        assert_eq!(canonical_yaml(&left_assoc), canonical_yaml(&right_assoc));
    }
}
