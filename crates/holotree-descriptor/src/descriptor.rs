//! The declarative environment descriptor: parsing, merging, and the two
//! solver-facing projections.

use crate::requirement::Requirement;
use indexmap::IndexMap;
use std::collections::HashSet;

/// A parsed environment descriptor. Mirrors the shape of an
/// `environment.yaml` manifest: an optional name, an ordered list of conda
/// channels, an ordered list of conda and pip requirements, and a list of
/// post-install command lines. Unknown top-level keys are preserved
/// verbatim in `extra` so merge and canonicalization never silently drop
/// caller data they don't understand.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Descriptor {
    /// The descriptor's preferred name, if any.
    pub name: Option<String>,
    /// Conda channels, left-first order, deduplicated by exact string.
    pub channels: Vec<String>,
    /// Conda package requirements, left-first order, deduplicated by
    /// package name.
    pub conda_requirements: Vec<Requirement>,
    /// Pip requirements (the `pip:` subsection), left-first order,
    /// deduplicated by package name.
    pub pip_requirements: Vec<Requirement>,
    /// Post-install command lines, executed in order inside the staged
    /// environment. Never deduplicated: repeating a command twice runs it
    /// twice.
    pub post_install: Vec<String>,
    /// Any top-level keys this crate does not model, preserved for
    /// round-tripping. Keyed by YAML key name.
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// An error produced while parsing a descriptor document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The document was not valid YAML, or did not match the recognized
    /// descriptor shape.
    #[error("failed to parse descriptor: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
}

/// An error produced while merging two descriptors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MergeError {
    /// Both sides pin an explicit, differing version of the same package.
    #[error("conflicting version pins for package '{package}': '{left}' vs '{right}'")]
    VersionConflict {
        /// The package name both descriptors disagree on.
        package: String,
        /// The left-hand descriptor's pinned version.
        left: String,
        /// The right-hand descriptor's pinned version.
        right: String,
    },
}

/// Raw on-disk shape of a descriptor document, matching the
/// `environment.yaml` format: a mapping with `name`, `channels`,
/// `dependencies` (conda requirement strings interleaved with a `pip:`
/// sub-mapping), and `post-install`. Deserializing through this DTO first
/// (rather than `Descriptor` directly) keeps the untagged `dependencies`
/// handling isolated from the merge/canonicalization logic.
#[derive(Debug, Default, serde::Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default, rename = "post-install")]
    post_install: Vec<String>,
    #[serde(flatten)]
    extra: IndexMap<String, serde_yaml::Value>,
}

#[derive(Debug)]
enum RawDependency {
    Spec(String),
    SubSection(String, Vec<String>),
}

impl<'de> serde::Deserialize<'de> for RawDependency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_untagged::UntaggedEnumVisitor::new()
            .string(|v| Ok(RawDependency::Spec(v.to_string())))
            .map(|map| {
                let map: IndexMap<String, Vec<String>> =
                    map.deserialize().map_err(serde_untagged::de::Error::custom)?;
                let mut iter = map.into_iter();
                let (key, values) = iter
                    .next()
                    .ok_or_else(|| serde_untagged::de::Error::custom("empty dependency sub-section"))?;
                if iter.next().is_some() {
                    return Err(serde_untagged::de::Error::custom(
                        "expected a sub-section mapping with a single key",
                    ));
                }
                Ok(RawDependency::SubSection(key, values))
            })
            .deserialize(deserializer)
    }
}

impl Descriptor {
    /// Parses a descriptor document from its raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Descriptor, ParseError> {
        let raw: RawDescriptor = serde_yaml::from_slice(bytes)?;
        let mut conda_requirements = Vec::new();
        let mut pip_requirements = Vec::new();

        for dep in raw.dependencies {
            match dep {
                RawDependency::Spec(spec) => conda_requirements.push(Requirement::parse(spec)),
                RawDependency::SubSection(name, specs) if name == "pip" => {
                    pip_requirements.extend(specs.into_iter().map(Requirement::parse));
                }
                RawDependency::SubSection(name, specs) => {
                    // Sub-sections for package managers this crate doesn't
                    // model (only `pip` is recognized) are preserved as
                    // conda-style requirement strings so they survive a
                    // round-trip instead of being silently dropped.
                    for spec in specs {
                        conda_requirements.push(Requirement::parse(format!("{name}:{spec}")));
                    }
                }
            }
        }

        Ok(Descriptor {
            name: raw.name,
            channels: dedup_preserve_order(raw.channels),
            conda_requirements: dedup_by_name_preserve_order(conda_requirements),
            pip_requirements: dedup_by_name_preserve_order(pip_requirements),
            post_install: raw.post_install,
            extra: raw.extra,
        })
    }

    /// Merges `self` (left) with `other` (right) per the holotree merge
    /// rules:
    ///
    /// - the name is `other`'s if present, else `self`'s
    /// - channels are unioned, left-first order, deduplicated by exact string
    /// - conda and pip requirements are unioned, left-first order,
    ///   deduplicated by package name; on a same-name conflict the
    ///   right-hand entry wins, *unless* both sides carry an explicit,
    ///   differing version pin, which is a [`MergeError`]
    /// - post-install commands are concatenated left-then-right, with no
    ///   deduplication
    /// - unknown top-level keys are unioned, right-hand value winning on a
    ///   colliding key
    pub fn merge(self, other: Descriptor) -> Result<Descriptor, MergeError> {
        let name = other.name.or(self.name);

        let mut channels = self.channels;
        for channel in other.channels {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        let conda_requirements = merge_requirements(self.conda_requirements, other.conda_requirements)?;
        let pip_requirements = merge_requirements(self.pip_requirements, other.pip_requirements)?;

        let mut post_install = self.post_install;
        post_install.extend(other.post_install);

        let mut extra = self.extra;
        for (key, value) in other.extra {
            extra.insert(key, value);
        }

        Ok(Descriptor {
            name,
            channels,
            conda_requirements,
            pip_requirements,
            post_install,
            extra,
        })
    }

    /// The "pure conda" projection consumed by the conda-style solver: a
    /// descriptor identical to this one but with the pip requirements
    /// stripped, since the solver subprocess has no concept of pip.
    pub fn conda_projection(&self) -> Descriptor {
        Descriptor {
            pip_requirements: Vec::new(),
            ..self.clone()
        }
    }

    /// The "requirements" projection consumed by the pip-style installer:
    /// just the pip requirement lines, in order, ready to be written to a
    /// `requirements.txt`-shaped file.
    pub fn pip_projection(&self) -> Vec<String> {
        self.pip_requirements
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }
}

/// Unions two requirement lists by package name, left-first order, with the
/// right-hand entry winning on a same-name collision unless both sides
/// carry differing explicit version pins.
fn merge_requirements(
    left: Vec<Requirement>,
    right: Vec<Requirement>,
) -> Result<Vec<Requirement>, MergeError> {
    let mut merged: IndexMap<String, Requirement> =
        left.into_iter().map(|r| (r.name().to_string(), r)).collect();

    for requirement in right {
        match merged.get(requirement.name()) {
            Some(existing) => {
                if let (Some(left_version), Some(right_version)) =
                    (existing.pinned_version(), requirement.pinned_version())
                {
                    if left_version != right_version {
                        return Err(MergeError::VersionConflict {
                            package: requirement.name().to_string(),
                            left: left_version.to_string(),
                            right: right_version.to_string(),
                        });
                    }
                }
                merged.insert(requirement.name().to_string(), requirement);
            }
            None => {
                merged.insert(requirement.name().to_string(), requirement);
            }
        }
    }

    Ok(merged.into_values().collect())
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

fn dedup_by_name_preserve_order(items: Vec<Requirement>) -> Vec<Requirement> {
    let mut by_name: IndexMap<String, Requirement> = IndexMap::new();
    for item in items {
        by_name.insert(item.name().to_string(), item);
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Descriptor {
        Descriptor::parse(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn parses_channels_dependencies_and_pip_subsection() {
        let d = parse(
            "name: demo\nchannels: [conda-forge]\ndependencies:\n  - python=3.10\n  - pip:\n      - requests==2.31.0\npost-install:\n  - echo hi\n",
        );
        assert_eq!(d.name.as_deref(), Some("demo"));
        assert_eq!(d.channels, vec!["conda-forge".to_string()]);
        assert_eq!(d.conda_requirements.len(), 1);
        assert_eq!(d.conda_requirements[0].name(), "python");
        assert_eq!(d.pip_requirements.len(), 1);
        assert_eq!(d.pip_requirements[0].name(), "requests");
        assert_eq!(d.post_install, vec!["echo hi".to_string()]);
    }

    #[test]
    fn empty_pip_section_is_empty_projection() {
        let d = parse("dependencies:\n  - python=3.10\n");
        assert!(d.pip_projection().is_empty());
    }

    #[test]
    fn merge_prefers_right_name_when_present() {
        let a = parse("name: a\n");
        let b = parse("name: b\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.name.as_deref(), Some("b"));
    }

    #[test]
    fn merge_keeps_left_name_when_right_has_none() {
        let a = parse("name: a\n");
        let b = parse("channels: []\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.name.as_deref(), Some("a"));
    }

    #[test]
    fn merge_unions_channels_left_first_without_duplicates() {
        let a = parse("channels: [conda-forge, bioconda]\n");
        let b = parse("channels: [bioconda, defaults]\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(
            merged.channels,
            vec!["conda-forge".to_string(), "bioconda".to_string(), "defaults".to_string()]
        );
    }

    #[test]
    fn merge_conflicting_versions_fails() {
        let a = parse("dependencies:\n  - numpy=1.24\n");
        let b = parse("dependencies:\n  - numpy=1.25\n");
        let err = a.merge(b).unwrap_err();
        assert_eq!(
            err,
            MergeError::VersionConflict {
                package: "numpy".to_string(),
                left: "1.24".to_string(),
                right: "1.25".to_string(),
            }
        );
    }

    #[test]
    fn merge_agreeing_versions_succeeds() {
        let a = parse("dependencies:\n  - numpy=1.24\n");
        let b = parse("dependencies:\n  - numpy=1.24\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.conda_requirements[0].pinned_version(), Some("1.24"));
    }

    #[test]
    fn merge_unversioned_duplicate_takes_right_hand_side() {
        // Documented open-question decision: an unversioned-vs-unversioned
        // collision on the same package name takes the right-hand entry.
        let a = parse("dependencies:\n  - requests\n");
        let b = parse("dependencies:\n  - requests\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.conda_requirements[0].as_str(), "requests");
    }

    #[test]
    fn merge_versioned_right_overrides_unversioned_left() {
        let a = parse("dependencies:\n  - numpy\n");
        let b = parse("dependencies:\n  - numpy=1.24\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.conda_requirements[0].pinned_version(), Some("1.24"));
    }

    #[test]
    fn merge_concatenates_post_install_left_then_right() {
        let a = parse("post-install:\n  - step-a\n");
        let b = parse("post-install:\n  - step-b\n");
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.post_install, vec!["step-a".to_string(), "step-b".to_string()]);
    }

    #[test]
    fn unknown_top_level_keys_survive_merge() {
        let a = parse("variables:\n  FOO: bar\n");
        let b = parse("name: b\n");
        let merged = a.merge(b).unwrap();
        assert!(merged.extra.contains_key("variables"));
    }
}
