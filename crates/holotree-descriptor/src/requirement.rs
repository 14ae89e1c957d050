//! Package requirement parsing shared by the conda and pip requirement
//! lists. Both are "a package name plus an optional version constraint",
//! just spelled with different operators, so one small grammar backs both.

use std::fmt;

/// The operators recognized when splitting a requirement line into a
/// package name and a version constraint. Only `=`/`==` round-trip through
/// merge's version-conflict comparison; the others are preserved verbatim
/// in the raw text but treated as "no explicit pin" for merge purposes,
/// since the core does not model full conda/pip constraint grammars (that
/// belongs to the external solver).
const PIN_OPERATORS: &[&str] = &["==", "="];

/// A single requirement line, e.g. `numpy`, `numpy=1.24`, or a pip line
/// like `requests==2.31.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    raw: String,
    name: String,
    pinned_version: Option<String>,
}

impl Requirement {
    /// Parses a single requirement line into its package name and, if
    /// present, an explicit `=`/`==` version pin.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();

        for op in PIN_OPERATORS {
            if let Some((name, version)) = trimmed.split_once(op) {
                // A conda match-spec may carry a third `=build` component
                // (`name=version=build`); keep only the version for pin
                // comparison and leave the rest in `raw`.
                let version = version.split('=').next().unwrap_or(version);
                return Requirement {
                    raw: trimmed.to_string(),
                    name: name.trim().to_string(),
                    pinned_version: Some(version.trim().to_string()),
                };
            }
        }

        Requirement {
            raw: trimmed.to_string(),
            name: requirement_name_only(trimmed),
            pinned_version: None,
        }
    }

    /// The package name this requirement refers to, used as the merge
    /// identity key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The explicit version pin, if this requirement carries one.
    pub fn pinned_version(&self) -> Option<&str> {
        self.pinned_version.as_deref()
    }

    /// The original requirement text, verbatim.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Extracts a bare package name from a requirement with no recognized pin
/// operator, stripping a pip-style extras marker (`pkg[extra]`) if present.
fn requirement_name_only(raw: &str) -> String {
    raw.split(['[', '<', '>', '!', '~', ' '])
        .next()
        .unwrap_or(raw)
        .trim()
        .to_string()
}
