//! Deterministic canonicalization of a [`Descriptor`] into the exact bytes
//! its blueprint fingerprint is computed over.

use crate::descriptor::Descriptor;
use serde_yaml::{Mapping, Value};

/// Renders `descriptor` to its canonical manifest form: keys in a fixed
/// order, deduplicated lists sorted for identity comparison, and a single
/// trailing newline. Two descriptors with the same canonical form are, by
/// definition, the same blueprint.
///
/// Channels and requirement lists are sorted here (even though merge
/// preserves left-first insertion order) so that the two different merge
/// trees `(a·b)·c` and `a·(b·c)` canonicalize identically whenever they
/// converge to the same final set — associativity under canonical form
/// depends on this.
pub fn canonical_yaml(descriptor: &Descriptor) -> Vec<u8> {
    let mut root = Mapping::new();

    if let Some(name) = &descriptor.name {
        root.insert(Value::from("name"), Value::from(name.as_str()));
    }

    let mut channels = descriptor.channels.clone();
    channels.sort();
    root.insert(
        Value::from("channels"),
        Value::Sequence(channels.into_iter().map(Value::from).collect()),
    );

    let mut conda = descriptor
        .conda_requirements
        .iter()
        .map(|r| r.as_str().to_string())
        .collect::<Vec<_>>();
    conda.sort();
    let mut dependencies: Vec<Value> = conda.into_iter().map(Value::from).collect();

    if !descriptor.pip_requirements.is_empty() {
        let mut pip = descriptor
            .pip_requirements
            .iter()
            .map(|r| r.as_str().to_string())
            .collect::<Vec<_>>();
        pip.sort();
        let mut pip_section = Mapping::new();
        pip_section.insert(
            Value::from("pip"),
            Value::Sequence(pip.into_iter().map(Value::from).collect()),
        );
        dependencies.push(Value::Mapping(pip_section));
    }
    root.insert(Value::from("dependencies"), Value::Sequence(dependencies));

    // Post-install is an ordered sequence of commands, not an identity set:
    // it is never sorted or deduplicated.
    root.insert(
        Value::from("post-install"),
        Value::Sequence(
            descriptor
                .post_install
                .iter()
                .map(|s| Value::from(s.as_str()))
                .collect(),
        ),
    );

    let mut extra_keys: Vec<&String> = descriptor.extra.keys().collect();
    extra_keys.sort();
    for key in extra_keys {
        root.insert(Value::from(key.as_str()), descriptor.extra[key].clone());
    }

    let rendered = serde_yaml::to_string(&Value::Mapping(root))
        .expect("canonical descriptor mapping always serializes");
    let trimmed = rendered.trim_end_matches('\n');
    let mut bytes = trimmed.as_bytes().to_vec();
    bytes.push(b'\n');
    bytes
}
