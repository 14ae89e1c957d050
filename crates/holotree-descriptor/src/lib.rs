#![deny(missing_docs)]

//! Descriptor model and blueprint derivation for the holotree environment
//! cache: parsing declarative environment manifests, merging them
//! left-to-right, canonicalizing the result, and fingerprinting the
//! canonical form into a [`Blueprint`].
//!
//! No I/O side effects happen anywhere in this crate beyond
//! [`Descriptor::parse`] taking already-read bytes: every operation here is
//! a pure function, by design, so blueprint derivation can be tested and
//! reasoned about without a filesystem.

mod blueprint;
mod canonical;
mod descriptor;
mod requirement;

pub use blueprint::{blueprint_of, compose_final_blueprint, Blueprint, ComposeError};
pub use canonical::canonical_yaml;
pub use descriptor::{Descriptor, MergeError, ParseError};
pub use requirement::Requirement;
