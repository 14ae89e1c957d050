#![deny(missing_docs)]

//! Hashing primitives for the holotree environment cache.
//!
//! Two distinct algorithms are used, deliberately:
//!
//! - [`Fingerprint`]: a short, fast, **non security-critical** SipHash-2-4
//!   digest used as the blueprint identity and other cheap stable
//!   identifiers (e.g. [`user_home_identity`]).
//! - [`Sha256Hash`] (via [`compute_bytes_digest`]/[`compute_file_digest`]): a
//!   strong digest used to address library objects and to compute the
//!   pristine digest of a whole directory tree.
//!
//! SipHash was chosen over a cryptographic hash for blueprints because
//! fingerprints must be short and fast to compute on every materialize call,
//! and are never used as a security boundary.

use digest::{Digest, Output};
use siphasher::sip128::{Hash128, Hasher128, SipHasher24};
use std::fmt;
use std::io::{Read, Write};
use std::{fs::File, path::Path};

pub use sha2::Sha256;

/// A type alias for the output of a SHA-256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// The two fixed 128-bit keys used for every [`Fingerprint`] computed by this
/// crate. Changing these would silently invalidate every blueprint and
/// catalog ever produced, so they are frozen constants rather than
/// configuration.
const FINGERPRINT_KEY0: u64 = 0x686f_6c6f_7472_6565;
const FINGERPRINT_KEY1: u64 = 0x626c_7565_7072_696e;

/// A 16-hex-digit SipHash-2-4 fingerprint.
///
/// Fingerprint derivation is a pure function of its input bytes: equal input
/// produces an equal fingerprint, deterministically, across processes and
/// platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Computes the fingerprint of a byte slice.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = SipHasher24::new_with_keys(FINGERPRINT_KEY0, FINGERPRINT_KEY1);
        hasher.write(bytes.as_ref());
        let Hash128 { h1, .. } = hasher.finish128();
        Fingerprint(h1)
    }

    /// Renders the fingerprint as a 16-hex-digit lowercase string.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// Renders only the first `len` hex digits of the fingerprint. Used for
    /// short, collision-tolerant identifiers such as the 7-hex user-home
    /// identity.
    pub fn to_hex_prefix(self, len: usize) -> String {
        let full = self.to_hex();
        full[..len.min(full.len())].to_string()
    }

    /// Parses a 16-hex-digit string previously produced by [`Fingerprint::to_hex`]
    /// back into a fingerprint, e.g. when recovering a blueprint identity from
    /// a catalog filename. Returns `None` if `hex` is not exactly 16 hex digits.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 16 {
            return None;
        }
        let mut value: u64 = 0;
        for c in hex.chars() {
            value = (value << 4) | u64::from(c.to_digit(16)?);
        }
        Some(Fingerprint(value))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The 16-hex-digit fingerprint of a canonicalized descriptor; the holotree
/// cache's primary key. Blueprint derivation is a pure function of the
/// canonical bytes it was computed from: equal canonical form implies equal
/// blueprint.
///
/// This type lives here (rather than in `holotree-descriptor`, which owns
/// *deriving* a blueprint from a descriptor) so that the library, catalog,
/// and space crates can key their data by blueprint without depending on
/// the heavier descriptor-parsing crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Blueprint(Fingerprint);

impl Blueprint {
    /// Wraps an already-computed fingerprint as a blueprint identity.
    pub fn from_fingerprint(fingerprint: Fingerprint) -> Self {
        Blueprint(fingerprint)
    }

    /// Renders the blueprint as its 16-hex-digit string, the form used in
    /// catalog filenames and space directory names.
    pub fn to_hex(self) -> String {
        self.0.to_hex()
    }

    /// Parses a blueprint back from the 16-hex-digit string produced by
    /// [`Blueprint::to_hex`], e.g. when recovering it from a catalog
    /// filename or a space directory name.
    pub fn from_hex(hex: &str) -> Option<Self> {
        Fingerprint::from_hex(hex).map(Blueprint)
    }
}

impl fmt::Display for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

/// Computes the 7-hex-digit SipHash identity of the OS user's home directory,
/// as named in the materializer's space-directory layout (`§4.8`). Different
/// OS users on one machine get different spaces for the same blueprint
/// without name collision.
pub fn user_home_identity(home: &Path) -> String {
    Fingerprint::of(home.to_string_lossy().as_bytes()).to_hex_prefix(7)
}

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default + Write>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hex digest string into bytes.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// Renders a [`Sha256Hash`] as its lowercase hex string, sharded as
/// `(first two hex chars, remaining hex chars)`. This matches the one-level
/// library sharding of `library/<xx>/<rest>` described in the data model.
pub fn shard_hex(hash: &Sha256Hash) -> (String, String) {
    let full = format!("{hash:x}");
    (full[0..2].to_string(), full[2..].to_string())
}

/// A [`Write`] wrapper that hashes every byte written to it on the fly,
/// used by the library's ingest path to compute an object's address while
/// streaming it into a temp file.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Default::default(),
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Consumes this instance, returning the wrapped writer and the digest
    /// of everything written through it.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A [`Read`] wrapper that hashes every byte read from it on the fly.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Constructs a new instance from a reader and a new (empty) hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Default::default(),
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Consumes this instance, returning the wrapped reader and the digest
    /// of everything read through it.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        Ok(bytes_read)
    }
}

/// Computes the pristine tree digest over an already-sorted, already-filtered
/// sequence of `(relative_path, unix_mode, content_digest)` entries, per the
/// deterministic pre-order walk described in `§4.1`. The walk itself lives in
/// `holotree_fs::walk_ordered`; this function only folds the resulting
/// stream into a single [`Sha256Hash`].
pub fn tree_digest<'a>(
    entries: impl IntoIterator<Item = (&'a str, u32, &'a Sha256Hash)>,
) -> Sha256Hash {
    let mut hasher = Sha256::new();
    for (path, mode, content_hash) in entries {
        hasher.update(path.as_bytes());
        hasher.update(0u8.to_le_bytes());
        hasher.update(mode.to_le_bytes());
        hasher.update(content_hash.as_slice());
    }
    hasher.finalize()
}
