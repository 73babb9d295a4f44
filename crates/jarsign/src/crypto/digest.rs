//! Digest algorithms used for manifest and signature-file attributes.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use const_oid::ObjectIdentifier;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::{Error, Result};

/// Read buffer size for streaming file content through a [`Hasher`].
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithm for file, stanza and whole-manifest digests.
///
/// SHA-1 is the default because the legacy recovery verifiers only accept
/// `SHA1-Digest` attributes. SHA-256 is available for verifiers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Name used as the attribute prefix, e.g. `SHA1` in `SHA1-Digest`.
    pub fn jar_name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    /// Per-entry attribute key (`SHA1-Digest`).
    pub fn entry_attribute(&self) -> String {
        format!("{}-Digest", self.jar_name())
    }

    /// Signature-file main attribute key for the whole manifest (`SHA1-Digest-Manifest`).
    pub fn manifest_attribute(&self) -> String {
        format!("{}-Digest-Manifest", self.jar_name())
    }

    /// Output length in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }

    /// Algorithm identifier placed in the signature block.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => const_oid::db::rfc5912::ID_SHA_1,
            DigestAlgorithm::Sha256 => const_oid::db::rfc5912::ID_SHA_256,
        }
    }

    /// Map a block's digest algorithm identifier back to an algorithm.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [DigestAlgorithm::Sha1, DigestAlgorithm::Sha256]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Start an incremental digest.
    pub fn hasher(&self) -> Hasher {
        match self {
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Digest a complete buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest a complete buffer and render it as base64 attribute text.
    pub fn digest_base64(&self, data: &[u8]) -> String {
        encode_digest(&self.digest(data))
    }

    /// Stream a reader to its end through the digest.
    pub fn digest_reader(&self, mut reader: impl Read) -> std::io::Result<Vec<u8>> {
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.jar_name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(Error::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Incremental digest state.
#[derive(Clone)]
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// Standard base64 text encoding of a digest, as stored in attribute values.
pub fn encode_digest(digest: &[u8]) -> String {
    STANDARD.encode(digest)
}

/// Decode a base64 attribute value back into digest bytes.
pub fn decode_digest(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| Error::InvalidManifest(format!("Invalid base64 digest '{value}': {e}")))
}
