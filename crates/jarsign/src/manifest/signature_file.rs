//! Signature file (`CERT.SF`) derivation.

use crate::crypto::digest::encode_digest;
use crate::crypto::DigestAlgorithm;
use crate::manifest::{main_attributes, stanza_bytes, Attributes, Manifest, SIGNATURE_VERSION};
use crate::Result;

/// A derived signature file together with the exact manifest bytes it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFile {
    manifest_bytes: Vec<u8>,
    document: Manifest,
    bytes: Vec<u8>,
}

impl SignatureFile {
    /// The serialized manifest; this is what must be written as `MANIFEST.MF`.
    pub fn manifest_bytes(&self) -> &[u8] {
        &self.manifest_bytes
    }

    /// Parsed view of the signature file attributes.
    pub fn attributes(&self) -> &Manifest {
        &self.document
    }

    /// The serialized signature file; this is what gets signed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.manifest_bytes, self.bytes)
    }
}

/// Derives the signature file for one manifest.
///
/// The main section carries the digest of the whole serialized manifest; every
/// manifest entry gets a section with the digest of its serialized stanza.
pub struct SignatureFileBuilder<'a> {
    manifest: &'a Manifest,
    digest: DigestAlgorithm,
}

impl<'a> SignatureFileBuilder<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self {
            manifest,
            digest: DigestAlgorithm::default(),
        }
    }

    pub fn digest_algorithm(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn build(self) -> Result<SignatureFile> {
        let manifest_bytes = self.manifest.to_bytes();

        let mut main = main_attributes(SIGNATURE_VERSION);
        main.insert(
            self.digest.manifest_attribute(),
            self.digest.digest_base64(&manifest_bytes),
        );

        let attribute = self.digest.entry_attribute();
        let mut document = Manifest::with_main_attributes(main);
        for (name, attrs) in self.manifest.entries() {
            let stanza = stanza_bytes(name, attrs);
            let mut entry = Attributes::new();
            entry.insert(attribute.as_str(), encode_digest(&self.digest.digest(&stanza)));
            document.insert_entry(name.as_str(), entry)?;
        }

        let bytes = document.to_bytes();
        Ok(SignatureFile {
            manifest_bytes,
            document,
            bytes,
        })
    }
}
