//! Manifest and signature-file generation.
//!
//! The manifest lists every signed file with the digest of its content. The
//! signature file lists the digest of the whole serialized manifest and of each
//! manifest stanza. Both share the text model in [`text`].

pub mod builder;
pub mod signature_file;
pub mod text;

pub use builder::{is_signature_metadata, signable_files, ManifestBuilder};
pub use signature_file::{SignatureFile, SignatureFileBuilder};
pub use text::{stanza_bytes, Attributes, Manifest};

/// Metadata directory holding the signing artifacts, relative to the signed root.
pub const META_INF: &str = "META-INF";

/// Manifest file name inside [`META_INF`].
pub const MANIFEST_NAME: &str = "MANIFEST.MF";

/// Signature file name inside [`META_INF`].
pub const SIGNATURE_FILE_NAME: &str = "CERT.SF";

/// Signature block base name; the extension follows the key type (`CERT.RSA`, `CERT.EC`).
pub const SIGNATURE_BLOCK_STEM: &str = "CERT";

/// Extensions a signature block next to [`SIGNATURE_FILE_NAME`] may carry.
pub const SIGNATURE_BLOCK_EXTENSIONS: [&str; 3] = ["RSA", "EC", "DSA"];

pub const MANIFEST_VERSION: &str = "Manifest-Version";
pub const SIGNATURE_VERSION: &str = "Signature-Version";
pub const CREATED_BY: &str = "Created-By";

/// Value of both version attributes.
pub const VERSION_VALUE: &str = "1.0";

/// Provenance written to `Created-By`, kept identical to the legacy AOSP signer.
pub const CREATED_BY_VALUE: &str = "1.0 (Android SignApk)";

/// Main section with the given version attribute followed by the provenance marker.
pub(crate) fn main_attributes(version_key: &str) -> Attributes {
    let mut main = Attributes::new();
    main.insert(version_key, VERSION_VALUE);
    main.insert(CREATED_BY, CREATED_BY_VALUE);
    main
}
