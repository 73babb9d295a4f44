//! JAR-style signing of directory trees.
//!
//! Produces `META-INF/MANIFEST.MF`, `META-INF/CERT.SF` and a PKCS#7 signature
//! block (`CERT.RSA` or `CERT.EC`) over the files of a directory, in the format
//! checked by legacy JAR and Android recovery verifiers, and verifies such
//! signatures.

pub mod builder;
pub mod crypto;
pub mod error;
pub mod manifest;
pub mod sign;
pub mod verify;

pub use builder::JarSign;
pub use crypto::{DigestAlgorithm, SigningCredentials, SigningKey};
pub use error::Error;
pub use manifest::{Manifest, ManifestBuilder, SignatureFile, SignatureFileBuilder};
pub use sign::{SignOptions, SignOrchestrator, SignStage, SignedArtifacts};
pub use verify::{verify_directory, VerificationReport, Verifier};

pub type Result<T> = std::result::Result<T, Error>;
