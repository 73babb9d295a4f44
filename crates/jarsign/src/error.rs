//! Error types for jarsign operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure of a
//! signing or verification run: key material, reading the signed files,
//! encoding, writing the artifacts, and checking them back.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for jarsign operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Every variant is fatal for the run that produced it; nothing is retried internally.
///
/// # Examples
///
/// ```no_run
/// use jarsign::{Error, JarSign};
///
/// let result = JarSign::new()
///     .certificate("cert.pem")
///     .private_key("key.pem")
///     .sign_directory("payload/");
/// match result {
///     Ok(artifacts) => println!("Signed {} files", artifacts.entry_count),
///     Err(Error::FileRead { path, .. }) => eprintln!("Cannot read {}", path.display()),
///     Err(e) => eprintln!("Signing failed: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// Certificate or private key could not be loaded.
    ///
    /// Raised before any output is produced: unparseable PEM/DER/PKCS#12 data,
    /// a wrong password, an unsupported key type, or a private key that does not
    /// belong to the certificate.
    #[error("Invalid key material: {0}")]
    KeyMaterial(String),

    /// A file to be signed could not be fully read.
    ///
    /// Unreadable files are never skipped; the whole run aborts.
    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        /// Path of the offending file or directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The digest algorithm name is not one this crate implements.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature block assembly, DER encoding, or the signature primitive failed.
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// An output artifact could not be written.
    ///
    /// Artifacts written by earlier stages of the same run are left on disk.
    #[error("Failed to write {}: {source}", path.display())]
    IoWrite {
        /// Path of the artifact (or metadata directory) being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A manifest or signature file could not be parsed.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A digest or signature did not match during verification.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Required credentials not configured.
    ///
    /// Signing was attempted without a certificate/key pair or PKCS#12 file.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Invalid builder configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed outside of the signed tree (e.g. reading key files).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn file_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::IoWrite {
            path: path.into(),
            source,
        }
    }
}

impl From<der::Error> for Error {
    fn from(e: der::Error) -> Self {
        Self::Encoding(format!("DER error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_names_path() {
        let err = Error::file_read(
            "payload/a.txt",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("payload/a.txt"), "{msg}");
        assert!(msg.contains("denied"), "{msg}");
    }

    #[test]
    fn test_io_write_keeps_source() {
        use std::error::Error as _;

        let err = Error::io_write("META-INF/CERT.SF", io::Error::other("disk full"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("META-INF/CERT.SF"));
    }
}
