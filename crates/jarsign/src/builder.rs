//! JarSign builder API
//!
//! Provides a builder pattern interface for signing directory trees with
//! JAR-style `META-INF` signatures.

use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::crypto::{DigestAlgorithm, SigningCredentials};
use crate::sign::{SignOptions, SignOrchestrator, SignedArtifacts};
use crate::{Error, Result};

/// Directory signing tool with builder pattern API.
///
/// # Example
///
/// ```no_run
/// use jarsign::{DigestAlgorithm, JarSign};
///
/// let artifacts = JarSign::new()
///     .certificate("testkey.x509.pem")
///     .private_key("testkey.pk8")
///     .digest_algorithm(DigestAlgorithm::Sha1)
///     .sign_directory("update/")?;
/// println!("{}", artifacts.signature_block_path.display());
/// # Ok::<(), jarsign::Error>(())
/// ```
#[derive(Clone)]
pub struct JarSign {
    certificate: Option<PathBuf>,
    private_key: Option<PathBuf>,
    pkcs12: Option<PathBuf>,
    password: Option<SecretString>,
    digest: DigestAlgorithm,
    threads: Option<usize>,
}

impl JarSign {
    /// Create a new JarSign builder.
    pub fn new() -> Self {
        Self {
            certificate: None,
            private_key: None,
            pkcs12: None,
            password: None,
            digest: DigestAlgorithm::default(),
            threads: None,
        }
    }

    /// Set certificate file path (PEM or DER format).
    ///
    /// Use together with `private_key()`.
    /// Alternatively, use `pkcs12()` for PKCS#12 files that contain both.
    pub fn certificate(mut self, path: impl AsRef<Path>) -> Self {
        self.certificate = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set private key file path (PKCS#8 or PKCS#1, PEM or DER format).
    ///
    /// Encrypted PKCS#8 keys need `password()`.
    pub fn private_key(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set PKCS#12 file path (.p12 format).
    ///
    /// PKCS#12 files contain both the certificate and private key.
    /// Use `password()` to set the decryption password.
    pub fn pkcs12(mut self, path: impl AsRef<Path>) -> Self {
        self.pkcs12 = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set password for private key or PKCS#12 file.
    ///
    /// The password is stored securely and will be zeroized when dropped.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Set the digest algorithm. Defaults to SHA-1.
    pub fn digest_algorithm(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Set the number of threads used to hash files.
    ///
    /// Defaults to the global rayon pool.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if:
    /// - Both PKCS#12 and PEM credentials are specified
    /// - Neither PKCS#12 nor PEM credentials are specified
    /// - Only one of certificate/private_key is specified (need both)
    /// - The thread count is zero
    pub fn validate(&self) -> Result<()> {
        let has_p12 = self.pkcs12.is_some();
        let has_pem = self.certificate.is_some() || self.private_key.is_some();

        if has_p12 && has_pem {
            return Err(Error::Config(
                "Cannot specify both PKCS#12 and PEM certificate/key".into(),
            ));
        }

        if !has_p12 && !has_pem {
            return Err(Error::MissingCredentials(
                "Must specify either PKCS#12 or certificate/key pair".into(),
            ));
        }

        if has_pem && (self.certificate.is_none() || self.private_key.is_none()) {
            return Err(Error::MissingCredentials(
                "Both certificate and private key must be specified".into(),
            ));
        }

        if self.threads == Some(0) {
            return Err(Error::Config("Thread count must be at least 1".into()));
        }

        Ok(())
    }

    /// Load signing credentials from configured paths.
    ///
    /// Uses PKCS#12 if configured, otherwise uses separate certificate and private key.
    pub fn load_credentials(&self) -> Result<SigningCredentials> {
        self.validate()?;

        let password = self.password.as_ref().map(|p| p.expose_secret().as_str());

        if let Some(ref p12) = self.pkcs12 {
            return SigningCredentials::from_p12(&read_key_file(p12)?, password.unwrap_or(""));
        }

        let cert = self
            .certificate
            .as_ref()
            .ok_or_else(|| Error::MissingCredentials("No certificate configured".into()))?;
        let key = self
            .private_key
            .as_ref()
            .ok_or_else(|| Error::MissingCredentials("No private key configured".into()))?;

        SigningCredentials::from_pem(&read_key_file(cert)?, &read_key_file(key)?, password)
    }

    fn options(&self) -> SignOptions {
        SignOptions {
            digest: self.digest,
            threads: self.threads,
        }
    }

    /// Sign every file under `root`.
    ///
    /// Writes `META-INF/MANIFEST.MF`, `META-INF/CERT.SF` and the signature
    /// block (`CERT.RSA` or `CERT.EC`). Existing signature metadata under
    /// `META-INF` is not signed and is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Credentials cannot be loaded
    /// - Any file under `root` cannot be read
    /// - An artifact cannot be written
    pub fn sign_directory(&self, root: impl AsRef<Path>) -> Result<SignedArtifacts> {
        let credentials = self.load_credentials()?;
        SignOrchestrator::new(&credentials, self.options()).sign_directory(root)
    }

    /// Sign a caller-supplied list of relative paths under `root`.
    pub fn sign_files<I, S>(&self, root: impl AsRef<Path>, paths: I) -> Result<SignedArtifacts>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials = self.load_credentials()?;
        SignOrchestrator::new(&credentials, self.options()).sign_paths(root, paths)
    }
}

impl Default for JarSign {
    fn default() -> Self {
        Self::new()
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| Error::KeyMaterial(format!("Failed to read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn data(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
    }

    #[test]
    fn test_jarsign_builder_default() {
        let jarsign = JarSign::default();
        assert!(jarsign.certificate.is_none());
        assert!(jarsign.private_key.is_none());
        assert!(jarsign.pkcs12.is_none());
        assert!(jarsign.password.is_none());
        assert_eq!(jarsign.digest, DigestAlgorithm::Sha1);
        assert!(jarsign.threads.is_none());
    }

    #[test]
    fn test_jarsign_builder_chain() {
        let jarsign = JarSign::new()
            .certificate("/path/to/cert.pem")
            .private_key("/path/to/key.pem")
            .password("secret")
            .digest_algorithm(DigestAlgorithm::Sha256)
            .threads(4);

        assert_eq!(jarsign.certificate, Some(PathBuf::from("/path/to/cert.pem")));
        assert_eq!(jarsign.private_key, Some(PathBuf::from("/path/to/key.pem")));
        assert_eq!(jarsign.password.as_ref().unwrap().expose_secret(), "secret");
        assert_eq!(jarsign.digest, DigestAlgorithm::Sha256);
        assert_eq!(jarsign.threads, Some(4));
    }

    #[test]
    fn test_jarsign_builder_pkcs12() {
        let jarsign = JarSign::new().pkcs12("/path/to/cert.p12").password("p12secret");

        assert_eq!(jarsign.pkcs12, Some(PathBuf::from("/path/to/cert.p12")));
        assert_eq!(jarsign.password.as_ref().unwrap().expose_secret(), "p12secret");
        assert!(jarsign.validate().is_ok());
    }

    #[test]
    fn test_sign_directory_requires_credentials() {
        let result = JarSign::new().sign_directory("payload");
        match result {
            Err(Error::MissingCredentials(msg)) => {
                assert!(msg.contains("Must specify either PKCS#12 or certificate/key pair"))
            }
            other => panic!("expected MissingCredentials, got {:?}", other.map(|a| a.stage)),
        }
    }

    #[test]
    fn test_validate_both_p12_and_pem() {
        let jarsign = JarSign::new()
            .pkcs12("/path/to/cert.p12")
            .certificate("/path/to/cert.pem");

        match jarsign.validate() {
            Err(Error::Config(msg)) => assert!(msg.contains("Cannot specify both")),
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_missing_private_key() {
        let jarsign = JarSign::new().certificate("/path/to/cert.pem");

        match jarsign.validate() {
            Err(Error::MissingCredentials(msg)) => {
                assert!(msg.contains("Both certificate and private key"))
            }
            other => panic!("expected MissingCredentials, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_zero_threads() {
        let jarsign = JarSign::new()
            .certificate("/path/to/cert.pem")
            .private_key("/path/to/key.pem")
            .threads(0);

        assert!(matches!(jarsign.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unreadable_key_file_is_key_material_error() {
        let jarsign = JarSign::new()
            .certificate(data("rsa_cert.pem"))
            .private_key("/nonexistent/key.pem");

        match jarsign.load_credentials() {
            Err(Error::KeyMaterial(msg)) => assert!(msg.contains("/nonexistent/key.pem")),
            other => panic!("expected KeyMaterial, got {:?}", other.map(|c| c.subject())),
        }
    }

    #[test]
    fn test_load_pem_credentials() {
        let creds = JarSign::new()
            .certificate(data("rsa_cert.pem"))
            .private_key(data("rsa_key.pem"))
            .load_credentials()
            .unwrap();
        assert!(creds.subject().contains("Test RSA Signer"));
    }

    #[test]
    fn test_load_pkcs12_credentials() {
        let creds = JarSign::new()
            .pkcs12(data("rsa.p12"))
            .password("changeit")
            .load_credentials()
            .unwrap();
        assert!(creds.subject().contains("Test RSA Signer"));
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let result = JarSign::new()
            .certificate(data("rsa_cert.pem"))
            .private_key(data("other_rsa_key.pem"))
            .load_credentials();
        assert!(matches!(result, Err(Error::KeyMaterial(_))));
    }
}
