//! Certificate and private key handling for signing.
//!
//! This module loads signing credentials from PEM or DER encoded files or
//! PKCS#12 (.p12) containers. It supports RSA and ECDSA (P-256) private keys,
//! and performs the asymmetric signature over the signature file.
//!
//! # Supported Formats
//!
//! - **PEM / DER**: Separate certificate and private key (PKCS#8, optionally
//!   encrypted, or PKCS#1 for RSA)
//! - **PKCS#12**: Combined certificate and key in a password-protected container
//!
//! # Examples
//!
//! ```no_run
//! use jarsign::crypto::SigningCredentials;
//!
//! let cert = std::fs::read("certificate.pem")?;
//! let key = std::fs::read("private_key.pem")?;
//! let credentials = SigningCredentials::from_pem(&cert, &key, None)?;
//!
//! let p12_data = std::fs::read("certificate.p12")?;
//! let credentials = SigningCredentials::from_p12(&p12_data, "password")?;
//! # Ok::<(), jarsign::Error>(())
//! ```

use const_oid::ObjectIdentifier;
use der::{Any, Decode, DecodePem, Encode};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey as EcdsaSigningKey, VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::crypto::DigestAlgorithm;
use crate::{Error, Result};

/// ecdsa-with-SHA1 (1.2.840.10045.4.1)
pub const ECDSA_WITH_SHA_1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.1");

/// DER encoding of an ASN.1 NULL, used as algorithm parameters for SHA and RSA identifiers.
const DER_NULL: &[u8] = &[0x05, 0x00];

/// Private key for signing, supporting multiple key types.
///
/// # Variants
///
/// * [`Rsa`](SigningKey::Rsa) - RSA private key, PKCS#1 v1.5 signatures
/// * [`Ecdsa`](SigningKey::Ecdsa) - ECDSA P-256 private key
#[allow(clippy::large_enum_variant)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ecdsa(EcdsaSigningKey),
}

impl SigningKey {
    /// Parse a private key from PEM or DER.
    ///
    /// Tries PKCS#8 (encrypted when a password is given) for RSA and ECDSA,
    /// then PKCS#1 for unencrypted RSA keys.
    pub fn from_bytes(data: &[u8], password: Option<&str>) -> Result<Self> {
        if is_pem(data) {
            let text = std::str::from_utf8(data)
                .map_err(|e| Error::KeyMaterial(format!("Invalid UTF-8 in key PEM: {e}")))?;
            Self::from_pem(text, password)
        } else {
            Self::from_der(data, password)
        }
    }

    fn from_pem(text: &str, password: Option<&str>) -> Result<Self> {
        if let Some(pass) = password {
            if let Ok(key) = RsaPrivateKey::from_pkcs8_encrypted_pem(text, pass.as_bytes()) {
                return Ok(SigningKey::Rsa(key));
            }
            if let Ok(key) = EcdsaSigningKey::from_pkcs8_encrypted_pem(text, pass.as_bytes()) {
                return Ok(SigningKey::Ecdsa(key));
            }
        }

        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(text) {
            Ok(SigningKey::Rsa(key))
        } else if let Ok(key) = EcdsaSigningKey::from_pkcs8_pem(text) {
            Ok(SigningKey::Ecdsa(key))
        } else if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(text) {
            Ok(SigningKey::Rsa(key))
        } else {
            Err(Error::KeyMaterial(
                "Failed to parse private key as RSA or ECDSA (wrong password?)".into(),
            ))
        }
    }

    fn from_der(der: &[u8], password: Option<&str>) -> Result<Self> {
        if let Some(pass) = password {
            if let Ok(key) = RsaPrivateKey::from_pkcs8_encrypted_der(der, pass.as_bytes()) {
                return Ok(SigningKey::Rsa(key));
            }
            if let Ok(key) = EcdsaSigningKey::from_pkcs8_encrypted_der(der, pass.as_bytes()) {
                return Ok(SigningKey::Ecdsa(key));
            }
        }

        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            Ok(SigningKey::Rsa(key))
        } else if let Ok(key) = EcdsaSigningKey::from_pkcs8_der(der) {
            Ok(SigningKey::Ecdsa(key))
        } else if let Ok(key) = RsaPrivateKey::from_pkcs1_der(der) {
            Ok(SigningKey::Rsa(key))
        } else {
            Err(Error::KeyMaterial(
                "Failed to parse private key as RSA or ECDSA (wrong password?)".into(),
            ))
        }
    }

    /// Extension of the signature block file, `RSA` or `EC`.
    pub fn block_extension(&self) -> &'static str {
        match self {
            SigningKey::Rsa(_) => "RSA",
            SigningKey::Ecdsa(_) => "EC",
        }
    }

    /// Signature algorithm identifier stored in the signer info.
    ///
    /// RSA uses the bare `rsaEncryption` identifier the recovery verifier
    /// expects; ECDSA names the digest in the identifier.
    pub fn signature_algorithm(&self, digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
        match self {
            SigningKey::Rsa(_) => Ok(AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::RSA_ENCRYPTION,
                parameters: Some(Any::from_der(DER_NULL)?),
            }),
            SigningKey::Ecdsa(_) => Ok(AlgorithmIdentifierOwned {
                oid: ecdsa_signature_oid(digest),
                parameters: None,
            }),
        }
    }

    /// Sign `data` with the given digest algorithm.
    ///
    /// Both schemes are deterministic: PKCS#1 v1.5 for RSA, RFC 6979 nonces for ECDSA.
    pub fn sign(&self, data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
        let hashed = digest.digest(data);

        match self {
            SigningKey::Rsa(key) => key
                .sign(rsa_scheme(digest), &hashed)
                .map_err(|e| Error::Encoding(format!("RSA signing with {digest} failed: {e}"))),
            SigningKey::Ecdsa(key) => {
                let signature: EcdsaSignature = key.sign_prehash(&hashed).map_err(|e| {
                    Error::Encoding(format!("ECDSA signing with {digest} failed: {e}"))
                })?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    fn public_key(&self) -> PublicKey {
        match self {
            SigningKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            SigningKey::Ecdsa(key) => PublicKey::Ecdsa(*key.verifying_key()),
        }
    }
}

/// Public key extracted from a certificate, used to check signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ecdsa(VerifyingKey),
}

impl PublicKey {
    /// Decode the subject public key of a certificate.
    pub fn from_certificate(cert: &Certificate) -> Result<Self> {
        let spki = cert.tbs_certificate.subject_public_key_info.to_der()?;

        if let Ok(key) = RsaPublicKey::from_public_key_der(&spki) {
            Ok(PublicKey::Rsa(key))
        } else if let Ok(key) = VerifyingKey::from_public_key_der(&spki) {
            Ok(PublicKey::Ecdsa(key))
        } else {
            Err(Error::KeyMaterial(format!(
                "Unsupported certificate public key algorithm {}",
                cert.tbs_certificate.subject_public_key_info.algorithm.oid
            )))
        }
    }

    /// Verify `signature` over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8], digest: DigestAlgorithm) -> Result<()> {
        let hashed = digest.digest(data);

        match self {
            PublicKey::Rsa(key) => key
                .verify(rsa_scheme(digest), &hashed, signature)
                .map_err(|e| Error::Verification(format!("RSA signature mismatch: {e}"))),
            PublicKey::Ecdsa(key) => {
                let signature = EcdsaSignature::from_der(signature).map_err(|e| {
                    Error::Verification(format!("Malformed ECDSA signature: {e}"))
                })?;
                key.verify_prehash(&hashed, &signature)
                    .map_err(|e| Error::Verification(format!("ECDSA signature mismatch: {e}")))
            }
        }
    }
}

fn rsa_scheme(digest: DigestAlgorithm) -> Pkcs1v15Sign {
    match digest {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    }
}

pub(crate) fn ecdsa_signature_oid(digest: DigestAlgorithm) -> ObjectIdentifier {
    match digest {
        DigestAlgorithm::Sha1 => ECDSA_WITH_SHA_1,
        DigestAlgorithm::Sha256 => const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
    }
}

/// Algorithm identifier for a digest, with the NULL parameters legacy signers emit.
pub fn digest_algorithm_identifier(digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
    Ok(AlgorithmIdentifierOwned {
        oid: digest.oid(),
        parameters: Some(Any::from_der(DER_NULL)?),
    })
}

/// Signing credentials: the certificate embedded in the block and its private key.
///
/// The private key should be treated as sensitive data.
/// Avoid logging or exposing [`SigningCredentials`] instances.
pub struct SigningCredentials {
    /// X.509 signing certificate; its issuer and serial number identify the signer.
    pub certificate: Certificate,

    /// Private key corresponding to the certificate's public key.
    pub signing_key: SigningKey,
}

impl SigningCredentials {
    /// Load credentials from a certificate and a private key.
    ///
    /// Both inputs may be PEM or DER. The private key may be PKCS#8
    /// (encrypted when `password` is given) or PKCS#1 RSA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyMaterial`] if:
    /// - The certificate is malformed
    /// - The private key cannot be parsed, or the password is wrong
    /// - The private key does not belong to the certificate
    pub fn from_pem(cert_data: &[u8], key_data: &[u8], password: Option<&str>) -> Result<Self> {
        let certificate = parse_certificate(cert_data)?;
        let signing_key = SigningKey::from_bytes(key_data, password)?;
        Self::new(certificate, signing_key)
    }

    /// Load credentials from a PKCS#12 (.p12) container.
    ///
    /// The first certificate in the container must belong to the first key.
    ///
    /// # Security
    ///
    /// The password is used only during parsing and is not stored in the
    /// returned [`SigningCredentials`].
    pub fn from_p12(p12_data: &[u8], password: &str) -> Result<Self> {
        let pfx = p12::PFX::parse(p12_data)
            .map_err(|e| Error::KeyMaterial(format!("Failed to parse PKCS#12: {e:?}")))?;

        if !pfx.verify_mac(password) {
            return Err(Error::KeyMaterial("Invalid password for PKCS#12".into()));
        }

        let keys = pfx
            .key_bags(password)
            .map_err(|e| Error::KeyMaterial(format!("Failed to extract keys from PKCS#12: {e:?}")))?;

        let certs = pfx
            .cert_x509_bags(password)
            .map_err(|e| Error::KeyMaterial(format!("Failed to extract certs from PKCS#12: {e:?}")))?;

        let cert_der = certs
            .first()
            .ok_or_else(|| Error::KeyMaterial("No certificate in PKCS#12".into()))?;
        let key_der = keys
            .first()
            .ok_or_else(|| Error::KeyMaterial("No private key in PKCS#12".into()))?;

        let certificate = Certificate::from_der(cert_der)
            .map_err(|e| Error::KeyMaterial(format!("Failed to parse certificate DER: {e}")))?;
        let signing_key = SigningKey::from_der(key_der, None)?;

        Self::new(certificate, signing_key)
    }

    /// Pair an already-parsed certificate and key, checking that they match.
    pub fn new(certificate: Certificate, signing_key: SigningKey) -> Result<Self> {
        let cert_key = PublicKey::from_certificate(&certificate)?;
        if cert_key != signing_key.public_key() {
            return Err(Error::KeyMaterial(
                "Private key does not match certificate public key".into(),
            ));
        }

        Ok(Self {
            certificate,
            signing_key,
        })
    }

    /// Certificate subject, for log output.
    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }
}

/// Parse an X.509 certificate from PEM or DER.
pub fn parse_certificate(data: &[u8]) -> Result<Certificate> {
    if is_pem(data) {
        Certificate::from_pem(data)
            .map_err(|e| Error::KeyMaterial(format!("Failed to parse certificate PEM: {e}")))
    } else {
        Certificate::from_der(data)
            .map_err(|e| Error::KeyMaterial(format!("Failed to parse certificate DER: {e}")))
    }
}

fn is_pem(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(b"-----BEGIN")
}
