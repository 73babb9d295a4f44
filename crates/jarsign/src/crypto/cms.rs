//! PKCS#7 signature block assembly.
//!
//! The block is a CMS `SignedData` with no encapsulated content, one embedded
//! certificate and one signer info without signed attributes. The signature in
//! the signer info covers the raw signature-file bytes, which is what legacy
//! JAR and recovery verifiers check.

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignatureValue,
    SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::{Any, Decode, Encode};
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::crypto::cert::digest_algorithm_identifier;
use crate::crypto::{DigestAlgorithm, SigningCredentials};
use crate::{Error, Result};

/// Logical content of a signature block.
///
/// Immutable once built; [`SignatureBlock::to_der`] produces the file bytes.
#[derive(Debug, Clone)]
pub struct SignatureBlock {
    certificate: Certificate,
    digest_algorithm: AlgorithmIdentifierOwned,
    signature_algorithm: AlgorithmIdentifierOwned,
    signature: Vec<u8>,
}

impl SignatureBlock {
    /// Issuer distinguished name of the embedded certificate.
    pub fn issuer(&self) -> String {
        self.certificate.tbs_certificate.issuer.to_string()
    }

    /// Serial number bytes of the embedded certificate.
    pub fn serial_number(&self) -> &[u8] {
        self.certificate.tbs_certificate.serial_number.as_bytes()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn digest_algorithm(&self) -> &AlgorithmIdentifierOwned {
        &self.digest_algorithm
    }

    pub fn signature_algorithm(&self) -> &AlgorithmIdentifierOwned {
        &self.signature_algorithm
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Build the CMS `ContentInfo` wrapping the `SignedData`.
    pub fn to_content_info(&self) -> Result<ContentInfo> {
        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: DigestAlgorithmIdentifiers::try_from(vec![
                self.digest_algorithm.clone(),
            ])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: const_oid::db::rfc5911::ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet::try_from(vec![
                CertificateChoices::Certificate(self.certificate.clone()),
            ])?),
            crls: None,
            signer_infos: SignerInfos::try_from(vec![SignerInfo {
                version: CmsVersion::V1,
                sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                    issuer: self.certificate.tbs_certificate.issuer.clone(),
                    serial_number: self.certificate.tbs_certificate.serial_number.clone(),
                }),
                digest_alg: self.digest_algorithm.clone(),
                signed_attrs: None,
                signature_algorithm: self.signature_algorithm.clone(),
                signature: SignatureValue::new(self.signature.clone())?,
                unsigned_attrs: None,
            }])?,
        };

        Ok(ContentInfo {
            content_type: const_oid::db::rfc5911::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        })
    }

    /// DER encoding of the block, as written to `CERT.RSA` / `CERT.EC`.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.to_content_info()?
            .to_der()
            .map_err(|e| Error::Encoding(format!("Failed to encode signature block: {e}")))
    }
}

/// Assembles a [`SignatureBlock`] from a caller-supplied signature.
///
/// The builder never signs; the signature must already cover the exact
/// signature-file bytes with the configured digest algorithm.
pub struct SignatureBlockBuilder<'a> {
    certificate: &'a Certificate,
    digest: DigestAlgorithm,
    signature_algorithm: Option<AlgorithmIdentifierOwned>,
}

impl<'a> SignatureBlockBuilder<'a> {
    pub fn new(certificate: &'a Certificate) -> Self {
        Self {
            certificate,
            digest: DigestAlgorithm::default(),
            signature_algorithm: None,
        }
    }

    pub fn digest_algorithm(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn signature_algorithm(mut self, algorithm: AlgorithmIdentifierOwned) -> Self {
        self.signature_algorithm = Some(algorithm);
        self
    }

    /// Bind the signature bytes to the certificate and algorithm identifiers.
    pub fn build(self, signature: Vec<u8>) -> Result<SignatureBlock> {
        if signature.is_empty() {
            return Err(Error::Encoding("Empty signature".into()));
        }

        let signature_algorithm = self
            .signature_algorithm
            .ok_or_else(|| Error::Encoding("No signature algorithm identifier".into()))?;

        Ok(SignatureBlock {
            certificate: self.certificate.clone(),
            digest_algorithm: digest_algorithm_identifier(self.digest)?,
            signature_algorithm,
            signature,
        })
    }
}

/// Sign the signature-file bytes and assemble the block in one step.
pub fn sign_signature_file(
    signature_file: &[u8],
    credentials: &SigningCredentials,
    digest: DigestAlgorithm,
) -> Result<SignatureBlock> {
    let signature = credentials.signing_key.sign(signature_file, digest)?;

    SignatureBlockBuilder::new(&credentials.certificate)
        .digest_algorithm(digest)
        .signature_algorithm(credentials.signing_key.signature_algorithm(digest)?)
        .build(signature)
}

/// Parse a DER signature block back into its `SignedData`.
pub fn parse_signed_data(data: &[u8]) -> Result<SignedData> {
    let ci = ContentInfo::from_der(data)
        .map_err(|e| Error::Verification(format!("Signature block is not a ContentInfo: {e}")))?;

    if ci.content_type != const_oid::db::rfc5911::ID_SIGNED_DATA {
        return Err(Error::Verification(format!(
            "Signature block content type is {}, expected signedData",
            ci.content_type
        )));
    }

    ci.content
        .decode_as::<SignedData>()
        .map_err(|e| Error::Verification(format!("Malformed SignedData: {e}")))
}

/// All standard X.509 certificates contained in a `SignedData`.
pub fn signed_data_certificates(sd: &SignedData) -> Vec<&Certificate> {
    sd.certificates.as_ref().map_or_else(Vec::new, |certs| {
        certs
            .0
            .iter()
            .filter_map(|cc| match cc {
                CertificateChoices::Certificate(c) => Some(c),
                _ => None,
            })
            .collect()
    })
}
