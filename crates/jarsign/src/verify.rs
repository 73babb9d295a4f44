//! Verification of a signed directory tree.
//!
//! Checks the chain from the signature block down to the file contents:
//! block signature over `CERT.SF`, whole-manifest digest, per-stanza digests,
//! and finally each file digest listed in `MANIFEST.MF`.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use cms::signed_data::SignerIdentifier;
use rayon::prelude::*;

use crate::crypto::cert::PublicKey;
use crate::crypto::cms::{parse_signed_data, signed_data_certificates};
use crate::crypto::digest::decode_digest;
use crate::crypto::DigestAlgorithm;
use crate::manifest::builder::is_entry_name;
use crate::manifest::{
    signable_files, stanza_bytes, Manifest, MANIFEST_NAME, META_INF, SIGNATURE_BLOCK_EXTENSIONS,
    SIGNATURE_BLOCK_STEM, SIGNATURE_FILE_NAME,
};
use crate::{Error, Result};

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Number of files covered by the manifest.
    pub entry_count: usize,
    pub digest_algorithm: DigestAlgorithm,
    /// Subject of the embedded signer certificate.
    pub signer: String,
    /// Files present under the root but not listed in the manifest.
    pub unsigned_files: Vec<String>,
}

/// Verify the artifacts in `root/META-INF` against the files under `root`.
pub fn verify_directory(root: impl AsRef<Path>) -> Result<VerificationReport> {
    Verifier::new(root).verify()
}

/// Signature checker for one signed tree.
pub struct Verifier {
    root: PathBuf,
}

impl Verifier {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Run every check, including file contents.
    pub fn verify(&self) -> Result<VerificationReport> {
        let meta_inf = self.root.join(META_INF);
        let manifest_bytes = read_artifact(&meta_inf.join(MANIFEST_NAME))?;
        let signature_file = read_artifact(&meta_inf.join(SIGNATURE_FILE_NAME))?;
        let block = read_artifact(&find_block(&meta_inf)?)?;

        let (manifest, mut report) =
            Self::verify_artifacts(&manifest_bytes, &signature_file, &block)?;
        self.verify_files(&manifest, report.digest_algorithm)?;

        let listed: BTreeSet<&str> = manifest.entries().keys().map(String::as_str).collect();
        report.unsigned_files = signable_files(&self.root)?
            .into_iter()
            .filter(|path| !listed.contains(path.as_str()))
            .collect();
        if !report.unsigned_files.is_empty() {
            log::warn!(
                "{} files are not covered by the signature: {}",
                report.unsigned_files.len(),
                report.unsigned_files.join(", ")
            );
        }

        log::info!(
            "Verified {} entries signed by {}",
            report.entry_count,
            report.signer
        );
        Ok(report)
    }

    /// Check the block, signature file and manifest against each other.
    ///
    /// File contents are not read. Returns the parsed manifest and a report
    /// with no unsigned files filled in.
    pub fn verify_artifacts(
        manifest_bytes: &[u8],
        signature_file: &[u8],
        block: &[u8],
    ) -> Result<(Manifest, VerificationReport)> {
        let (signer, signer_digest) = verify_block(signature_file, block)?;

        let sf = Manifest::parse(signature_file)?;
        let digest = detect_digest(&sf)?;
        if signer_digest != digest {
            return Err(Error::Verification(format!(
                "Signature block uses {signer_digest:?} but {SIGNATURE_FILE_NAME} uses {digest:?}"
            )));
        }

        let manifest_attribute = digest.manifest_attribute();
        let expected = sf
            .main_attributes()
            .get(&manifest_attribute)
            .ok_or_else(|| Error::Verification(format!("{SIGNATURE_FILE_NAME} has no {manifest_attribute}")))?;
        if decode_digest(expected)? != digest.digest(manifest_bytes) {
            return Err(Error::Verification(format!(
                "{manifest_attribute} does not match {MANIFEST_NAME}"
            )));
        }

        let manifest = Manifest::parse(manifest_bytes)?;
        let entry_attribute = digest.entry_attribute();

        for name in sf.entries().keys() {
            if manifest.entry(name).is_none() {
                return Err(Error::Verification(format!(
                    "'{name}' is in {SIGNATURE_FILE_NAME} but not in {MANIFEST_NAME}"
                )));
            }
        }

        for (name, attrs) in manifest.entries() {
            let expected = sf
                .entry(name)
                .and_then(|e| e.get(&entry_attribute))
                .ok_or_else(|| {
                    Error::Verification(format!("'{name}' is not covered by {SIGNATURE_FILE_NAME}"))
                })?;
            if decode_digest(expected)? != digest.digest(&stanza_bytes(name, attrs)) {
                return Err(Error::Verification(format!(
                    "Manifest stanza digest mismatch for '{name}'"
                )));
            }
        }

        let report = VerificationReport {
            entry_count: manifest.len(),
            digest_algorithm: digest,
            signer,
            unsigned_files: Vec::new(),
        };
        Ok((manifest, report))
    }

    /// Recompute every file digest listed in the manifest.
    pub fn verify_files(&self, manifest: &Manifest, digest: DigestAlgorithm) -> Result<()> {
        let attribute = digest.entry_attribute();

        manifest
            .entries()
            .par_iter()
            .try_for_each(|(name, attrs)| {
                let expected = attrs.get(&attribute).ok_or_else(|| {
                    Error::Verification(format!("'{name}' has no {attribute} in {MANIFEST_NAME}"))
                })?;

                if !is_entry_name(name) {
                    return Err(Error::Verification(format!(
                        "Manifest entry {name:?} is not a path inside the signed root"
                    )));
                }
                let path = self.root.join(name);
                let actual = File::open(&path)
                    .and_then(|file| digest.digest_reader(file))
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::NotFound => {
                            Error::Verification(format!("Signed file '{name}' is missing"))
                        }
                        _ => Error::file_read(&path, e),
                    })?;

                if decode_digest(expected)? != actual {
                    return Err(Error::Verification(format!("Digest mismatch for '{name}'")));
                }
                Ok(())
            })
    }
}

/// Verify the block signature over the signature file; returns the signer
/// subject and the signer digest algorithm.
fn verify_block(signature_file: &[u8], block: &[u8]) -> Result<(String, DigestAlgorithm)> {
    let sd = parse_signed_data(block)?;

    let certs = signed_data_certificates(&sd);
    let [cert] = certs.as_slice() else {
        return Err(Error::Verification(format!(
            "Expected one certificate in the signature block, found {}",
            certs.len()
        )));
    };

    let signers = &sd.signer_infos.0;
    if signers.len() != 1 {
        return Err(Error::Verification(format!(
            "Expected one signer in the signature block, found {}",
            signers.len()
        )));
    }
    let signer = signers
        .get(0)
        .ok_or_else(|| Error::Verification("Signature block has no signer".into()))?;

    match &signer.sid {
        SignerIdentifier::IssuerAndSerialNumber(ias)
            if ias.issuer == cert.tbs_certificate.issuer
                && ias.serial_number == cert.tbs_certificate.serial_number => {}
        _ => {
            return Err(Error::Verification(
                "Signer does not identify the embedded certificate".into(),
            ))
        }
    }

    if signer.signed_attrs.is_some() {
        return Err(Error::Verification(
            "Signed attributes are not supported in JAR signature blocks".into(),
        ));
    }

    let digest = DigestAlgorithm::from_oid(&signer.digest_alg.oid)
        .ok_or_else(|| Error::UnsupportedAlgorithm(signer.digest_alg.oid.to_string()))?;

    PublicKey::from_certificate(cert)?.verify(
        signature_file,
        signer.signature.as_bytes(),
        digest,
    )?;

    Ok((cert.tbs_certificate.subject.to_string(), digest))
}

fn detect_digest(sf: &Manifest) -> Result<DigestAlgorithm> {
    [DigestAlgorithm::Sha256, DigestAlgorithm::Sha1]
        .into_iter()
        .find(|alg| sf.main_attributes().get(&alg.manifest_attribute()).is_some())
        .ok_or_else(|| {
            Error::Verification(format!(
                "{SIGNATURE_FILE_NAME} has no supported *-Digest-Manifest attribute"
            ))
        })
}

fn find_block(meta_inf: &Path) -> Result<PathBuf> {
    let found: Vec<PathBuf> = SIGNATURE_BLOCK_EXTENSIONS
        .iter()
        .map(|ext| meta_inf.join(format!("{SIGNATURE_BLOCK_STEM}.{ext}")))
        .filter(|path| path.is_file())
        .collect();

    match found.as_slice() {
        [one] => Ok(one.clone()),
        [] => Err(Error::Verification(format!(
            "No signature block in {}",
            meta_inf.display()
        ))),
        _ => Err(Error::Verification(format!(
            "More than one signature block in {}",
            meta_inf.display()
        ))),
    }
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::Verification(format!("{} is missing", path.display())),
        _ => Error::file_read(path, e),
    })
}
