//! End-to-end signing and verification of directory trees.
//!
//! Signs temporary trees with the fixture keys under `tests/data/`, then checks
//! the written `META-INF` artifacts byte for byte and through the verifier.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use jarsign::crypto::digest::{decode_digest, encode_digest};
use jarsign::manifest::stanza_bytes;
use jarsign::{
    verify_directory, DigestAlgorithm, Error, JarSign, Manifest, SignStage, SignedArtifacts,
    Verifier,
};
use tempfile::TempDir;

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn rsa_signer() -> JarSign {
    JarSign::new()
        .certificate(data("rsa_cert.pem"))
        .private_key(data("rsa_key.pem"))
}

/// Create a tree from `(relative path, content)` pairs
fn tree(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn sample_tree() -> TempDir {
    tree(&[
        ("a.txt", b"hello"),
        ("boot.img", &[0x41; 10_000]),
        ("system/build.prop", b"ro.build.id=TEST\n"),
        ("META-INF/com/google/android/update-binary", b"#!/sbin/sh\n"),
    ])
}

fn sign(signer: &JarSign, root: &Path) -> SignedArtifacts {
    signer.sign_directory(root).unwrap()
}

#[test]
fn test_single_file_artifacts() {
    let dir = tree(&[("a.txt", b"hello")]);
    let artifacts = sign(&rsa_signer(), dir.path());

    assert_eq!(artifacts.stage, SignStage::Complete);
    assert_eq!(artifacts.entry_count, 1);
    assert_eq!(
        fs::read(dir.path().join("META-INF/MANIFEST.MF")).unwrap(),
        b"Manifest-Version: 1.0\r\n\
          Created-By: 1.0 (Android SignApk)\r\n\
          \r\n\
          Name: a.txt\r\n\
          SHA1-Digest: qvTGHdzF6KLavt4PO0gs2a6pQ00=\r\n\
          \r\n"
    );
    assert_eq!(
        fs::read(dir.path().join("META-INF/CERT.SF")).unwrap(),
        b"Signature-Version: 1.0\r\n\
          Created-By: 1.0 (Android SignApk)\r\n\
          SHA1-Digest-Manifest: tuSMBFdqVJqO1Fk+F/qb9z8rVU0=\r\n\
          \r\n\
          Name: a.txt\r\n\
          SHA1-Digest: BprRgomvHLevxdAAclL2ha6OuCY=\r\n\
          \r\n"
    );
    assert!(dir.path().join("META-INF/CERT.RSA").is_file());
}

#[test]
fn test_signing_is_deterministic() {
    let first = sample_tree();
    let second = sample_tree();

    let a = sign(&rsa_signer(), first.path());
    let b = sign(&rsa_signer(), second.path());

    assert_eq!(a.manifest, b.manifest);
    assert_eq!(a.signature_file, b.signature_file);
    // PKCS#1 v1.5 signatures carry no randomness.
    assert_eq!(a.signature_block, b.signature_block);
}

#[test]
fn test_manifest_digest_matches_file_content() {
    let dir = sample_tree();
    sign(&rsa_signer(), dir.path());

    let manifest = Manifest::parse(&fs::read(dir.path().join("META-INF/MANIFEST.MF")).unwrap()).unwrap();
    let entry = manifest.entry("a.txt").unwrap();
    assert_eq!(
        entry.get("SHA1-Digest"),
        Some(DigestAlgorithm::Sha1.digest_base64(b"hello").as_str())
    );
    assert_eq!(manifest.len(), 4);
}

#[test]
fn test_stanza_digests_match_written_manifest() {
    let dir = sample_tree();
    sign(&rsa_signer(), dir.path());

    let manifest_bytes = fs::read(dir.path().join("META-INF/MANIFEST.MF")).unwrap();
    let manifest = Manifest::parse(&manifest_bytes).unwrap();
    let sf = Manifest::parse(&fs::read(dir.path().join("META-INF/CERT.SF")).unwrap()).unwrap();

    for (name, attrs) in manifest.entries() {
        let stanza = stanza_bytes(name, attrs);
        assert!(
            manifest_bytes.windows(stanza.len()).any(|w| w == stanza.as_slice()),
            "stanza for {name} is not in the written manifest"
        );
        assert_eq!(
            sf.entry(name).unwrap().get("SHA1-Digest"),
            Some(encode_digest(&DigestAlgorithm::Sha1.digest(&stanza)).as_str())
        );
    }

    let whole = sf.main_attributes().get("SHA1-Digest-Manifest").unwrap();
    assert_eq!(decode_digest(whole).unwrap(), DigestAlgorithm::Sha1.digest(&manifest_bytes));
}

#[test]
fn test_empty_tree() {
    let dir = TempDir::new().unwrap();
    let artifacts = sign(&rsa_signer(), dir.path());

    assert_eq!(artifacts.entry_count, 0);
    assert_eq!(
        artifacts.manifest,
        b"Manifest-Version: 1.0\r\nCreated-By: 1.0 (Android SignApk)\r\n\r\n"
    );
    assert_eq!(
        artifacts.signature_file,
        b"Signature-Version: 1.0\r\n\
          Created-By: 1.0 (Android SignApk)\r\n\
          SHA1-Digest-Manifest: DQKs8HXX0a1ZIobNn52CoMtIDkA=\r\n\
          \r\n"
    );

    let report = verify_directory(dir.path()).unwrap();
    assert_eq!(report.entry_count, 0);
}

#[test]
fn test_path_order_does_not_matter() {
    let first = sample_tree();
    let second = sample_tree();

    let forward = rsa_signer()
        .sign_files(
            first.path(),
            ["a.txt", "boot.img", "system/build.prop", "META-INF/com/google/android/update-binary"],
        )
        .unwrap();
    let backward = rsa_signer()
        .sign_files(
            second.path(),
            ["META-INF/com/google/android/update-binary", "system/build.prop", "boot.img", "a.txt"],
        )
        .unwrap();

    assert_eq!(forward.manifest, backward.manifest);
    assert_eq!(forward.signature_file, backward.signature_file);
}

#[test]
fn test_resigning_is_idempotent() {
    let dir = sample_tree();
    let first = sign(&rsa_signer(), dir.path());
    let second = sign(&rsa_signer(), dir.path());

    // The previous signature files are not signed themselves.
    assert_eq!(second.entry_count, first.entry_count);
    assert_eq!(first.manifest, second.manifest);
    assert_eq!(first.signature_file, second.signature_file);
    assert_eq!(first.signature_block, second.signature_block);
}

#[test]
fn test_flipped_byte_breaks_manifest_digest() {
    let dir = sample_tree();
    let signed = sign(&rsa_signer(), dir.path());

    let path = dir.path().join("boot.img");
    let mut content = fs::read(&path).unwrap();
    content[5000] ^= 0x01;
    fs::write(&path, content).unwrap();

    // Digest check only: the stored artifacts still verify against each other,
    // but not against the tree.
    let (manifest, report) = Verifier::verify_artifacts(
        &signed.manifest,
        &signed.signature_file,
        &signed.signature_block,
    )
    .unwrap();
    let result = Verifier::new(dir.path()).verify_files(&manifest, report.digest_algorithm);
    assert!(matches!(result, Err(Error::Verification(msg)) if msg.contains("boot.img")));
}

#[test]
fn test_verify_round_trip() {
    let dir = sample_tree();
    sign(&rsa_signer(), dir.path());

    let report = verify_directory(dir.path()).unwrap();
    assert_eq!(report.entry_count, 4);
    assert_eq!(report.digest_algorithm, DigestAlgorithm::Sha1);
    assert!(report.signer.contains("Test RSA Signer"));
    assert!(report.unsigned_files.is_empty());
}

#[test]
fn test_altered_artifacts_fail_verification() {
    for artifact in ["MANIFEST.MF", "CERT.SF", "CERT.RSA"] {
        let dir = sample_tree();
        sign(&rsa_signer(), dir.path());

        let path = dir.path().join("META-INF").join(artifact);
        let mut content = fs::read(&path).unwrap();
        // Flip a bit in the last digest or signature byte region.
        let index = content.len() - 8;
        content[index] ^= 0x02;
        fs::write(&path, content).unwrap();

        assert!(
            verify_directory(dir.path()).is_err(),
            "altered {artifact} was accepted"
        );
    }
}

#[test]
fn test_altered_file_fails_verification() {
    let dir = sample_tree();
    sign(&rsa_signer(), dir.path());
    fs::write(dir.path().join("a.txt"), b"hellO").unwrap();

    assert!(matches!(
        verify_directory(dir.path()),
        Err(Error::Verification(msg)) if msg.contains("a.txt")
    ));
}

#[test]
fn test_sha256_round_trip() {
    let dir = sample_tree();
    let artifacts = sign(&rsa_signer().digest_algorithm(DigestAlgorithm::Sha256), dir.path());

    let manifest = String::from_utf8(artifacts.manifest).unwrap();
    assert!(manifest.contains(
        "Name: a.txt\r\nSHA-256-Digest: LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=\r\n"
    ));
    assert!(String::from_utf8(artifacts.signature_file)
        .unwrap()
        .contains("SHA-256-Digest-Manifest: "));

    let report = verify_directory(dir.path()).unwrap();
    assert_eq!(report.digest_algorithm, DigestAlgorithm::Sha256);
}

#[test]
fn test_ec_key_writes_ec_block() {
    let dir = sample_tree();
    let artifacts = sign(
        &JarSign::new()
            .certificate(data("ec_cert.pem"))
            .private_key(data("ec_key.pem"))
            .digest_algorithm(DigestAlgorithm::Sha256),
        dir.path(),
    );

    assert_eq!(artifacts.signature_block_path, dir.path().join("META-INF/CERT.EC"));
    assert!(!dir.path().join("META-INF/CERT.RSA").exists());

    let report = verify_directory(dir.path()).unwrap();
    assert!(report.signer.contains("Test EC Signer"));
}

#[test]
fn test_resigning_rsa_tree_with_ec_key_verifies() {
    let dir = sample_tree();
    sign(&rsa_signer(), dir.path());
    assert!(verify_directory(dir.path()).unwrap().signer.contains("Test RSA Signer"));

    let ec_signer = JarSign::new()
        .certificate(data("ec_cert.pem"))
        .private_key(data("ec_key.pem"));
    let artifacts = sign(&ec_signer, dir.path());

    assert_eq!(artifacts.entry_count, 4);
    assert!(!dir.path().join("META-INF/CERT.RSA").exists());
    let report = verify_directory(dir.path()).unwrap();
    assert!(report.signer.contains("Test EC Signer"));
    assert!(report.unsigned_files.is_empty());
}

#[test]
fn test_pkcs12_and_der_credentials_match_pem() {
    let pem_dir = sample_tree();
    let p12_dir = sample_tree();
    let der_dir = sample_tree();

    let pem = sign(&rsa_signer(), pem_dir.path());
    let p12 = sign(
        &JarSign::new().pkcs12(data("rsa.p12")).password("changeit"),
        p12_dir.path(),
    );
    let der = sign(
        &JarSign::new()
            .certificate(data("rsa_cert.der"))
            .private_key(data("rsa_key.der")),
        der_dir.path(),
    );

    assert_eq!(pem.signature_block, p12.signature_block);
    assert_eq!(pem.signature_block, der.signature_block);
}

#[test]
fn test_wrong_pkcs12_password() {
    let dir = sample_tree();
    let result = JarSign::new()
        .pkcs12(data("rsa.p12"))
        .password("wrong")
        .sign_directory(dir.path());

    assert!(matches!(result, Err(Error::KeyMaterial(_))));
    assert!(!dir.path().join("META-INF/MANIFEST.MF").exists());
}

#[test]
fn test_long_paths_are_wrapped_and_verify() {
    let long = format!("{}/payload.bin", "very-long-directory-name".repeat(5));
    let dir = tree(&[(long.as_str(), b"data")]);
    let artifacts = sign(&rsa_signer(), dir.path());

    for line in artifacts.manifest.split(|&b| b == b'\n') {
        assert!(line.len() <= 72 + 1, "line too long: {}", String::from_utf8_lossy(line));
    }
    verify_directory(dir.path()).unwrap();
}

#[test]
#[ignore = "Requires the openssl command-line tool"]
fn test_openssl_accepts_signature_block() {
    let dir = sample_tree();
    sign(&rsa_signer(), dir.path());
    let meta_inf = dir.path().join("META-INF");

    let output = Command::new("openssl")
        .args(["cms", "-verify", "-binary", "-noverify", "-inform", "DER", "-in"])
        .arg(meta_inf.join("CERT.RSA"))
        .arg("-content")
        .arg(meta_inf.join("CERT.SF"))
        .arg("-out")
        .arg(dir.path().join("verified.out"))
        .output()
        .expect("failed to run openssl");

    assert!(
        output.status.success(),
        "openssl rejected the block: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
