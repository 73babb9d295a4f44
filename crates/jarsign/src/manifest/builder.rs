//! Manifest generation for a directory tree
//!
//! Hashes every signed file under the root and assembles the `MANIFEST.MF`
//! document. Files are hashed in parallel; the resulting entries are ordered by
//! path, so the output does not depend on enumeration or scheduling order.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::crypto::digest::encode_digest;
use crate::crypto::DigestAlgorithm;
use crate::manifest::text::has_line_break;
use crate::manifest::{main_attributes, Attributes, Manifest, MANIFEST_NAME, MANIFEST_VERSION, META_INF};
use crate::{Error, Result};

/// Builder for the manifest of a directory tree
pub struct ManifestBuilder {
    /// Root of the signed tree
    root: PathBuf,
    /// Digest used for every entry
    digest: DigestAlgorithm,
    /// Relative, forward-slash separated file paths
    paths: BTreeSet<String>,
}

impl ManifestBuilder {
    /// Create a new builder for the tree rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            digest: DigestAlgorithm::default(),
            paths: BTreeSet::new(),
        }
    }

    pub fn digest_algorithm(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root and add every signable file
    pub fn scan(&mut self) -> Result<&mut Self> {
        let files = signable_files(&self.root)?;
        log::debug!("Found {} files under {}", files.len(), self.root.display());
        self.paths.extend(files);
        Ok(self)
    }

    /// Add one relative path supplied by the caller
    ///
    /// Signature metadata paths cannot be signed and are rejected. A path
    /// listed twice is signed once.
    pub fn add_path(&mut self, relative_path: impl Into<String>) -> Result<&mut Self> {
        let relative_path = normalize_relative(&relative_path.into())?;
        if is_signature_metadata(&relative_path) {
            return Err(Error::Config(format!(
                "'{relative_path}' is signature metadata and cannot be signed"
            )));
        }
        self.paths.insert(relative_path);
        Ok(self)
    }

    /// Add a list of relative paths in any order
    pub fn add_paths<I, S>(&mut self, paths: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.add_path(path)?;
        }
        Ok(self)
    }

    /// Relative paths that will be digested, in manifest order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    /// Digest every file and assemble the manifest
    ///
    /// The first unreadable file aborts the build.
    pub fn build(&self) -> Result<Manifest> {
        // Digest in parallel, then insert sequentially in path order
        let digests = self
            .paths
            .par_iter()
            .map(|path| self.hash_file(path).map(|digest| (path, digest)))
            .collect::<Result<Vec<_>>>()?;

        let attribute = self.digest.entry_attribute();
        let mut manifest = Manifest::with_main_attributes(main_attributes(MANIFEST_VERSION));
        for (path, digest) in digests {
            let mut attrs = Attributes::new();
            attrs.insert(attribute.as_str(), encode_digest(&digest));
            manifest.insert_entry(path.as_str(), attrs)?;
        }

        Ok(manifest)
    }

    fn hash_file(&self, relative_path: &str) -> Result<Vec<u8>> {
        let path = self.root.join(relative_path);
        let digest = File::open(&path)
            .and_then(|file| self.digest.digest_reader(file))
            .map_err(|e| Error::file_read(&path, e))?;
        log::trace!("{} {relative_path}", encode_digest(&digest));
        Ok(digest)
    }
}

/// Whether a relative path is one of the artifacts this crate writes, or
/// another JAR signer's signature file or block.
///
/// Matches `META-INF/MANIFEST.MF` and `*.SF`, `*.RSA`, `*.DSA`, `*.EC`, `SIG-*`
/// directly inside `META-INF`.
pub fn is_signature_metadata(relative_path: &str) -> bool {
    let Some(name) = relative_path
        .strip_prefix(META_INF)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return false;
    };

    if name.contains('/') {
        return false;
    }

    let upper = name.to_ascii_uppercase();
    upper == MANIFEST_NAME
        || upper.starts_with("SIG-")
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| upper.ends_with(ext))
}

/// Enumerate the files to sign under `root`, as sorted forward-slash relative paths.
///
/// Symlinks are followed. Directories are not listed. Walk errors and paths
/// that are not valid UTF-8 fail with [`Error::FileRead`].
pub fn signable_files(root: impl AsRef<Path>) -> Result<Vec<String>> {
    let root = root.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop"));
            Error::file_read(path, source)
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let relative = relative_name(root, entry.path())?;
        if !is_signature_metadata(&relative) {
            files.push(relative);
        }
    }

    files.sort();
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::file_read(path, io::Error::other("path outside the signed root")))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            Error::file_read(
                path,
                io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
            )
        })?;
        parts.push(part);
    }

    let name = parts.join("/");
    if has_line_break(&name) {
        return Err(Error::file_read(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                "file name contains a line break and cannot be a manifest entry",
            ),
        ));
    }
    Ok(name)
}

/// Whether `name` is a normalized path inside the signed root that can be
/// written as a single manifest `Name:` line.
pub(crate) fn is_entry_name(name: &str) -> bool {
    !name.is_empty()
        && !has_line_break(name)
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn normalize_relative(path: &str) -> Result<String> {
    let path = path.replace('\\', "/");
    let valid = !path.is_empty()
        && Path::new(&path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !valid {
        return Err(Error::Config(format!(
            "'{path}' is not a relative path inside the signed root"
        )));
    }

    let normalized = path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");
    if !is_entry_name(&normalized) {
        return Err(Error::Config(format!(
            "{normalized:?} cannot be written as a manifest entry name"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_single_file_manifest_bytes() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", b"hello");

        let mut builder = ManifestBuilder::new(dir.path());
        builder.scan().unwrap();
        let manifest = builder.build().unwrap();

        assert_eq!(
            manifest.to_bytes(),
            b"Manifest-Version: 1.0\r\n\
              Created-By: 1.0 (Android SignApk)\r\n\
              \r\n\
              Name: a.txt\r\n\
              SHA1-Digest: qvTGHdzF6KLavt4PO0gs2a6pQ00=\r\n\
              \r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_sha256_entry_attribute() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", b"hello");

        let mut builder = ManifestBuilder::new(dir.path()).digest_algorithm(DigestAlgorithm::Sha256);
        builder.add_path("a.txt").unwrap();
        let manifest = builder.build().unwrap();

        assert_eq!(
            manifest.entry("a.txt").unwrap().get("SHA-256-Digest"),
            Some("LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=")
        );
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempdir().unwrap();
        let mut builder = ManifestBuilder::new(dir.path());
        builder.scan().unwrap();
        let manifest = builder.build().unwrap();

        assert!(manifest.is_empty());
        assert_eq!(
            manifest.to_bytes(),
            b"Manifest-Version: 1.0\r\nCreated-By: 1.0 (Android SignApk)\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let dir = tempdir().unwrap();
        for (i, name) in ["z.bin", "a/b.txt", "A.txt", "m/n/o.dat"].iter().enumerate() {
            write(dir.path(), name, &[i as u8; 100]);
        }

        let mut forward = ManifestBuilder::new(dir.path());
        forward.add_paths(["z.bin", "a/b.txt", "A.txt", "m/n/o.dat"]).unwrap();
        let mut backward = ManifestBuilder::new(dir.path());
        backward.add_paths(["m/n/o.dat", "A.txt", "a/b.txt", "z.bin"]).unwrap();

        let a = forward.build().unwrap().to_bytes();
        let b = backward.build().unwrap().to_bytes();
        assert_eq!(a, b);

        let mut scanned = ManifestBuilder::new(dir.path());
        scanned.scan().unwrap();
        assert_eq!(scanned.build().unwrap().to_bytes(), a);
        assert_eq!(
            scanned.paths().collect::<Vec<_>>(),
            vec!["A.txt", "a/b.txt", "m/n/o.dat", "z.bin"]
        );
    }

    #[test]
    fn test_missing_file_aborts() {
        let dir = tempdir().unwrap();
        write(dir.path(), "present.txt", b"x");

        let mut builder = ManifestBuilder::new(dir.path());
        builder.add_paths(["present.txt", "absent.txt"]).unwrap();

        match builder.build() {
            Err(Error::FileRead { path, .. }) => assert!(path.ends_with("absent.txt")),
            other => panic!("expected FileRead, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_paths_are_signed_once() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", b"hello");

        let mut builder = ManifestBuilder::new(dir.path());
        builder.add_paths(["a.txt", "./a.txt", "a.txt"]).unwrap();
        assert_eq!(builder.file_count(), 1);
        assert_eq!(builder.build().unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_paths_outside_root() {
        let mut builder = ManifestBuilder::new("unused");
        assert!(matches!(builder.add_path("../etc/passwd"), Err(Error::Config(_))));
        assert!(matches!(builder.add_path("/etc/passwd"), Err(Error::Config(_))));
        assert!(matches!(builder.add_path(""), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_caller_paths_with_line_breaks() {
        let mut builder = ManifestBuilder::new("unused");
        for path in ["evil\nSHA1-Digest: AAAA", "a\r\nName: b", "dir/x\0y"] {
            assert!(matches!(builder.add_path(path), Err(Error::Config(_))));
        }
        assert_eq!(builder.file_count(), 0);
    }

    #[test]
    fn test_rejects_caller_signature_metadata() {
        let mut builder = ManifestBuilder::new("unused");
        assert!(matches!(
            builder.add_path("META-INF/MANIFEST.MF"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            builder.add_path("META-INF/CERT.RSA"),
            Err(Error::Config(_))
        ));
        builder.add_path("META-INF/com/android/otacert").unwrap();
        assert_eq!(builder.file_count(), 1);
    }

    #[test]
    fn test_entry_names() {
        assert!(is_entry_name("a.txt"));
        assert!(is_entry_name("META-INF/com/android/otacert"));
        assert!(!is_entry_name(""));
        assert!(!is_entry_name("../outside.txt"));
        assert!(!is_entry_name("a/../../b"));
        assert!(!is_entry_name("/etc/passwd"));
        assert!(!is_entry_name("a//b"));
        assert!(!is_entry_name("./a"));
        assert!(!is_entry_name("evil\nSHA1-Digest: AAAA"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_rejects_file_names_with_line_breaks() {
        let dir = tempdir().unwrap();
        write(dir.path(), "good.txt", b"ok");
        write(dir.path(), "evil\nSHA1-Digest: AAAA", b"payload");

        match signable_files(dir.path()) {
            Err(Error::FileRead { path, source }) => {
                assert!(path.to_string_lossy().contains("evil"));
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("expected FileRead, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_skips_signature_metadata() {
        let dir = tempdir().unwrap();
        write(dir.path(), "META-INF/MANIFEST.MF", b"old");
        write(dir.path(), "META-INF/CERT.SF", b"old");
        write(dir.path(), "META-INF/CERT.RSA", b"old");
        write(dir.path(), "META-INF/com/android/otacert", b"cert");
        write(dir.path(), "boot.img", b"boot");

        let files = signable_files(dir.path()).unwrap();
        assert_eq!(files, vec!["META-INF/com/android/otacert", "boot.img"]);
    }

    #[test]
    fn test_is_signature_metadata() {
        assert!(is_signature_metadata("META-INF/MANIFEST.MF"));
        assert!(is_signature_metadata("META-INF/CERT.SF"));
        assert!(is_signature_metadata("META-INF/release.rsa"));
        assert!(is_signature_metadata("META-INF/KEY.DSA"));
        assert!(is_signature_metadata("META-INF/CERT.EC"));
        assert!(is_signature_metadata("META-INF/SIG-FOO"));
        assert!(!is_signature_metadata("META-INF/sub/CERT.SF"));
        assert!(!is_signature_metadata("META-INF/services/x"));
        assert!(!is_signature_metadata("MANIFEST.MF"));
        assert!(!is_signature_metadata("META-INFO/CERT.SF"));
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_fails_scan() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("dangling")).unwrap();

        assert!(matches!(
            signable_files(dir.path()),
            Err(Error::FileRead { .. })
        ));
    }
}
