//! Signing pipeline for a directory tree.
//!
//! [`SignOrchestrator`] runs the three builders in order and writes their
//! output into `META-INF`:
//!
//! ```text
//! KeysLoaded -> ManifestBuilt -> SignatureFileWritten -> BlockSigned -> Complete
//!      \______________\_________________\___________________\______-> Failed
//! ```
//!
//! Each artifact is written to a temporary file and renamed into place, so a
//! failed stage never leaves a truncated file. Artifacts from earlier stages of
//! a failed run stay on disk.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::crypto::cms::sign_signature_file;
use crate::crypto::{DigestAlgorithm, SigningCredentials};
use crate::manifest::{
    ManifestBuilder, SignatureFileBuilder, MANIFEST_NAME, META_INF, SIGNATURE_BLOCK_EXTENSIONS,
    SIGNATURE_BLOCK_STEM, SIGNATURE_FILE_NAME,
};
use crate::{Error, Result};

/// Progress of a signing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignStage {
    /// Credentials are available; nothing has been read or written.
    KeysLoaded,
    /// `MANIFEST.MF` has been written.
    ManifestBuilt,
    /// `CERT.SF` has been written.
    SignatureFileWritten,
    /// The signature block has been written.
    BlockSigned,
    /// All artifacts are in place.
    Complete,
    /// A stage failed; the run is over.
    Failed,
}

impl SignStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignStage::Complete | SignStage::Failed)
    }
}

impl fmt::Display for SignStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignStage::KeysLoaded => "keys loaded",
            SignStage::ManifestBuilt => "manifest built",
            SignStage::SignatureFileWritten => "signature file written",
            SignStage::BlockSigned => "block signed",
            SignStage::Complete => "complete",
            SignStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignOptions {
    /// Digest for file, stanza and manifest digests and for the signature.
    pub digest: DigestAlgorithm,
    /// Worker threads for file hashing; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct SignedArtifacts {
    pub manifest_path: PathBuf,
    pub signature_file_path: PathBuf,
    pub signature_block_path: PathBuf,
    pub manifest: Vec<u8>,
    pub signature_file: Vec<u8>,
    pub signature_block: Vec<u8>,
    /// Number of signed files.
    pub entry_count: usize,
    pub stage: SignStage,
}

/// Sequences manifest, signature file and signature block generation for one run.
pub struct SignOrchestrator<'a> {
    credentials: &'a SigningCredentials,
    options: SignOptions,
    stage: SignStage,
    written: Vec<PathBuf>,
}

impl<'a> SignOrchestrator<'a> {
    pub fn new(credentials: &'a SigningCredentials, options: SignOptions) -> Self {
        Self {
            credentials,
            options,
            stage: SignStage::KeysLoaded,
            written: Vec::new(),
        }
    }

    pub fn stage(&self) -> SignStage {
        self.stage
    }

    /// Artifacts written so far by this run.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Sign every file under `root`.
    pub fn sign_directory(&mut self, root: impl AsRef<Path>) -> Result<SignedArtifacts> {
        let root = root.as_ref();
        self.run(root, |builder| builder.scan().map(|_| ()))
    }

    /// Sign the given relative paths under `root`, listed in any order.
    pub fn sign_paths<I, S>(&mut self, root: impl AsRef<Path>, paths: I) -> Result<SignedArtifacts>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.as_ref();
        self.run(root, |builder| builder.add_paths(paths).map(|_| ()))
    }

    fn run(
        &mut self,
        root: &Path,
        collect: impl FnOnce(&mut ManifestBuilder) -> Result<()>,
    ) -> Result<SignedArtifacts> {
        if self.stage != SignStage::KeysLoaded {
            return Err(Error::Config(format!(
                "Signing run already {}; create a new orchestrator",
                self.stage
            )));
        }

        log::info!(
            "Signing {} with {} ({})",
            root.display(),
            self.options.digest,
            self.credentials.subject()
        );

        match self.run_stages(root, collect) {
            Ok(artifacts) => {
                log::info!(
                    "Signed {} files into {}",
                    artifacts.entry_count,
                    root.join(META_INF).display()
                );
                Ok(artifacts)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn run_stages(
        &mut self,
        root: &Path,
        collect: impl FnOnce(&mut ManifestBuilder) -> Result<()>,
    ) -> Result<SignedArtifacts> {
        let digest = self.options.digest;

        let mut builder = ManifestBuilder::new(root).digest_algorithm(digest);
        collect(&mut builder)?;
        let manifest = self.with_pool(|| builder.build())?;
        let entry_count = manifest.len();

        let signature_file = SignatureFileBuilder::new(&manifest)
            .digest_algorithm(digest)
            .build()?;

        let meta_inf = root.join(META_INF);
        fs::create_dir_all(&meta_inf).map_err(|e| Error::io_write(&meta_inf, e))?;

        let manifest_path = self.write_artifact(&meta_inf, MANIFEST_NAME, signature_file.manifest_bytes())?;
        self.advance(SignStage::ManifestBuilt);

        let signature_file_path =
            self.write_artifact(&meta_inf, SIGNATURE_FILE_NAME, signature_file.as_bytes())?;
        self.advance(SignStage::SignatureFileWritten);

        let block = sign_signature_file(signature_file.as_bytes(), self.credentials, digest)?;
        let block_bytes = block.to_der()?;
        let extension = self.credentials.signing_key.block_extension();
        let block_name = format!("{SIGNATURE_BLOCK_STEM}.{extension}");
        let signature_block_path = self.write_artifact(&meta_inf, &block_name, &block_bytes)?;
        remove_stale_blocks(&meta_inf, extension)?;
        self.advance(SignStage::BlockSigned);

        self.advance(SignStage::Complete);

        let (manifest, signature_file) = signature_file.into_parts();
        Ok(SignedArtifacts {
            manifest_path,
            signature_file_path,
            signature_block_path,
            manifest,
            signature_file,
            signature_block: block_bytes,
            entry_count,
            stage: self.stage,
        })
    }

    fn with_pool<T: Send>(&self, op: impl FnOnce() -> Result<T> + Send) -> Result<T> {
        match self.options.threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::Config(format!("Failed to start {threads} hashing threads: {e}")))?
                .install(op),
            None => op(),
        }
    }

    fn write_artifact(&mut self, dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = dir.join(name);
        write_atomic(&path, dir, bytes)?;
        log::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        self.written.push(path.clone());
        Ok(path)
    }

    fn advance(&mut self, next: SignStage) {
        log::debug!("Signing stage {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn fail(&mut self, error: &Error) {
        log::debug!("Signing stage {} -> {}: {error}", self.stage, SignStage::Failed);
        if !self.written.is_empty() {
            let left: Vec<_> = self.written.iter().map(|p| p.display().to_string()).collect();
            log::warn!(
                "Signing failed after writing {}; these artifacts are incomplete as a set",
                left.join(", ")
            );
        }
        self.stage = SignStage::Failed;
    }
}

/// Remove blocks of other key types left by an earlier run, so `CERT.SF` has
/// exactly one block next to it.
fn remove_stale_blocks(meta_inf: &Path, keep: &str) -> Result<()> {
    for ext in SIGNATURE_BLOCK_EXTENSIONS.iter().filter(|ext| **ext != keep) {
        let path = meta_inf.join(format!("{SIGNATURE_BLOCK_STEM}.{ext}"));
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Removed stale signature block {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_write(&path, e)),
        }
    }
    Ok(())
}

fn write_atomic(path: &Path, dir: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io_write(path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::io_write(path, e))?;
    tmp.persist(path).map_err(|e| Error::io_write(path, e.error))?;
    Ok(())
}
