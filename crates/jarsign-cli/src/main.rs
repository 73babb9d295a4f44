//! Command-line interface for the jarsign directory signing tool.
//!
//! Signs a directory tree in place with `META-INF` JAR-style signature files,
//! or verifies a previously signed tree.

use clap::{Args, Parser, Subcommand};
use jarsign::{DigestAlgorithm, JarSign};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "jarsign")]
#[command(about = "JAR-style directory signing tool", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign every file under a directory
    Sign(SignArgs),
    /// Verify the signature of a signed directory
    Verify {
        /// Signed directory
        root: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SignArgs {
    /// Directory to sign
    root: PathBuf,

    /// Certificate file (PEM or DER)
    #[arg(short = 'c', long)]
    certificate: Option<PathBuf>,

    /// Private key file (PKCS#8 or PKCS#1, PEM or DER)
    #[arg(short = 'k', long)]
    private_key: Option<PathBuf>,

    /// PKCS#12 file (.p12)
    #[arg(short = 'p', long)]
    pkcs12: Option<PathBuf>,

    /// Password for private key or PKCS#12
    #[arg(long, env = "JARSIGN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Digest algorithm (sha1, sha256)
    #[arg(short = 'd', long, default_value = "sha1")]
    digest: DigestAlgorithm,

    /// Threads used to hash files (default: one per CPU)
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

impl SignArgs {
    fn signer(&self) -> JarSign {
        let mut signer = JarSign::new().digest_algorithm(self.digest);

        if let Some(ref p12) = self.pkcs12 {
            signer = signer.pkcs12(p12);
        }
        if let Some(ref cert) = self.certificate {
            signer = signer.certificate(cert);
        }
        if let Some(ref key) = self.private_key {
            signer = signer.private_key(key);
        }
        if let Some(ref password) = self.password {
            signer = signer.password(password.as_str());
        }
        if let Some(threads) = self.threads {
            signer = signer.threads(threads);
        }

        signer
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Sign(args) => {
            let artifacts = args.signer().sign_directory(&args.root)?;
            println!(
                "Signed {} files: {}",
                artifacts.entry_count,
                artifacts.signature_block_path.display()
            );
        }
        Command::Verify { root } => {
            let report = jarsign::verify_directory(&root)?;
            println!(
                "Verified {} files ({}) signed by {}",
                report.entry_count, report.digest_algorithm, report.signer
            );
            for path in &report.unsigned_files {
                println!("Not signed: {path}");
            }
        }
    }

    Ok(())
}
