//! Command line front end: normalize a Gemini URI and fetch it

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gemini_tofu::config::{default_config_file, secs_to_timeout};
use gemini_tofu::{
    normalize, Client, ClientConfig, Error, FileTrustStore, MismatchPolicy, TrustStore,
};

#[derive(Debug, Parser)]
#[command(
    name = "gemini-tofu",
    version,
    about = "Fetch a Gemini URI, trusting server keys on first use"
)]
struct Cli {
    /// URI to fetch
    #[arg(required_unless_present = "list_trusted")]
    url: Option<String>,

    /// What to do when the server key differs from the trusted one
    #[arg(long, value_enum)]
    on_key_mismatch: Option<MismatchPolicy>,

    /// Directory of trusted server keys
    #[arg(long)]
    trust_dir: Option<PathBuf>,

    /// Configuration file; must exist when given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket timeout in seconds, 0 to wait forever
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the canonical URI without fetching it
    #[arg(long, conflicts_with_all = ["forget", "list_trusted"])]
    normalize_only: bool,

    /// Remove the trusted key for the URI's address
    #[arg(long, conflicts_with = "list_trusted")]
    forget: bool,

    /// Print every trusted address and key
    #[arg(long)]
    list_trusted: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(Error::KeyMismatch { .. }) = err.downcast_ref::<Error>() {
                eprintln!(
                    "hint: rerun with --on-key-mismatch ignore to connect once, \
                     or --on-key-mismatch replace to trust the new key"
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Only the default config file may be absent
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_or_default(&default_config_file())?,
    };
    if let Some(dir) = cli.trust_dir {
        config = config.with_trust_dir(dir);
    }
    if let Some(policy) = cli.on_key_mismatch {
        config = config.with_mismatch_policy(policy);
    }
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(secs_to_timeout(secs));
    }

    if cli.list_trusted {
        let store = FileTrustStore::open(&config.trust_dir)?;
        let mut stdout = std::io::stdout().lock();
        for (address, fingerprint) in store.entries()? {
            writeln!(stdout, "{address} {fingerprint}")?;
        }
        return Ok(());
    }

    let raw = cli.url.context("a URI is required")?;
    let uri = normalize(&raw).with_context(|| format!("cannot normalize {raw:?}"))?;

    if cli.normalize_only {
        println!("{uri}");
        return Ok(());
    }

    if cli.forget {
        let store = FileTrustStore::open(&config.trust_dir)?;
        store.forget(&uri.address())?;
        return Ok(());
    }

    let client = Client::new(config)?;
    let response = client.fetch(&uri)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.body)?;
    stdout.flush()?;
    Ok(())
}
