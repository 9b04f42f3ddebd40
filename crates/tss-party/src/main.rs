//! TSS Party CLI
//!
//! Command-line interface for running every party of a threshold ECDSA setup
//! inside one process:
//! - Distributed Key Generation, persisted as fixtures
//! - Signing with an interactively assembled session
//! - Inspection of stored fixtures

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tss_core::{
    aggregate::ethereum_address,
    keygen,
    mpc::RunConfig,
    session::{prompt_lines, Feedback, SessionBuilder, JOIN_PROMPT},
    sign,
    store::{FixtureStore, SaveOutcome, DEFAULT_FIXTURE_DIR},
    DEFAULT_PARTIES, DEFAULT_THRESHOLD,
};
use tracing::{info, Level};

/// TSS Party - in-process threshold ECDSA
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Threshold ECDSA key generation and signing")]
#[command(version)]
struct Cli {
    /// Directory holding keygen_data_<i>.json fixtures
    #[arg(short, long, env = "FIXTURE_DIR", default_value = DEFAULT_FIXTURE_DIR)]
    dest: PathBuf,

    /// Abort a run that has not finished after this many seconds
    #[arg(long, env = "RUN_TIMEOUT_SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation for all parties
    Keygen {
        /// Number of parties (prompted if omitted)
        #[arg(short, long)]
        n: Option<usize>,

        /// Threshold: t + 1 parties are needed to sign (prompted if omitted)
        #[arg(short, long)]
        t: Option<usize>,
    },

    /// Sign a message with parties chosen on stdin
    Sign {
        /// Message to sign; it is hashed with SHA-256
        #[arg(short, long)]
        message: String,

        /// Threshold the fixtures were generated with
        #[arg(short, long, env = "THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
        threshold: usize,
    },

    /// Show one fixture
    Info {
        /// Fixture index
        #[arg(short, long)]
        index: usize,
    },

    /// Show the joint public key and its Ethereum address
    Address,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let store = FixtureStore::new(&cli.dest);
    let mut config = RunConfig::default();
    if let Some(secs) = cli.timeout {
        config = config.with_deadline(Duration::from_secs(secs));
    }

    match cli.command {
        Commands::Keygen { n, t } => {
            run_keygen(&store, &config, n, t).await?;
        }
        Commands::Sign { ref message, threshold } => {
            run_sign(&store, &config, message, threshold).await?;
        }
        Commands::Info { index } => {
            show_info(&store, index)?;
        }
        Commands::Address => {
            show_address(&store)?;
        }
    }

    Ok(())
}

async fn run_keygen(
    store: &FixtureStore,
    config: &RunConfig,
    n: Option<usize>,
    t: Option<usize>,
) -> Result<()> {
    let n = match n {
        Some(n) => n,
        None => prompt_number("Enter the number of participants", DEFAULT_PARTIES)?,
    };
    let t = match t {
        Some(t) => t,
        None => prompt_number("Enter the threshold", DEFAULT_THRESHOLD)?,
    };

    info!(n_parties = n, threshold = t, dest = ?store.dir(), "Starting DKG");

    let report = keygen::run_keygen(n, t, store, config).await?;

    for (index, outcome) in &report.saved {
        match outcome {
            SaveOutcome::Written(path) => println!("Party {}: saved {}", index, path.display()),
            SaveOutcome::AlreadyPresent(path) => {
                println!("Party {}: kept existing {}", index, path.display())
            }
        }
    }
    if let Some(public_key) = report.public_key() {
        println!("Public Key: {}", hex::encode(public_key));
    }

    Ok(())
}

async fn run_sign(
    store: &FixtureStore,
    config: &RunConfig,
    message: &str,
    threshold: usize,
) -> Result<()> {
    let target = threshold + 1;
    info!(message, signers = target, "Assembling signing session");

    let signers = SessionBuilder::new(store, target).build(prompt_lines(JOIN_PROMPT), |event| {
        match event {
            Feedback::Joined(index) => println!("User {} joined.", index),
            Feedback::Revoked(index) => println!("User {} revoked.", index),
            Feedback::Rejected(reason) => println!("{}", reason),
        }
    })?;

    let result = sign::sign_message(signers, message, config).await?;

    println!("Signature:");
    println!("  r: {}", result.r);
    println!("  s: {}", result.s);
    println!("  v: {}", result.v);

    Ok(())
}

fn show_info(store: &FixtureStore, index: usize) -> Result<()> {
    let key_share = store.load_required(index)?;

    println!("Key Share Info:");
    println!("  Party Index: {}", key_share.party_index);
    println!("  Share ID: {}", key_share.share_id);
    println!("  N Parties: {}", key_share.n_parties);
    println!("  Threshold: {}", key_share.threshold);
    println!("  Public Key: {}", hex::encode(&key_share.public_key));
    println!("  Chain Code: {}", hex::encode(key_share.chain_code));

    Ok(())
}

fn show_address(store: &FixtureStore) -> Result<()> {
    let public_key = store.load_public_key()?;
    let address = ethereum_address(&public_key)?;

    println!("Public Key: {}", hex::encode(&public_key));
    println!("Address: {}", address);

    Ok(())
}

fn prompt_number(prompt: &str, default: usize) -> Result<usize> {
    print!("{} [{}]: ", prompt, default);
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("stdin closed while reading {:?}", prompt);
    }
    let line = line.trim();
    if line.is_empty() {
        return Ok(default);
    }
    line.parse()
        .with_context(|| format!("{:?} is not a valid number", line))
}
