//! murmur CLI
//!
//! Secret handshake and encrypted chat over replicated append-only logs

mod chat;
mod config;

use clap::{Parser, Subcommand};
use murmur_core::{KeyPair, capability_keyed, capability_with};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;

/// murmur - authenticated, capability-scoped channels between two peers
#[derive(Parser)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity keypair
    Keygen {
        /// Output file for the identity seed
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a new shared secret
    Secret,

    /// Print the token for a capability name
    Capability {
        /// Capability name
        #[arg(required = true)]
        name: String,

        /// Hash the name as given, without normalizing whitespace
        #[arg(long)]
        raw: bool,

        /// Derive a keyed token (hex, 32 bytes)
        #[arg(long)]
        key: Option<String>,
    },

    /// Wait for a peer and chat with it
    Listen {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:7420")]
        bind: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Connect to a listening peer and chat with it
    Dial {
        /// Peer address
        #[arg(short, long, default_value = "127.0.0.1:7420")]
        addr: String,

        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Shared secret (hex, 32 bytes)
    #[arg(short, long)]
    secret: Option<String>,

    /// Capability to declare (repeatable)
    #[arg(long = "capability")]
    capabilities: Vec<String>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if let Commands::Listen { session, .. } | Commands::Dial { session, .. } = &cli.command {
        config.apply_flags(session.secret.clone(), session.capabilities.clone());
    }
    config.validate()?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen { output } => generate_keypair(output)?,
        Commands::Secret => generate_secret()?,
        Commands::Capability { name, raw, key } => print_capability(&name, raw, key.as_deref())?,
        Commands::Listen { bind, .. } => chat::listen(&bind, &config).await?,
        Commands::Dial { addr, .. } => chat::dial(&addr, &config).await?,
    }

    Ok(())
}

/// Generate a new identity keypair
fn generate_keypair(output: Option<PathBuf>) -> anyhow::Result<()> {
    let identity = KeyPair::random();
    let seed = zeroize::Zeroizing::new(hex::encode(identity.to_seed()));

    println!("Public key: {}", hex::encode(identity.public_bytes()));

    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, seed.as_bytes())?;
        println!("Identity seed saved to: {}", path.display());
        println!("Use it as `identity` in the [connection] section of the config file.");
    } else {
        println!("Identity seed: {}", seed.as_str());
    }

    Ok(())
}

/// Generate a new shared secret
fn generate_secret() -> anyhow::Result<()> {
    let secret = zeroize::Zeroizing::new(murmur_crypto::random::random_32()?);
    println!("{}", hex::encode(*secret));
    Ok(())
}

/// Print a capability token
fn print_capability(name: &str, raw: bool, key: Option<&str>) -> anyhow::Result<()> {
    let token = match key {
        Some(key) => {
            let key: [u8; 32] = hex::decode(key)?
                .try_into()
                .map_err(|_| anyhow::anyhow!("capability key must be 32 bytes"))?;
            capability_keyed(name, &key, !raw)?
        }
        None => capability_with(name, !raw)?,
    };
    println!("{token}");
    Ok(())
}
