//! TSS Party CLI
//!
//! Command-line interface for running one party of a ceremony:
//! - Distributed Key Generation
//! - Key Resharing and Migration
//! - Distributed Signing

mod store;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use msg_relay_client::RelayClient;
use std::path::PathBuf;
use std::sync::Arc;
use store::FileKeyShareStore;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use tss_core::codec::EncryptionKey;
use tss_core::committee::reshare_indices;
use tss_core::native::{Engine, SimEngine};
use tss_core::session::{announce, wait_for_committee, wait_for_participants};
use tss_core::transport::MessageTransport;
use tss_core::{
    sign_messages, CeremonyConfig, Keygen, Migrate, PartyId, Reshare, SessionParams,
    SessionRunner, Signature,
};

/// TSS Party - threshold ceremony node
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Threshold signing party node")]
#[command(version)]
struct Cli {
    /// Relay service URL
    #[arg(short, long, env = "RELAY_URL", default_value = "http://127.0.0.1:8080")]
    relay: String,

    /// Local party ID
    #[arg(short, long, env = "PARTY_ID")]
    party: String,

    /// Session ID, generated by the initiator when omitted
    #[arg(short, long, env = "SESSION_ID")]
    session: Option<String>,

    /// Hex-encoded 32-byte session key, generated by the initiator when omitted
    #[arg(short, long, env = "ENCRYPTION_KEY")]
    key: Option<String>,

    /// Data directory for key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    /// Author the setup message and fix the committee
    #[arg(short, long)]
    initiator: bool,

    /// Setup-message namespace of the engine
    #[arg(long)]
    namespace: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation
    Keygen {
        /// Committee party IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        committee: Vec<String>,
    },

    /// Move a key to a new committee
    Reshare {
        /// Current committee (comma-separated)
        #[arg(long, value_delimiter = ',')]
        old: Vec<String>,

        /// New committee (comma-separated)
        #[arg(long, value_delimiter = ',')]
        new: Vec<String>,

        /// Public key of the reshared key (hex)
        #[arg(long)]
        public_key: String,
    },

    /// Turn an existing key into threshold shares
    Migrate {
        /// Committee party IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        committee: Vec<String>,

        /// Existing public key (hex)
        #[arg(long)]
        public_key: String,

        /// Existing chain code (hex)
        #[arg(long)]
        chain_code: String,

        /// This party's part of the existing secret (hex)
        #[arg(long, env = "MIGRATE_SECRET")]
        secret: String,
    },

    /// Sign one or more digests
    Sign {
        /// Signing committee (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        committee: Vec<String>,

        /// Public key of the signing key (hex)
        #[arg(long)]
        public_key: String,

        /// Digest to sign (hex), repeatable
        #[arg(short, long = "message", required = true)]
        messages: Vec<String>,

        /// Derivation path (e.g. m/44'/0'/0'/0/0)
        #[arg(long)]
        chain_path: Option<String>,
    },

    /// Show stored key shares
    Info,
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()));
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Native engine of this build, currently the simulated one
fn build_engine(namespace: Option<&str>) -> SimEngine {
    let engine = match namespace {
        Some(namespace) => SimEngine::with_namespace(namespace),
        None => SimEngine::new(),
    };
    warn!(
        engine = engine.name(),
        "Simulated native engine active, key shares and signatures are not production grade"
    );
    engine
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let store = FileKeyShareStore::new(&cli.dest, &cli.party)?;
    let engine = Arc::new(build_engine(cli.namespace.as_deref()));

    match &cli.command {
        Commands::Keygen { committee } => {
            let runner = session(&cli, committee).await?;
            let share = runner.run(&Keygen::new(engine)).await?;
            let path = store.save(&share)?;
            info!(public_key = %share.public_key, path = ?path, "Keygen completed, key share saved");
            println!("Public Key: {}", share.public_key);
        }
        Commands::Reshare {
            old,
            new,
            public_key,
        } => {
            let union = reshare_indices(old, new)?.all_parties;
            let ceremony = Reshare::new(engine, &store, public_key, &cli.party, old, new)?;
            let runner = session(&cli, &union).await?;
            match runner.run(&ceremony).await? {
                Some(share) => {
                    let path = store.save(&share)?;
                    info!(path = ?path, "Reshare completed, key share saved");
                    println!("Public Key: {}", share.public_key);
                }
                None => println!("Left the committee of {public_key}"),
            }
        }
        Commands::Migrate {
            committee,
            public_key,
            chain_code,
            secret,
        } => {
            let secret = hex::decode(secret).context("secret is not hex")?;
            let ceremony = Migrate::new(engine, public_key, chain_code, secret)?;
            let runner = session(&cli, committee).await?;
            let share = runner.run(&ceremony).await?;
            let path = store.save(&share)?;
            info!(path = ?path, "Migration completed, key share saved");
            println!("Public Key: {}", share.public_key);
        }
        Commands::Sign {
            committee,
            public_key,
            messages,
            chain_path,
        } => {
            let runner = session(&cli, committee).await?;
            let signatures = sign_messages(
                engine,
                &store,
                &runner,
                public_key,
                messages,
                chain_path.as_deref(),
            )
            .await?;
            for (message, signature) in messages.iter().zip(&signatures) {
                print_signature(message, signature);
            }
        }
        Commands::Info => show_info(&store)?,
    }

    Ok(())
}

/// Join the session and agree on the committee
async fn session(cli: &Cli, committee: &[PartyId]) -> Result<SessionRunner> {
    let config = CeremonyConfig::default();
    let transport: Arc<dyn MessageTransport> = Arc::new(RelayClient::new(&cli.relay));

    let (session_id, key) = match (&cli.session, &cli.key) {
        (Some(session), Some(key)) => (session.clone(), key.clone()),
        _ if cli.initiator => {
            let session = cli
                .session
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let key = cli
                .key
                .clone()
                .unwrap_or_else(|| EncryptionKey::random().to_hex());
            println!("Session ID: {session}");
            println!("Encryption Key: {key}");
            (session, key)
        }
        _ => bail!("--session and --key are required unless --initiator is set"),
    };

    announce(transport.as_ref(), &session_id, &cli.party).await?;
    let committee = if cli.initiator {
        wait_for_participants(transport.as_ref(), &session_id, committee, &config).await?;
        transport
            .start_with_committee(&session_id, committee)
            .await?;
        committee.to_vec()
    } else {
        wait_for_committee(transport.as_ref(), &session_id, &config).await?
    };

    info!(session_id = %session_id, committee = ?committee, "Session assembled");
    let params = SessionParams::new(
        &cli.relay,
        session_id,
        cli.party.clone(),
        committee,
        &key,
        cli.initiator,
    )?;
    Ok(SessionRunner::new(transport, params, config))
}

fn print_signature(message: &str, signature: &Signature) {
    println!("Signature for {message}:");
    match signature {
        Signature::Ecdsa(sig) => {
            println!("  r: {}", hex::encode(sig.r));
            println!("  s: {}", hex::encode(sig.s));
            println!("  v: {}", sig.recovery_id);
            println!("  DER: {}", hex::encode(&sig.der));
        }
        Signature::Raw(bytes) => println!("  {}", hex::encode(bytes)),
    }
}

fn show_info(store: &FileKeyShareStore) -> Result<()> {
    let shares = store.list()?;
    if shares.is_empty() {
        println!("No key shares stored");
    }
    for share in shares {
        println!("Key Share:");
        println!("  Public Key: {}", share.public_key);
        println!(
            "  Chain Code: {}",
            share.chain_code.as_deref().unwrap_or("-")
        );
        println!("  Size: {} bytes", share.share.len());
    }
    Ok(())
}
