//! Wallet session manager CLI
//!
//! Inspect configuration and pairing URIs, or run a scripted peer session against the
//! in-process relay.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wc_session_manager::approval::{
    ApprovalDecision, ApprovalSurface, TerminalApprovalSurface,
};
use wc_session_manager::audit::SessionAuditLog;
use wc_session_manager::capability::{EvmCapabilityProvider, PRIVATE_KEY_ENV};
use wc_session_manager::relay::{LoopbackConnector, LoopbackRelay};
use wc_session_manager::store::{FileSessionStore, MemorySessionStore, SessionStore};
use wc_session_manager::{demo, Config, Error, PairingUri, Result, SessionManager};

#[derive(Parser)]
#[command(name = "wc-session")]
#[command(about = "Wallet peer-session pairing and negotiation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,

    /// Parse a pairing URI and show what it points at
    InspectUri {
        /// The `wc:` URI shown by the dapp
        uri: String,
    },

    /// Pair with a scripted peer over the in-process relay
    Demo {
        /// Approve the connection without asking
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the connection without asking
        #[arg(long)]
        reject: bool,

        /// Message the peer asks the wallet to sign
        #[arg(short, long, default_value = "Hello from wc-session")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load config
    let config = if let Some(config_path) = cli.config {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::Config(format!("{}: {}", config_path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::InspectUri { uri } => {
            inspect_uri(&uri)?;
        }
        Commands::Demo {
            approve,
            reject,
            message,
        } => {
            let decision = if approve {
                Some(ApprovalDecision::Approved)
            } else if reject {
                Some(ApprovalDecision::Rejected)
            } else {
                None
            };
            run_demo(config, decision, &message).await?;
        }
    }

    Ok(())
}

fn inspect_uri(uri: &str) -> Result<()> {
    let uri = PairingUri::parse(uri)?;
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();

    let summary = serde_json::json!({
        "topic": uri.topic,
        "version": uri.version,
        "relay_protocol": uri.relay_protocol,
        "sym_key": "[REDACTED]",
        "expiry_timestamp": uri.expiry_timestamp,
        "expired": uri.is_expired(now),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_demo(config: Config, decision: Option<ApprovalDecision>, message: &str) -> Result<()> {
    tracing::info!(
        chain_id = %config.chain_id,
        relay_url = %config.relay.relay_url,
        "Starting demo session"
    );

    let relay = Arc::new(LoopbackRelay::new());

    let approvals: Arc<dyn ApprovalSurface> = match decision {
        Some(decision) => Arc::new(demo::auto_approval(decision)),
        None => Arc::new(TerminalApprovalSurface::new()),
    };

    let store: Arc<dyn SessionStore> = match &config.session_store_path {
        Some(path) => Arc::new(FileSessionStore::new(path)),
        None => Arc::new(MemorySessionStore::new()),
    };

    let mut builder = SessionManager::builder(config.clone())
        .relay(Arc::new(LoopbackConnector::new(Arc::clone(&relay))))
        .capabilities(Arc::new(EvmCapabilityProvider::new(
            PRIVATE_KEY_ENV,
            config.chain_id.clone(),
        )))
        .approvals(approvals)
        .store(store);
    if let Some(path) = &config.audit_log_path {
        builder = builder.audit_log(SessionAuditLog::new(path));
    }
    let manager = builder.build()?;

    let report = demo::run(&manager, relay, message).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
