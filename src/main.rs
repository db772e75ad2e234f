//! bridge-relay (v1)
//!
//! Publishes a message on the source ledger and returns the attestation
//! the guardian network produces for it.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────────┐
//!                  │                   BRIDGE RELAY                    │
//!                  │                                                   │
//!  send / POST     │  ┌─────────┐   ┌─────────┐   ┌────────────┐      │
//!  ────────────────┼─▶│ builder │──▶│ signing │──▶│ submission │──────┼──▶ Ledger RPC
//!                  │  └─────────┘   └─────────┘   └─────┬──────┘      │
//!                  │                                    ▼             │
//!                  │                             ┌──────────────┐     │
//!                  │                             │ confirmation │◀────┼─── status polls
//!                  │                             └──────┬───────┘     │
//!                  │                                    ▼             │
//!  artifact        │                             ┌──────────────┐     │
//!  ◀───────────────┼─────────────────────────────│ attestation  │◀────┼─── Guardian API
//!                  │                             └──────────────┘     │
//!                  │                                                   │
//!                  │  config · observability · resilience (retry)      │
//!                  └───────────────────────────────────────────────────┘
//! ```
//!
//! # Commands
//! - `send`: relay one payload and print its artifacts
//! - `serve`: run the HTTP API
//! - `resume`: poll again for the attestation of a finalized message
//! - `keygen`: print a new signing key

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bridge_relay::attestation::{AttestationService, GuardianRestClient, MessageFingerprint};
use bridge_relay::chain::wallet::SIGNER_KEY_ENV_VAR;
use bridge_relay::chain::{ChainClient, Identity, LocalSigner, RpcChainClient, Signer, SimulatedLedger};
use bridge_relay::config::{load_config, RelayConfig};
use bridge_relay::http::jobs::{ArtifactView, ErrorView};
use bridge_relay::http::{AppState, JobRegistry};
use bridge_relay::observability::{logging, metrics};
use bridge_relay::relay::{RelayOrchestrator, RelaySettings, RelayStage};
use bridge_relay::ApiServer;

#[derive(Parser)]
#[command(name = "bridge-relay", version)]
#[command(about = "Relay messages from the source ledger to the attestation network", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-memory ledger and attestation network
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay a payload and print its attestation artifacts
    Send {
        /// Message payload (UTF-8 unless --base64)
        payload: String,
        /// Destination account (base58)
        destination: String,
        /// Treat the payload as base64
        #[arg(long)]
        base64: bool,
    },
    /// Run the HTTP API
    Serve,
    /// Poll for the attestation of an already finalized message
    Resume {
        /// Emitter account (base58)
        #[arg(long)]
        emitter: String,
        #[arg(long)]
        sequence: u64,
        /// Emitter chain id; defaults to the configured one
        #[arg(long)]
        chain: Option<u16>,
    },
    /// Generate a signing key
    Keygen,
}

struct Backends {
    chain: Arc<dyn ChainClient>,
    attestations: Arc<dyn AttestationService>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Keygen = cli.command {
        let signer = LocalSigner::generate();
        println!("identity: {}", signer.public_identity());
        println!("{}={}", SIGNER_KEY_ENV_VAR, signer.secret_base58());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), simulate = cli.simulate, "bridge-relay starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let backends = connect_backends(&config, cli.simulate).await?;
    let settings = RelaySettings::from_config(&config)?;
    let orchestrator = Arc::new(RelayOrchestrator::new(
        backends.chain,
        backends.attestations,
        settings,
    ));

    match cli.command {
        Commands::Send {
            payload,
            destination,
            base64,
        } => {
            let payload = if base64 {
                BASE64.decode(payload.as_bytes())?
            } else {
                payload.into_bytes()
            };
            let signer = load_signer(cli.simulate)?;
            send(&orchestrator, signer.as_ref(), &payload, &destination).await?;
        }
        Commands::Serve => {
            let signer = load_signer(cli.simulate)?;
            let listener = TcpListener::bind(&config.server.bind_address).await?;
            let state = AppState {
                orchestrator,
                signer,
                jobs: JobRegistry::from_config(&config.server),
            };
            ApiServer::new(state, &config.server).run(listener).await?;
        }
        Commands::Resume {
            emitter,
            sequence,
            chain,
        } => {
            let fingerprint = MessageFingerprint {
                emitter_chain: chain.unwrap_or(config.chain.emitter_chain),
                emitter: emitter.parse::<Identity>()?,
                sequence,
            };
            match orchestrator.resume_attestation(&fingerprint).await {
                Ok(artifact) => print_json(&ArtifactView::from(&artifact))?,
                Err(e) => {
                    eprintln!("{}", serde_json::to_string_pretty(&ErrorView::from(&e))?);
                    return Err(e.into());
                }
            }
        }
        Commands::Keygen => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn connect_backends(
    config: &RelayConfig,
    simulate: bool,
) -> Result<Backends, Box<dyn std::error::Error>> {
    if simulate {
        tracing::warn!("Using the simulated ledger; nothing leaves this process");
        let ledger = Arc::new(SimulatedLedger::new(config.chain.emitter_chain));
        return Ok(Backends {
            chain: ledger.clone(),
            attestations: ledger,
        });
    }

    let chain = RpcChainClient::new(config.chain.clone())?;
    if !chain.is_healthy().await {
        tracing::warn!(rpc_url = %config.chain.rpc_url, "Ledger RPC is not reachable yet");
    }
    let attestations = GuardianRestClient::new(&config.attestation)?;
    Ok(Backends {
        chain: Arc::new(chain),
        attestations: Arc::new(attestations),
    })
}

fn load_signer(simulate: bool) -> Result<Arc<dyn Signer>, Box<dyn std::error::Error>> {
    match LocalSigner::from_env() {
        Ok(signer) => {
            tracing::info!(identity = %signer.public_identity(), "Signer loaded");
            Ok(Arc::new(signer))
        }
        Err(e) if simulate => {
            tracing::warn!(error = %e, "No signer key; using a throwaway key");
            Ok(Arc::new(LocalSigner::generate()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn send(
    orchestrator: &RelayOrchestrator,
    signer: &dyn Signer,
    payload: &[u8],
    destination: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping relay");
                cancel.cancel();
            }
        })
    };

    let observer = |stage: &RelayStage| eprintln!("[{}]", stage);
    let result = orchestrator
        .relay_with(Uuid::new_v4(), payload, destination, signer, &observer, &cancel)
        .await;
    interrupt.abort();

    match result {
        Ok(artifacts) => print_json(&artifacts.iter().map(ArtifactView::from).collect::<Vec<_>>()),
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&ErrorView::from(&e))?);
            Err(e.into())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
