//! # Telemetry Agent CLI
//!
//! Command-line tool for agent operations:
//! - Provision this device against the controller
//! - Show stored device identity and credential
//! - Collect a one-off metric batch
//! - Run the long-lived collection and dispatch loop
//!
//! ## Usage
//!
//! ```bash
//! # Bootstrap against the controller
//! telemetry-agent provision --controller controller.example --root-cert ./root.pem
//!
//! # Show device identity
//! telemetry-agent show
//!
//! # Queue one batch and push it immediately
//! telemetry-agent collect --family network_usage --labels rx_bytes=1024,tx_bytes=256
//!
//! # Run the periodic dispatch loop
//! telemetry-agent run --period 900
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use telemetry_agent::{
    BootstrapProtocol, CredentialStore, FileKeyStore, IdentityStore, MetricsDispatcher,
    MetricsManager, MetricsQueue, SecureKeyStore, TlsChannelOpener, TrustAnchor,
};
use shared::{
    config::AgentConfig,
    constants::GATEWAY_KEY_ALIAS,
    types::LabelPair,
};

#[derive(Parser)]
#[command(name = "telemetry-agent")]
#[command(about = "Device telemetry agent with certificate bootstrap")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Controller host name
    #[arg(long)]
    controller: Option<String>,

    /// Controller port
    #[arg(long)]
    port: Option<u16>,

    /// Path to the controller root certificate (PEM)
    #[arg(long)]
    root_cert: Option<PathBuf>,

    /// Path for agent data storage
    #[arg(long)]
    storage: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap this device and install a client certificate
    Provision,

    /// Show stored device identity and credential state
    Show,

    /// Collect one metric batch and push it immediately
    Collect {
        /// Metric family name
        #[arg(long, short = 'f')]
        family: String,

        /// Label pairs (comma-separated name=value)
        #[arg(long, short = 'l', default_value = "")]
        labels: String,
    },

    /// Run the periodic collection and dispatch loop
    Run {
        /// Seconds between dispatch cycles
        #[arg(long)]
        period: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    // Build config: environment first, then flags on top
    let mut config = AgentConfig::from_env()?;
    if let Some(address) = cli.controller {
        config.controller.address = address;
    }
    if let Some(port) = cli.port {
        config.controller.port = port;
    }
    if let Some(path) = cli.root_cert {
        config.controller.root_cert_path = path;
    }
    if let Some(path) = cli.storage {
        config.storage.data_path = path;
    }
    if let Commands::Run {
        period: Some(period),
    } = &cli.command
    {
        config.dispatch.period_secs = *period;
    }
    config.validate()?;

    match cli.command {
        Commands::Provision => {
            provision(&config).await?;
        }
        Commands::Show => {
            show(&config).await?;
        }
        Commands::Collect { family, labels } => {
            collect(&config, &family, &labels).await?;
        }
        Commands::Run { .. } => {
            run(&config).await?;
        }
    }

    Ok(())
}

struct Agent {
    identity: shared::types::DeviceIdentity,
    credentials: Arc<CredentialStore>,
    opener: Arc<TlsChannelOpener>,
}

/// Assemble the keystore, identity, trust anchor, and credential store
async fn open_agent(config: &AgentConfig) -> Result<Agent> {
    let keystore: Arc<dyn SecureKeyStore> = Arc::new(FileKeyStore::open(&config.storage).await?);

    let identity = IdentityStore::new(keystore.clone())
        .get_or_create_identity()
        .await?;

    let root_pem = tokio::fs::read(&config.controller.root_cert_path).await?;
    let trust_anchor = TrustAnchor::from_pem(&root_pem)?;

    let opener = Arc::new(TlsChannelOpener::new(
        config.controller.address.clone(),
        config.controller.port,
        trust_anchor,
        config.tls.handshake_timeout_secs,
    ));

    let credentials = Arc::new(CredentialStore::new(keystore, GATEWAY_KEY_ALIAS));
    credentials.load_persisted().await?;

    Ok(Agent {
        identity,
        credentials,
        opener,
    })
}

async fn provision(config: &AgentConfig) -> Result<()> {
    let agent = open_agent(config).await?;

    if agent.credentials.current().is_some() {
        println!("Device already provisioned.");
        println!("  Device ID: {}", agent.identity.device_id);
        return Ok(());
    }

    info!(endpoint = %config.controller.endpoint(), "Provisioning device");

    let protocol = BootstrapProtocol::new(
        agent.identity.clone(),
        agent.opener,
        agent.credentials,
        GATEWAY_KEY_ALIAS,
    );
    let credential = protocol.bootstrap().await?;

    println!("\n✓ Device provisioned!");
    println!("  Device ID: {}", agent.identity.device_id);
    println!(
        "  Certificate chain: {} certificate(s)",
        credential.certificate_chain.len()
    );
    println!("  Installed: {}", credential.installed_at);

    Ok(())
}

async fn show(config: &AgentConfig) -> Result<()> {
    let agent = open_agent(config).await?;

    println!("\nDevice Identity:");
    println!("  Device ID: {}", agent.identity.device_id);
    println!("  Public key: {}", agent.identity.public_key_hex);
    println!("  Created: {}", agent.identity.created_at);

    match agent.credentials.current() {
        Some(credential) => {
            println!("\nCredential:");
            println!("  Alias: {}", credential.alias);
            println!(
                "  Certificate chain: {} certificate(s)",
                credential.certificate_chain.len()
            );
            println!("  Installed: {}", credential.installed_at);
        }
        None => {
            println!("\nNo credential installed.");
            println!("Run 'telemetry-agent provision' to bootstrap this device.");
        }
    }

    Ok(())
}

async fn collect(config: &AgentConfig, family: &str, labels: &str) -> Result<()> {
    let agent = open_agent(config).await?;

    let labels: Vec<LabelPair> = labels
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => Ok(LabelPair::new(name.trim(), value.trim())),
            None => Err(anyhow::anyhow!("label must be name=value, got '{}'", pair)),
        })
        .collect::<Result<_>>()?;

    let queue = Arc::new(MetricsQueue::new());
    let manager = MetricsManager::new(agent.identity.device_id, queue.clone());
    let batch = manager.collect(family, labels);

    println!("Queued batch '{}' with {} labels", batch.family_name, batch.labels.len());

    let dispatcher = MetricsDispatcher::new(
        queue,
        agent.credentials,
        agent.opener,
        std::time::Duration::from_secs(config.dispatch.period_secs),
    );

    match dispatcher.run_cycle().await {
        telemetry_agent::metrics::DispatchOutcome::Sent(n) => {
            println!("✓ Pushed {} batch(es)", n);
        }
        outcome => {
            println!("Push did not complete: {:?}", outcome);
        }
    }

    Ok(())
}

async fn run(config: &AgentConfig) -> Result<()> {
    let agent = open_agent(config).await?;

    // Bootstrap first if this device has never been provisioned.
    if agent.credentials.current().is_none() {
        info!("No credential installed, bootstrapping first");
        let protocol = BootstrapProtocol::new(
            agent.identity.clone(),
            agent.opener.clone(),
            agent.credentials.clone(),
            GATEWAY_KEY_ALIAS,
        );
        protocol.bootstrap().await?;
    }

    let queue = Arc::new(MetricsQueue::new());
    let dispatcher = Arc::new(MetricsDispatcher::new(
        queue.clone(),
        agent.credentials,
        agent.opener,
        std::time::Duration::from_secs(config.dispatch.period_secs),
    ));

    println!("✓ Agent running");
    println!("  Device ID: {}", agent.identity.device_id);
    println!("  Dispatch period: {}s", config.dispatch.period_secs);

    let handle = dispatcher.spawn();
    handle.await?;

    Ok(())
}
