//! # GrindClaw CLI
//!
//! Usage:
//!   grindclaw run                    # Agent, telemetry pushed per [telemetry]
//!   grindclaw run --with-gateway     # Agent plus the dashboard API in-process
//!   grindclaw run --dry-run          # Loopback transport, nothing leaves the box
//!   grindclaw gateway                # Dashboard API only
//!   grindclaw init                   # Write ~/.grindclaw/config.toml
//!   grindclaw config                 # Print the effective config

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grindclaw_agent::Agent;
use grindclaw_channels::{DiscordChannel, LoopbackChannel};
use grindclaw_core::config::{GrindClawConfig, TransportKind};
use grindclaw_core::traits::Transport;
use grindclaw_telemetry::{HistoryStore, HttpSink, StoreSink, TelemetrySink, TelemetrySync};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "grindclaw",
    version,
    about = "⚔️ GrindClaw: chat-game grinding agent with live telemetry"
)]
struct Cli {
    /// Config file (default: ~/.grindclaw/config.toml)
    #[arg(short, long, global = true, env = "GRINDCLAW_CONFIG")]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent
    Run {
        /// Chat session token
        #[arg(long, env = "GRINDCLAW_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Serve the telemetry gateway from this process
        #[arg(long)]
        with_gateway: bool,

        /// Use the loopback transport instead of the configured one
        #[arg(long)]
        dry_run: bool,
    },
    /// Start the telemetry gateway only
    Gateway,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config as TOML
    Config,
}

fn config_path(cli_path: Option<&str>) -> PathBuf {
    match cli_path {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => GrindClawConfig::default_path(),
    }
}

fn load_config(path: &std::path::Path) -> Result<GrindClawConfig> {
    if path.exists() {
        let config = GrindClawConfig::load_from(path)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    } else {
        tracing::info!("📄 No config at {}, using defaults", path.display());
        Ok(GrindClawConfig::default())
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Ctrl-C received, shutting down");
        }
        token.cancel();
    });
}

fn build_transport(
    config: &GrindClawConfig,
    token: Option<&str>,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Transport>> {
    if dry_run || config.agent.transport == TransportKind::Loopback {
        return Ok(Arc::new(LoopbackChannel::new()));
    }
    let token = token
        .filter(|t| !t.trim().is_empty())
        .context("No session token: set GRINDCLAW_TOKEN or pass --token")?;
    Ok(Arc::new(
        DiscordChannel::new(
            &config.agent.api_base,
            token,
            Duration::from_secs(config.agent.poll_interval_secs.max(1)),
        )
        .with_cancel(cancel.clone()),
    ))
}

async fn run_agent(
    mut config: GrindClawConfig,
    token: Option<String>,
    with_gateway: bool,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        config.agent.transport = TransportKind::Loopback;
        tracing::info!("🧪 Dry run: commands are logged, nothing is sent");
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let transport = build_transport(&config, token.as_deref(), dry_run, &cancel)?;

    let store = Arc::new(HistoryStore::new());
    let telemetry = &config.telemetry;
    let sink: Arc<dyn TelemetrySink> = if telemetry.endpoint.trim().is_empty() {
        Arc::new(StoreSink::new(store.clone()))
    } else {
        if with_gateway {
            tracing::warn!(
                "⚠️ telemetry.endpoint is set, the embedded gateway will not see this agent's pushes"
            );
        }
        let pairing = Some(telemetry.token.clone()).filter(|t| !t.is_empty());
        Arc::new(HttpSink::new(
            &telemetry.endpoint,
            pairing,
            Duration::from_secs(telemetry.request_timeout_secs),
        )?)
    };
    tracing::info!("📊 Telemetry → {}", sink.name());

    let agent = Agent::new(config.clone(), transport);
    let handle = agent.handle();

    // Outlives the agent so the final push sees the drained counters.
    let sync_cancel = CancellationToken::new();
    let (sync, push_task) = TelemetrySync::spawn(
        sink,
        Duration::from_secs(telemetry.push_interval_secs),
        telemetry.queue_size,
        move || handle.counters_record(),
        sync_cancel.clone(),
    );

    let gateway = with_gateway.then(|| {
        let gateway_config = config.gateway.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { grindclaw_gateway::start(&gateway_config, store, cancel).await })
    });

    let outcome = agent.with_telemetry(sync).run(cancel.clone()).await;
    if let Err(e) = &outcome {
        tracing::error!("❌ Agent halted: {e}");
    }

    cancel.cancel();
    sync_cancel.cancel();
    if let Err(e) = push_task.await {
        tracing::warn!("⚠️ Telemetry task ended abnormally: {e}");
    }
    if let Some(gateway) = gateway {
        match gateway.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("⚠️ Gateway stopped with error: {e}"),
            Err(e) => tracing::warn!("⚠️ Gateway task ended abnormally: {e}"),
        }
    }

    outcome.map_err(Into::into)
}

async fn run_gateway(config: GrindClawConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let store = Arc::new(HistoryStore::new());
    grindclaw_gateway::start(&config.gateway, store, cancel).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "grindclaw=debug,tower_http=debug"
    } else {
        "grindclaw=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let path = config_path(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            token,
            with_gateway,
            dry_run,
        } => {
            let config = load_config(&path)?;
            println!("⚔️ GrindClaw v{}", env!("CARGO_PKG_VERSION"));
            if with_gateway {
                println!(
                    "   📡 Dashboard API: http://{}:{}/api/v1/stats",
                    config.gateway.host, config.gateway.port
                );
            }
            run_agent(config, token, with_gateway, dry_run).await
        }
        Commands::Gateway => run_gateway(load_config(&path)?).await,
        Commands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            GrindClawConfig::default().save_to(&path)?;
            println!("✅ Config written to {}", path.display());
            println!("   Set agent.channel_id, then export GRINDCLAW_TOKEN and run `grindclaw run`.");
            Ok(())
        }
        Commands::Config => {
            let config = load_config(&path)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
