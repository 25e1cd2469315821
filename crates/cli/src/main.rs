mod skills_commands;

use std::{path::PathBuf, time::Duration};

use {
    alder_skills::{Collaborators, LifecycleOrchestrator, SkillFactories},
    clap::{Parser, Subcommand},
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

const FULL_HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "alder", about = "Alder, skill lifecycle host for the voice assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/alder/).
    #[arg(long, global = true, env = "ALDER_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "ALDER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the skills and keep them running (default when no subcommand is provided).
    Run,
    /// Skill management.
    Skills {
        #[command(subcommand)]
        action: skills_commands::SkillAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Build the orchestrator from the discovered configuration.
pub(crate) fn orchestrator() -> anyhow::Result<LifecycleOrchestrator> {
    let config = alder_config::discover_and_load();
    let factories = SkillFactories::new().with_declarative_fallback();
    let collaborators = Collaborators::github(&config, factories);
    Ok(LifecycleOrchestrator::new(&config, collaborators)?)
}

async fn run() -> anyhow::Result<()> {
    let orchestrator = orchestrator()?;

    let intents = match orchestrator.start().await {
        Ok(intents) => intents,
        Err(e) => {
            error!(error = %e, "cannot start skills");
            orchestrator.stop().await;
            return Err(e.into());
        },
    };
    info!(intents = intents.len(), "alder running");
    orchestrator.booted().await;

    let mut hourly = tokio::time::interval_at(tokio::time::Instant::now() + FULL_HOUR, FULL_HOUR);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "cannot listen for shutdown signal");
                }
                break;
            },
            _ = hourly.tick() => {
                orchestrator.on_full_hour().await;
            },
        }
    }

    info!("shutting down");
    orchestrator.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(ref dir) = cli.config_dir {
        alder_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        alder_config::set_data_dir(dir.clone());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "alder starting");

    match cli.command {
        None | Some(Commands::Run) => run().await,
        Some(Commands::Skills { action }) => skills_commands::handle_skills(action).await,
    }
}
