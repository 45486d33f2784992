mod commands;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use picocal_core::{DeviceRole, PicoCalConfig, RefreshTrigger};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "picocal")]
#[command(about = "Keep a month of daily goal flags in sync between a phone and a watch")]
struct Cli {
    /// Config file (default: ~/.config/picocal/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Act as this device, overriding the config (phone or watch)
    #[arg(long, global = true)]
    role: Option<DeviceRole>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refresh cycle and print the month
    Sync {
        /// What caused this refresh (user, scene or background)
        #[arg(long, default_value = "user")]
        trigger: RefreshTrigger,
    },
    /// Print the stored month without fetching anything
    Show,
    /// Listen for the peer and refresh periodically until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("picocal={0},picocal_core={0}", cli.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Sync { trigger } => commands::sync::run(&config, trigger).await,
        Commands::Show => commands::show::run(&config),
        Commands::Run => commands::run::run(&config).await,
    }
}

fn load_config(cli: &Cli) -> Result<PicoCalConfig> {
    let mut config = match &cli.config {
        Some(path) => PicoCalConfig::load_from(path)?,
        None => PicoCalConfig::load()?,
    };

    if let Some(role) = cli.role {
        config.role = role;
    }

    Ok(config)
}
