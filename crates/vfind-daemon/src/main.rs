//! vfindd - file manager connector daemon
//!
//! Usage:
//!   vfindd start [--listen ADDR] [--config FILE] [--volume NAME=PATH]...
//!   vfindd config
//!   vfindd volumes

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use vfind_config::logging::init_logging;
use vfind_config::{Config, VolumeConfig};
use vfind_core::volume_id;

/// Multi-volume file manager connector over HTTP
#[derive(Parser)]
#[command(name = "vfindd")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the connector (default)
    Start(StartArgs),

    /// Print a default configuration file
    Config,

    /// List the volumes that would be mounted
    Volumes {
        #[arg(long, env = "VFIND_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct StartArgs {
    /// Listen address, e.g. 127.0.0.1:8088
    #[arg(long)]
    listen: Option<String>,

    /// Configuration file (skips the global/project lookup)
    #[arg(long, env = "VFIND_CONFIG")]
    config: Option<PathBuf>,

    /// Volume to mount, NAME=PATH; repeatable, replaces configured volumes
    #[arg(long = "volume", value_name = "NAME=PATH")]
    volumes: Vec<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Config::load().context("Failed to load configuration"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Start(StartArgs::default())) {
        Commands::Start(args) => {
            let mut config = load_config(args.config.as_ref())?;
            if let Some(listen) = args.listen {
                config.server.listen = listen;
            }
            if !args.volumes.is_empty() {
                config.volumes = args
                    .volumes
                    .iter()
                    .map(|spec| VolumeConfig::parse(spec))
                    .collect::<Result<_, _>>()?;
            }
            config.validate()?;

            init_logging(config.server.log_level());
            vfind_daemon::run_server(config).await
        }
        Commands::Config => {
            print!("{}", Config::default_toml());
            Ok(())
        }
        Commands::Volumes { config } => {
            let config = load_config(config.as_ref())?;
            for volume in config.effective_volumes()? {
                println!(
                    "{:<16} {:<18} {}",
                    volume.name,
                    volume_id(&volume.name),
                    volume.path.display()
                );
            }
            Ok(())
        }
    }
}
