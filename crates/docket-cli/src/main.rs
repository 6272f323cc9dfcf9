use anyhow::Result;
use clap::{Parser, Subcommand};
use docket_infrastructure::{ConfigService, DocketPaths};
use std::path::PathBuf;
use tracing::debug;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Docket - real-time notification pipeline tools", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/docket/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `docket_application=trace` (overrides config and DOCKET_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write daily rolling log files (into ~/.config/docket/logs unless --log-dir is set)
    #[arg(long, global = true)]
    log_file: bool,

    /// Directory for the rolling log files; implies --log-file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a recorded event script through a full notification session
    Replay {
        /// JSON-lines script
        script: PathBuf,

        /// User the session is opened for
        #[arg(long)]
        user: String,

        /// Base URL of the chat REST API; the chat counter stays local without it
        #[arg(long)]
        chat_api: Option<String>,
    },
    /// Connect to the configured Socket.IO server and print changes as JSON lines
    Listen {
        /// User the session is opened for
        #[arg(long)]
        user: String,

        /// Base URL of the chat REST API (default: the endpoint base URL)
        #[arg(long)]
        chat_api: Option<String>,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let service = match &cli.config {
        Some(path) => ConfigService::with_path(path),
        None => ConfigService::new(),
    };
    let config = service.get_config()?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_dir = match cli.log_dir {
        Some(dir) => Some(dir),
        None if cli.log_file => Some(DocketPaths::logs_dir()?),
        None => None,
    };
    let _guard = logging::init(level, log_dir.as_deref())?;
    debug!("[Bootstrap] Config loaded from {}", service.config_path()?.display());

    match cli.command {
        Commands::Replay {
            script,
            user,
            chat_api,
        } => commands::replay::run(&config, &script, &user, chat_api.as_deref()).await?,
        Commands::Listen { user, chat_api } => {
            commands::listen::run(&config, &user, chat_api.as_deref()).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&config)?,
            ConfigAction::Path => commands::config::path(&service)?,
        },
    }

    Ok(())
}
