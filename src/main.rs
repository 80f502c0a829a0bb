use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use buildbay::config::{DEFAULT_CONFIG_FILE, OrchestratorConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "buildbay")]
#[command(version, about = "Local build/deploy orchestrator for Android projects")]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ./buildbay.toml)
    #[arg(long, global = true, env = "BUILDBAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides [server].port and BUILDBAY_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable permissive CORS for a separately served front end
        #[arg(long)]
        dev: bool,
    },
    /// List buildable projects
    Projects,
    /// Print a project's current status record
    Status { project: String },
    /// Print a project's latest command output
    Logs { project: String },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = OrchestratorConfig::load(&config_path)?;

    let log_dir = matches!(cli.command, Commands::Serve { .. }).then(|| config.paths.state_dir.clone());
    let _log_guard = buildbay::logging::init(log_dir.as_deref(), cli.verbose);

    match cli.command {
        Commands::Serve { host, port, dev } => cmd::cmd_serve(config, host, port, dev).await?,
        Commands::Projects => cmd::cmd_projects(config)?,
        Commands::Status { project } => cmd::cmd_status(config, &project)?,
        Commands::Logs { project } => cmd::cmd_logs(config, &project)?,
        Commands::Config { command } => cmd::cmd_config(&config_path, &config, command)?,
    }

    Ok(())
}
