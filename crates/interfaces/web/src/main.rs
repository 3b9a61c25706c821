mod app;
mod commands;
mod error;
mod handlers;
mod pages;
mod password;
mod session;
mod telemetry;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mindful_config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "mindful",
    version,
    about = "A supportive chat companion with per-user memory"
)]
struct Cli {
    /// Configuration file; defaults apply for anything it omits.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web server (default).
    Serve,
    /// Print the effective configuration and check the model server.
    Doctor,
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    /// Vector and transcript counts for one user.
    Stats {
        /// Username or user id.
        #[arg(long)]
        user: String,
    },
    /// Rebuild a user's vector index from their transcript.
    Reindex {
        /// Username or user id.
        #[arg(long)]
        user: String,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Write the default configuration to the `--config` path.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Some(Commands::Config {
        command: ConfigCommands::Init { force },
    }) = &cli.command
    {
        return commands::config_init(&cli.config, *force);
    }

    let config = AppConfig::load_from(&cli.config)?;
    let _log_guard = telemetry::init(&config.telemetry)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => app::serve(config).await,
        Commands::Doctor => commands::doctor(&config).await,
        Commands::Memory { command } => match command {
            MemoryCommands::Stats { user } => commands::memory_stats(&config, &user).await,
            MemoryCommands::Reindex { user } => commands::memory_reindex(&config, &user).await,
        },
        // Handled before the configuration is loaded.
        Commands::Config { .. } => Ok(()),
    }
}
