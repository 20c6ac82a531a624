use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "api-logger", version, about = "HTTP API request/response logger")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "api-logger.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Delete log records older than the given number of days
    Clean {
        /// Keep records from the last N days
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show aggregate statistics
    Stats {
        /// Lookback window: 1h, 24h, 7d, 30d
        #[arg(short, long, default_value = "24h")]
        period: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,

    /// Validate configuration file and compile the capture pipeline
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Serve if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}
