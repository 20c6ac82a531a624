use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Serve => {
            commands::serve::execute(&args.config).await?;
        }
        cli::Commands::Clean { days, force } => {
            commands::clean::execute(&args.config, days, force).await?;
        }
        cli::Commands::Stats { period, format } => {
            commands::stats::execute(&args.config, &period, &format).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("API Logger v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
