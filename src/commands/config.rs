use anyhow::Result;
use api_logger::capture::ApiLogger;
use api_logger::config;
use colored::Colorize;
use std::path::Path;
use tracing::info;

/// Execute the config show command
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}

/// Execute the config validate command
///
/// Besides parsing, compiles every pattern, path, IP and header name the
/// capture pipeline would use at startup.
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!(config = %config_path.display(), "Validating configuration file");

    let cfg = config::load_config(config_path)?;
    ApiLogger::validate(&cfg.logger)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Capture Enabled: {}", cfg.logger.enabled);
    println!(
        "  Persistence: {}",
        if cfg.logger.use_queue {
            format!("queued ({})", cfg.logger.queue_name)
        } else {
            "direct".to_string()
        }
    );
    println!("  Excluded Paths: {}", cfg.logger.excluded_paths.len());
    println!("  Sensitive Patterns: {}", cfg.logger.sensitive_patterns.len());
    match cfg.logger.retention_window() {
        Some(days) => println!(
            "  Retention: {} days (sweep at {:02}:00)",
            days, cfg.logger.cleanup_hour
        ),
        None => println!("  Retention: disabled"),
    }

    Ok(())
}
