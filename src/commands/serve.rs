use anyhow::Result;
use api_logger::{config, init_tracing, server};
use colored::Colorize;
use std::path::Path;
use tracing::info;

/// Execute the serve command
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    println!(
        "{} {}:{}",
        "Starting API logger on".green(),
        cfg.server.host,
        cfg.server.port
    );
    info!(config = %config_path.display(), "Configuration loaded");

    server::start_server(cfg).await
}
