use anyhow::Result;
use api_logger::config;
use api_logger::store::{LogDb, Period, Statistics};
use colored::Colorize;
use std::path::Path;

use super::format_number;

/// Execute the stats command
pub async fn execute(config_path: &Path, period: &str, format: &str) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let db = LogDb::open(&cfg.database).await?;
    let stats = db.statistics(Period::parse(period)).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        "text" => print_stats(&stats),
        other => anyhow::bail!("Invalid format '{}': expected 'text' or 'json'", other),
    }

    Ok(())
}

fn print_stats(stats: &Statistics) {
    println!(
        "{}",
        format!("API Log Statistics (last {})", stats.period).bold().underline()
    );
    println!();
    println!("{:<30} {:>15}", "Total Requests:", format_number(stats.total_requests));
    println!(
        "{:<30} {:>15}",
        "Successful (2xx):",
        format_number(stats.successful_requests).green()
    );
    println!(
        "{:<30} {:>15}",
        "Errors (4xx/5xx):",
        format_number(stats.error_requests).red()
    );
    println!(
        "{:<30} {:>15}",
        "Average Response Time:",
        format!("{:.2}ms", stats.average_response_time)
    );

    if let Some(ref slowest) = stats.slowest_request {
        println!();
        println!("{}", "Slowest Request".bold());
        println!(
            "  {} {} ({:.2}ms, {})",
            slowest.method.cyan(),
            slowest.url,
            slowest.response_time_ms,
            slowest.response_status
        );
    }

    if !stats.most_common_endpoints.is_empty() {
        println!();
        println!("{}", "Most Common Endpoints".bold());
        for endpoint in &stats.most_common_endpoints {
            println!("  {:>8}  {}", format_number(endpoint.count), endpoint.url);
        }
    }

    if !stats.status_code_distribution.is_empty() {
        println!();
        println!("{}", "Status Codes".bold());
        for entry in &stats.status_code_distribution {
            let status = entry.status.to_string();
            let status = if entry.status >= 400 { status.red() } else { status.green() };
            println!("  {}  {:>8}", status, format_number(entry.count));
        }
    }

    println!();
}
