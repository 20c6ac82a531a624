use anyhow::{Context, Result};
use api_logger::config;
use api_logger::store::{LogDb, RetentionJob};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use super::format_number;

/// Execute the clean command
///
/// Deletes every record created strictly before `now - days`. Without
/// `--force` the user must confirm first; declining is not an error.
pub async fn execute(config_path: &Path, days: u32, force: bool) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let db = Arc::new(LogDb::open(&cfg.database).await?);
    let job = RetentionJob::new(db, days);

    let cutoff = job.cutoff(chrono::Utc::now());
    println!(
        "{} {} ({})",
        "Deleting API logs older than".yellow(),
        format!("{} days", days).bold(),
        cutoff.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if !force && !confirm("Do you want to continue?")? {
        println!("{}", "Operation cancelled.".dimmed());
        return Ok(());
    }

    let deleted = job.run().await.context("Cleanup failed")?;

    if deleted == 0 {
        println!("{}", "No old data to delete (all data within retention period)".dimmed());
    } else {
        println!(
            "{} {}",
            "✓ Deleted".green().bold(),
            format!("{} records", format_number(deleted)).green()
        );
    }

    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }
}
