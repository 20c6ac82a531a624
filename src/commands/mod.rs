//! Command implementations for the CLI
//!
//! - serve: Start the HTTP server
//! - clean: Delete old log records
//! - stats: Print aggregate statistics
//! - config: Configuration display and validation

pub mod clean;
pub mod config;
pub mod serve;
pub mod stats;

/// Format large numbers with commas
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, ch) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }

    result.chars().rev().collect()
}
