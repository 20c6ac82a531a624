//! Read side: persistence, queries, statistics, export and retention

pub mod database;
pub mod export;
pub mod query;
pub mod retention;
pub mod stats;

pub use database::{BulkDeleteOutcome, LogDb};
pub use export::ExportFormat;
pub use query::{LogFilter, Page, Paginated, Sort, SortOrder};
pub use retention::{spawn_cleanup_task, RetentionJob};
pub use stats::{Period, Statistics};
