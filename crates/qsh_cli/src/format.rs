use serde::Deserialize;

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

/// Rows between flushes while streaming.
pub const FLUSH_EVERY: u64 = 100;
/// Rows between flushes once pagination has been switched off with `a`.
pub const UNBOUNDED_FLUSH_EVERY: u64 = 10;
/// Size of the bounded output buffer.
pub const OUTPUT_BUFFER_BYTES: usize = 64 * 1024;

/// How one query's result should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub format: OutputFormat,
    /// Maximum rows to emit; 0 means unlimited.
    pub limit: u64,
    /// Rows per page in interactive table output; 0 disables pagination.
    pub page_size: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Table,
            limit: 0,
            page_size: 20,
        }
    }
}

impl StreamOptions {
    pub fn limit_reached(&self, emitted: u64) -> bool {
        self.limit > 0 && emitted >= self.limit
    }
}

/// Format a row count for the status line.
pub fn format_row_count(rows: u64) -> String {
    format!("{} row{}", rows, if rows == 1 { "" } else { "s" })
}
