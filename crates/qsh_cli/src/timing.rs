use crate::format::format_row_count;
use std::time::{Duration, Instant};

/// Wall-clock timer for one statement, started at submission.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Elapsed time as shown to the user, e.g. `1.234 sec`.
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3} sec", elapsed.as_secs_f64())
}

/// Status line after a successful statement.
pub fn format_success(rows: u64, elapsed: Duration) -> String {
    format!("{} ({})", format_row_count(rows), format_elapsed(elapsed))
}

/// Status line after a cancelled statement.
pub fn format_cancelled(elapsed: Duration) -> String {
    format!("Query cancelled after {}", format_elapsed(elapsed))
}
