use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long table names are trusted before a lookup re-queries the engine.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// Table names per database, used only to improve completion.
///
/// One refresh timestamp covers the whole cache. A stale or missing entry
/// only degrades suggestions; it never affects query execution.
#[derive(Debug, Default)]
pub struct IdentifierCache {
    tables: HashMap<String, Vec<String>>,
    refreshed_at: Option<Instant>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when never refreshed or older than `CACHE_TTL` at `now`.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) > CACHE_TTL,
        }
    }

    /// Forget the refresh time so the next lookup re-queries unconditionally.
    /// Entries are kept so completion still has something while refreshing.
    pub fn invalidate(&mut self) {
        self.refreshed_at = None;
    }

    pub fn store(&mut self, database: &str, tables: Vec<String>, now: Instant) {
        self.tables.insert(database.to_string(), tables);
        self.refreshed_at = Some(now);
    }

    pub fn tables(&self, database: &str) -> &[String] {
        self.tables
            .get(database)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn set_refreshed_at(&mut self, at: Option<Instant>) {
        self.refreshed_at = at;
    }
}
